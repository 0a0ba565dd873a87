//! Rendering of stored values into the text records the downstream sees.

use serde_json::Value;

/// Rendered length above which the middle of the text is elided.
const TRUNCATE_AT: usize = 250;

/// Characters kept from the head and tail around the elision marker.
const HEAD_CHARS: usize = 150;
const TAIL_CHARS: usize = 60;

/// Render a stored value for display: bare strings stay unquoted, everything
/// else is pretty JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Truncate long renderings around a marker naming the `$results` index that
/// still holds the full value.
pub fn truncate(text: &str, index: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= TRUNCATE_AT {
        return text.to_string();
    }

    let head: String = chars[..HEAD_CHARS].iter().collect();
    let tail: String = chars[chars.len() - TAIL_CHARS..].iter().collect();
    format!(
        "{}\n... (see $results[{}] for full result) ...\n{}",
        head, index, tail
    )
}

/// The `$results[i] = // <tag>` record format shared by eval, code and
/// invoke.
pub fn result_record(index: usize, tag: &str, value: &Value) -> String {
    let rendered = render_value(value);
    format!("$results[{}] = // {}\n{}", index, tag, truncate(&rendered, index))
}

/// Combine an execution result with captured console output for storage.
pub fn combine_result_and_output(result: Value, output: &str) -> Value {
    if output.is_empty() {
        result
    } else {
        serde_json::json!({ "result": result, "output": output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_bare_values() {
        assert_eq!(render_value(&json!(42)), "42");
        assert_eq!(render_value(&json!("hello")), "hello");
        assert_eq!(render_value(&json!(null)), "null");
        assert!(render_value(&json!({"a": 1})).contains("\"a\": 1"));
    }

    #[test]
    fn test_short_text_untouched() {
        assert_eq!(truncate("short", 3), "short");
    }

    #[test]
    fn test_long_text_keeps_marker_and_ends() {
        let long = "x".repeat(1000);
        let out = truncate(&long, 7);
        assert!(out.len() < 1000);
        assert!(out.contains("see $results[7] for full result"));
        assert!(out.starts_with('x'));
        assert!(out.ends_with('x'));
    }

    #[test]
    fn test_truncation_is_char_boundary_safe() {
        let long = "é".repeat(500);
        let out = truncate(&long, 0);
        assert!(out.contains("see $results[0]"));
    }

    #[test]
    fn test_result_record_format() {
        let record = result_record(0, "eval", &json!(42));
        assert!(record.starts_with("$results[0] = // eval\n"));
        assert!(record.ends_with("42"));
    }

    #[test]
    fn test_combine_with_and_without_output() {
        assert_eq!(combine_result_and_output(json!(1), ""), json!(1));
        assert_eq!(
            combine_result_and_output(json!(1), "[LOG] hi"),
            json!({"result": 1, "output": "[LOG] hi"})
        );
    }
}
