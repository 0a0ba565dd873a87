//! The `invoke` meta-tool: schema-validated batch calls.

use futures::future::join_all;
use mcpman_surface::{compile_schema, names};
use mcpman_types::{AppError, ToolResult};
use serde::Deserialize;
use serde_json::{json, Value};

use super::HandlerResult;
use crate::engine::Engine;
use crate::format::result_record;

#[derive(Debug, Clone, Deserialize)]
struct CallSpec {
    server: String,
    tool: String,

    #[serde(default)]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct InvokeParams {
    #[serde(default)]
    calls: Vec<CallSpec>,

    #[serde(default)]
    parallel: bool,
}

/// Unwrap a single-text result to its string for `$results` storage.
fn unwrap_result(content: ToolResult) -> Value {
    if content.len() == 1 && content[0].kind == "text" {
        if let Some(text) = &content[0].text {
            return Value::String(text.clone());
        }
    }
    serde_json::to_value(&content).unwrap_or(Value::Null)
}

/// Run one call end to end. Err carries the per-call error record text.
async fn execute_call(engine: &Engine, call: &CallSpec) -> Result<String, String> {
    let tools = engine
        .upstreams
        .list_tools(&call.server)
        .await
        .map_err(|e| format!("Error: {}", e))?;

    let name = names::resolve(&call.tool, tools.iter().map(|t| t.name.as_str())).ok_or_else(
        || {
            format!(
                "Error: {}",
                AppError::ToolNotFound {
                    server: call.server.clone(),
                    tool: call.tool.clone(),
                    available: tools
                        .iter()
                        .map(|t| t.name.clone())
                        .collect::<Vec<_>>()
                        .join(", "),
                }
            )
        },
    )?;
    let tool = tools
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| format!("Error: tool '{}' vanished during lookup", name))?;

    let parameters = call.parameters.clone().unwrap_or_else(|| json!({}));
    let validator = compile_schema(&tool.input_schema);
    if let Err(validation) = validator.validate(&parameters) {
        return Err(format!(
            "Error: Invalid parameters for {}.{}:\n{}",
            call.server, name, validation
        ));
    }

    let content = engine
        .upstreams
        .call_tool(&call.server, &name, parameters)
        .await
        .map_err(|e| format!("Error: {}", e))?;

    let stored = unwrap_result(content);
    let index = engine.runtime.append_result(stored.clone()).await;
    Ok(result_record(
        index,
        &format!("invoke {}.{}", call.server, name),
        &stored,
    ))
}

pub async fn handle(engine: &Engine, args: Value) -> HandlerResult {
    let params: InvokeParams = match serde_json::from_value(args) {
        Ok(params) => params,
        Err(e) => return HandlerResult::err(format!("Invalid arguments: {}", e)),
    };

    if params.calls.is_empty() {
        return HandlerResult::parts(Vec::new(), false);
    }

    let mut parts = Vec::with_capacity(params.calls.len());
    let mut any_error = false;

    if params.parallel {
        // All calls run concurrently; the returned records keep input order
        // while $results fills in completion order.
        let futures = params.calls.iter().map(|call| execute_call(engine, call));
        for record in join_all(futures).await {
            match record {
                Ok(text) => parts.push(text),
                Err(text) => {
                    parts.push(text);
                    any_error = true;
                }
            }
        }
    } else {
        // Sequential mode halts at the first failing call; later calls are
        // never attempted.
        for call in &params.calls {
            match execute_call(engine, call).await {
                Ok(text) => parts.push(text),
                Err(text) => {
                    parts.push(text);
                    any_error = true;
                    break;
                }
            }
        }
    }

    HandlerResult::parts(parts, any_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::testutil::stub_engine;

    #[tokio::test]
    async fn test_empty_calls_returns_empty_content() {
        let (engine, stub) = stub_engine();
        let result = handle(&engine, json!({"calls": []})).await;
        assert_eq!(result.parts.len(), 0);
        assert!(!result.is_error);
        assert!(stub.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sequential_stops_on_error() {
        let (engine, stub) = stub_engine();
        let result = handle(
            &engine,
            json!({
                "calls": [
                    {"server": "filesystem", "tool": "list_directory", "parameters": {"path": "."}},
                    {"server": "nope", "tool": "x"},
                    {"server": "filesystem", "tool": "list_directory", "parameters": {"path": "/"}}
                ],
                "parallel": false
            }),
        )
        .await;

        assert_eq!(result.parts.len(), 2);
        assert!(result.is_error);
        assert!(result.parts[0].starts_with("$results[0] = // invoke filesystem.list_directory"));
        assert!(result.parts[1].contains("Server 'nope' not found"));

        // The third call was never attempted.
        assert_eq!(stub.calls.lock().len(), 1);
        assert_eq!(engine.runtime.results_len(), 1);
    }

    #[tokio::test]
    async fn test_parallel_returns_all_records() {
        let (engine, stub) = stub_engine();
        let result = handle(
            &engine,
            json!({
                "calls": [
                    {"server": "filesystem", "tool": "list_directory", "parameters": {"path": "."}},
                    {"server": "nope", "tool": "x"}
                ],
                "parallel": true
            }),
        )
        .await;

        assert_eq!(result.parts.len(), 2);
        assert!(result.parts[0].contains("// invoke filesystem.list_directory"));
        assert!(result.parts[1].contains("Server 'nope' not found"));

        // Only the successful call reached $results.
        assert_eq!(engine.runtime.results_len(), 1);
        assert_eq!(stub.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_camel_tool_name_resolves_to_original() {
        let (engine, stub) = stub_engine();
        let result = handle(
            &engine,
            json!({
                "calls": [
                    {"server": "filesystem", "tool": "listDirectory", "parameters": {"path": "."}}
                ]
            }),
        )
        .await;

        assert!(!result.is_error);
        let calls = stub.calls.lock();
        assert_eq!(calls[0].1, "list_directory");
    }

    #[tokio::test]
    async fn test_validation_failure_is_a_per_call_record() {
        let (engine, stub) = stub_engine();
        let result = handle(
            &engine,
            json!({
                "calls": [
                    {"server": "filesystem", "tool": "list_directory", "parameters": {"path": 42}}
                ]
            }),
        )
        .await;

        assert!(result.is_error);
        assert!(result.parts[0].contains("Invalid parameters"));
        assert!(result.parts[0].contains("Expected string, received number"));
        // Validation failed before the upstream was reached.
        assert!(stub.calls.lock().is_empty());
        assert_eq!(engine.runtime.results_len(), 0);
    }

    #[tokio::test]
    async fn test_missing_parameters_default_to_empty_object() {
        let (engine, _stub) = stub_engine();
        let result = handle(
            &engine,
            json!({
                "calls": [{"server": "filesystem", "tool": "list_directory"}]
            }),
        )
        .await;

        // {} fails validation because `path` is required.
        assert!(result.is_error);
        assert!(result.parts[0].contains("path: Required"));
    }

    #[tokio::test]
    async fn test_multi_part_results_stored_as_content_array() {
        let (engine, _stub) = stub_engine();
        let result = handle(
            &engine,
            json!({
                "calls": [
                    {"server": "filesystem", "tool": "list_directory", "parameters": {"path": "."}}
                ]
            }),
        )
        .await;

        assert!(!result.is_error);
        // Two text parts, so no single-text unwrap; stored as the array.
        let stored = engine.runtime.result(0).unwrap();
        assert!(stored.is_array());
        assert_eq!(stored.as_array().unwrap().len(), 2);
    }
}
