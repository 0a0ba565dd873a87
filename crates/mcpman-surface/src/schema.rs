//! Schema-to-validator compiler.
//!
//! Translates the JSON Schema subset upstream tools actually use (object with
//! `properties`/`required`, array, the primitive types) into a runtime
//! validator and TypeScript type-text fragments. Anything outside the subset
//! collapses to `unknown`. The compiler is pure: no `$ref` resolution, regex
//! formats, or numeric bounds.

use std::fmt;

use serde_json::Value;

use crate::names::is_identifier;

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Object { properties: Vec<Property> },
    Array(Box<Schema>),
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub schema: Schema,
    pub required: bool,
    pub description: Option<String>,
}

/// One structured validation issue with a dotted path.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub issues: Vec<Issue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            if issue.path.is_empty() {
                write!(f, "{}", issue.message)?;
            } else {
                write!(f, "{}: {}", issue.path, issue.message)?;
            }
        }
        Ok(())
    }
}

/// Compile a JSON Schema fragment into a [`Schema`].
pub fn compile_schema(value: &Value) -> Schema {
    let object = match value.as_object() {
        Some(object) => object,
        None => return Schema::Unknown,
    };

    match object.get("type").and_then(Value::as_str) {
        Some("object") => {
            let required: Vec<&str> = object
                .get("required")
                .and_then(Value::as_array)
                .map(|entries| entries.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            let mut properties = Vec::new();
            if let Some(props) = object.get("properties").and_then(Value::as_object) {
                for (name, prop) in props {
                    properties.push(Property {
                        name: name.clone(),
                        schema: compile_schema(prop),
                        required: required.contains(&name.as_str()),
                        description: prop
                            .get("description")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    });
                }
            }
            Schema::Object { properties }
        }
        Some("array") => {
            let items = object
                .get("items")
                .map(compile_schema)
                .unwrap_or(Schema::Unknown);
            Schema::Array(Box::new(items))
        }
        Some("string") => Schema::String,
        Some("number") => Schema::Number,
        Some("integer") => Schema::Integer,
        Some("boolean") => Schema::Boolean,
        Some("null") => Schema::Null,
        _ => Schema::Unknown,
    }
}

impl Schema {
    /// Structural validation; returns all issues, not just the first.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let mut issues = Vec::new();
        self.check(value, "", &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    fn check(&self, value: &Value, path: &str, issues: &mut Vec<Issue>) {
        match self {
            Schema::Unknown => {}
            Schema::Null => {
                if !value.is_null() {
                    push_mismatch(issues, path, "null", value);
                }
            }
            Schema::String => {
                if !value.is_string() {
                    push_mismatch(issues, path, "string", value);
                }
            }
            Schema::Boolean => {
                if !value.is_boolean() {
                    push_mismatch(issues, path, "boolean", value);
                }
            }
            Schema::Number => {
                if !value.is_number() {
                    push_mismatch(issues, path, "number", value);
                }
            }
            Schema::Integer => {
                if value.as_i64().is_none() && value.as_u64().is_none() {
                    push_mismatch(issues, path, "integer", value);
                }
            }
            Schema::Array(items) => match value.as_array() {
                Some(entries) => {
                    for (i, entry) in entries.iter().enumerate() {
                        items.check(entry, &join_path(path, &i.to_string()), issues);
                    }
                }
                None => push_mismatch(issues, path, "array", value),
            },
            Schema::Object { properties } => match value.as_object() {
                Some(map) => {
                    for property in properties {
                        match map.get(&property.name) {
                            Some(entry) => {
                                property
                                    .schema
                                    .check(entry, &join_path(path, &property.name), issues)
                            }
                            None if property.required => issues.push(Issue {
                                path: join_path(path, &property.name),
                                message: "Required".to_string(),
                            }),
                            None => {}
                        }
                    }
                }
                None => push_mismatch(issues, path, "object", value),
            },
        }
    }

    /// Inline TypeScript rendering of this schema.
    pub fn type_text(&self) -> String {
        match self {
            Schema::Object { properties } => {
                if properties.is_empty() {
                    return "Record<string, unknown>".to_string();
                }
                let fields: Vec<String> = properties
                    .iter()
                    .map(|p| format!("{} {}", field_label(p), p.schema.type_text()))
                    .collect();
                format!("{{ {} }}", fields.join(" "))
            }
            Schema::Array(items) => format!("Array<{}>", items.type_text()),
            Schema::String => "string".to_string(),
            Schema::Number | Schema::Integer => "number".to_string(),
            Schema::Boolean => "boolean".to_string(),
            Schema::Null => "null".to_string(),
            Schema::Unknown => "unknown".to_string(),
        }
    }

    /// Multi-line interface body for object schemas (one field per line).
    pub fn interface_body(&self) -> String {
        match self {
            Schema::Object { properties } => {
                let mut out = String::new();
                for property in properties {
                    if let Some(description) = &property.description {
                        out.push_str(&format!("  /** {} */\n", description.replace('\n', " ")));
                    }
                    out.push_str(&format!(
                        "  {} {};\n",
                        field_label(property),
                        property.schema.type_text()
                    ));
                }
                out
            }
            other => format!("  [input: string]: {};\n", other.type_text()),
        }
    }

    pub fn required_properties(&self) -> Vec<&str> {
        match self {
            Schema::Object { properties } => properties
                .iter()
                .filter(|p| p.required)
                .map(|p| p.name.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        match self {
            Schema::Object { properties } => properties.iter().find(|p| p.name == name),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Schema::Object { .. })
    }
}

fn field_label(property: &Property) -> String {
    let name = if is_identifier(&property.name) {
        property.name.clone()
    } else {
        format!("{:?}", property.name)
    };
    if property.required {
        format!("{}:", name)
    } else {
        format!("{}?:", name)
    }
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", base, key)
    }
}

fn push_mismatch(issues: &mut Vec<Issue>, path: &str, expected: &str, value: &Value) {
    issues.push(Issue {
        path: path.to_string(),
        message: format!("Expected {}, received {}", expected, json_type_name(value)),
    });
}

/// Human-facing type name of a JSON value.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn directory_schema() -> Schema {
        compile_schema(&json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list"},
                "depth": {"type": "integer"},
                "hidden": {"type": "boolean"}
            },
            "required": ["path"]
        }))
    }

    #[test]
    fn test_compile_object() {
        let schema = directory_schema();
        assert!(schema.is_object());
        assert_eq!(schema.required_properties(), vec!["path"]);
        assert!(schema.property("depth").is_some());
        assert!(!schema.property("depth").unwrap().required);
    }

    #[test]
    fn test_valid_input_passes() {
        let schema = directory_schema();
        assert!(schema.validate(&json!({"path": ".", "depth": 2})).is_ok());
    }

    #[test]
    fn test_missing_required_reports_path() {
        let schema = directory_schema();
        let err = schema.validate(&json!({"depth": 2})).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].path, "path");
        assert_eq!(err.issues[0].message, "Required");
    }

    #[test]
    fn test_type_mismatch_reports_expected_and_received() {
        let schema = directory_schema();
        let err = schema
            .validate(&json!({"path": 42, "hidden": "yes"}))
            .unwrap_err();
        assert_eq!(err.issues.len(), 2);
        assert!(err
            .issues
            .iter()
            .any(|i| i.path == "path" && i.message == "Expected string, received number"));
        assert!(err
            .issues
            .iter()
            .any(|i| i.path == "hidden" && i.message == "Expected boolean, received string"));
    }

    #[test]
    fn test_nested_paths_are_dotted() {
        let schema = compile_schema(&json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": {"name": {"type": "string"}},
                    "required": ["name"]
                }
            },
            "required": ["filter"]
        }));

        let err = schema.validate(&json!({"filter": {}})).unwrap_err();
        assert_eq!(err.issues[0].path, "filter.name");
    }

    #[test]
    fn test_array_items_validated_by_index() {
        let schema = compile_schema(&json!({
            "type": "array",
            "items": {"type": "string"}
        }));

        let err = schema.validate(&json!(["ok", 3])).unwrap_err();
        assert_eq!(err.issues[0].path, "1");
        assert_eq!(err.issues[0].message, "Expected string, received number");
    }

    #[test]
    fn test_unknown_type_accepts_anything() {
        let schema = compile_schema(&json!({"type": "wibble"}));
        assert_eq!(schema, Schema::Unknown);
        assert!(schema.validate(&json!({"whatever": [1, 2]})).is_ok());
    }

    #[test]
    fn test_type_text_rendering() {
        let schema = directory_schema();
        let text = schema.type_text();
        assert!(text.contains("path: string"));
        assert!(text.contains("depth?: number"));
        assert!(text.contains("hidden?: boolean"));

        let body = schema.interface_body();
        assert!(body.contains("  path: string;\n"));
        assert!(body.contains("/** Directory to list */"));
    }

    #[test]
    fn test_non_identifier_property_names_are_quoted() {
        let schema = compile_schema(&json!({
            "type": "object",
            "properties": {"content-type": {"type": "string"}}
        }));
        assert!(schema.type_text().contains("\"content-type\"?: string"));
    }

    #[test]
    fn test_validation_error_display() {
        let schema = directory_schema();
        let err = schema.validate(&json!({})).unwrap_err();
        assert_eq!(err.to_string(), "path: Required");
    }
}
