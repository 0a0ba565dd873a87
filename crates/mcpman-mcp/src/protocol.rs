//! JSON-RPC 2.0 wire types for MCP traffic, both upstream and downstream.

use mcpman_types::{McpTool, ToolResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Keep `"result": null` distinguishable from a missing `result` field.
///
/// Serde would fold both into `None` for an `Option` field; running the
/// field through this deserializer yields `Some(Value::Null)` for an
/// explicit null, which a server is allowed to send as a real result.
fn deserialize_result<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(Value::deserialize(deserializer)?))
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version marker, fixed at "2.0".
    pub jsonrpc: String,

    /// Correlation id; absent for notifications. Peers may use strings,
    /// numbers, or null.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    /// Echo of the request id this answers.
    pub id: Value,

    /// Success payload; an explicit null arrives as `Some(Value::Null)`.
    #[serde(default, deserialize_with = "deserialize_result")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 notification (a request without an id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 message envelope
///
/// Used for parsing incoming messages where the kind is not known up front.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        // A result or error key can only mean an answer to one of our calls.
        if value.get("result").is_some() || value.get("error").is_some() {
            return serde_json::from_value(value)
                .map(JsonRpcMessage::Response)
                .map_err(serde::de::Error::custom);
        }

        // Otherwise an id (even a null one) marks a call expecting a reply,
        if value.get("id").is_some() {
            return serde_json::from_value(value)
                .map(JsonRpcMessage::Request)
                .map_err(serde::de::Error::custom);
        }

        // and a bare method is fire-and-forget.
        if value.get("method").is_some() {
            return serde_json::from_value(value)
                .map(JsonRpcMessage::Notification)
                .map_err(serde::de::Error::custom);
        }

        Err(serde::de::Error::custom(
            "Invalid JSON-RPC message: must have either 'id' or 'method' field",
        ))
    }
}

// Standard JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Application-specific error codes
pub const TOOL_NOT_FOUND: i32 = -32001;
pub const SERVER_UNAVAILABLE: i32 = -32004;

impl JsonRpcRequest {
    pub fn new(id: Option<Value>, method: String, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method,
            params,
        }
    }

    pub fn with_id(id: u64, method: String, params: Option<Value>) -> Self {
        Self::new(Some(Value::Number(id.into())), method, params)
    }

    /// Check if this is a notification (no id)
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl JsonRpcError {
    pub fn new(code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            code,
            message,
            data,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, message.into(), None)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message.into(), None)
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            METHOD_NOT_FOUND,
            format!("Method not found: {}", method.into()),
            None,
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message.into(), None)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message.into(), None)
    }

    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::new(
            TOOL_NOT_FOUND,
            format!("Tool not found: {}", name.into()),
            None,
        )
    }

    pub fn server_unavailable(message: impl Into<String>) -> Self {
        Self::new(SERVER_UNAVAILABLE, message.into(), None)
    }
}

impl JsonRpcNotification {
    pub fn new(method: String, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method,
            params,
        }
    }
}

// ===== MCP handshake types =====

/// Initialize result from a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    #[serde(default)]
    pub capabilities: ServerCapabilities,

    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,

    /// Optional instructions describing how to use this server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Client capabilities (sent during initialization)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,

    /// Sampling capability - client supports sampling/createMessage requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

impl ClientCapabilities {
    pub fn supports_sampling(&self) -> bool {
        self.sampling.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootsCapability {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Server capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Server / client info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Result of a `tools/list` call
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListToolsResult {
    pub tools: Vec<McpTool>,
}

/// Result of a `tools/call`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: ToolResult,

    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Protocol version mcpman speaks toward upstreams and downstream.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trips_on_the_wire() {
        let request = JsonRpcRequest::with_id(
            7,
            "tools/call".to_string(),
            Some(json!({"name": "list_directory", "arguments": {"path": "."}})),
        );

        let wire = serde_json::to_string(&request).unwrap();
        let parsed: JsonRpcRequest = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed.id, Some(json!(7)));
        assert_eq!(parsed.method, "tools/call");
        assert_eq!(parsed.params.unwrap()["name"], "list_directory");
        assert_eq!(parsed.jsonrpc, "2.0");
    }

    #[test]
    fn test_notification_has_no_id() {
        let notification =
            JsonRpcRequest::new(None, "notifications/roots/list_changed".to_string(), None);
        assert!(notification.is_notification());
        let wire = serde_json::to_string(&notification).unwrap();
        assert!(!wire.contains("\"id\""));

        assert!(!JsonRpcRequest::with_id(2, "ping".to_string(), None).is_notification());
    }

    #[test]
    fn test_response_success_and_error() {
        let ok = JsonRpcResponse::success(json!("req-3"), json!({"tools": []}));
        assert!(!ok.is_error());
        assert_eq!(ok.id, json!("req-3"));

        let failed =
            JsonRpcResponse::error(json!("req-4"), JsonRpcError::server_unavailable("offline"));
        assert!(failed.is_error());
        assert!(failed.result.is_none());
    }

    #[test]
    fn test_null_result_is_preserved() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert_eq!(resp.result, Some(Value::Null));
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_envelope_distinguishes_message_kinds() {
        let call = r#"{"jsonrpc":"2.0","id":"a1","method":"roots/list"}"#;
        assert!(matches!(
            serde_json::from_str(call).unwrap(),
            JsonRpcMessage::Request(_)
        ));

        let answer = r#"{"jsonrpc":"2.0","id":"a1","result":{"roots":[]}}"#;
        assert!(matches!(
            serde_json::from_str(answer).unwrap(),
            JsonRpcMessage::Response(_)
        ));

        // An error body is a response even without a result.
        let refusal = r#"{"jsonrpc":"2.0","id":"a2","error":{"code":-32601,"message":"nope"}}"#;
        assert!(matches!(
            serde_json::from_str(refusal).unwrap(),
            JsonRpcMessage::Response(_)
        ));

        let fire_and_forget = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        assert!(matches!(
            serde_json::from_str(fire_and_forget).unwrap(),
            JsonRpcMessage::Notification(_)
        ));

        assert!(serde_json::from_str::<JsonRpcMessage>(r#"{"jsonrpc":"2.0"}"#).is_err());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(JsonRpcError::parse_error("x").code, PARSE_ERROR);
        assert_eq!(JsonRpcError::invalid_request("x").code, INVALID_REQUEST);
        assert_eq!(JsonRpcError::method_not_found("x").code, METHOD_NOT_FOUND);
        assert_eq!(JsonRpcError::invalid_params("x").code, INVALID_PARAMS);
        assert_eq!(JsonRpcError::internal_error("x").code, INTERNAL_ERROR);

        let err = JsonRpcError::tool_not_found("echo");
        assert_eq!(err.code, TOOL_NOT_FOUND);
        assert!(err.message.contains("echo"));

        let err = JsonRpcError::server_unavailable("offline");
        assert_eq!(err.code, SERVER_UNAVAILABLE);
    }

    #[test]
    fn test_call_tool_result_parsing() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "hello"}]
        }))
        .unwrap();
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.content[0].text.as_deref(), Some("hello"));
        assert_eq!(result.is_error, None);
    }

    #[test]
    fn test_initialize_result_parsing() {
        let result: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {"name": "stub", "version": "0.1.0"}
        }))
        .unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert_eq!(
            result.capabilities.tools.unwrap().list_changed,
            Some(true)
        );
    }
}
