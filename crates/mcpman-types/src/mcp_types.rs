//! MCP entity types shared between the upstream client and the meta-server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// MCP Tool definition as ingested from an upstream `tools/list`.
///
/// `(server, name)` is the stable identifier; `name` alone is not globally
/// unique across the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpTool {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// One part of an MCP tool result `content` array.
///
/// The set of part types is open-ended (`text`, `image`, `resource`, ...), so
/// unknown fields are preserved verbatim in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

/// The `content` array of an MCP tool call.
pub type ToolResult = Vec<ContentPart>;

/// Filesystem root boundary supplied by the downstream client.
///
/// Roots are advisory, not a security boundary; mcpman forwards them to any
/// upstream that asks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Root {
    /// File URI (file:// scheme)
    pub uri: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Response to a `roots/list` request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RootsListResult {
    pub roots: Vec<Root>,
}
