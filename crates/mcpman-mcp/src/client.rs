//! Client side of one upstream MCP connection.

use std::sync::Arc;

use futures::future::BoxFuture;
use mcpman_types::{AppError, AppResult, McpTool, Root, RootsListResult, ToolResult};
use serde_json::{json, Value};

use crate::protocol::{
    CallToolResult, ClientCapabilities, InitializeResult, JsonRpcError, JsonRpcResponse,
    ListToolsResult, RootsCapability, PROTOCOL_VERSION,
};
use crate::transport::{InboundHandlers, Transport};

/// Async supplier of the current roots, installed by the fleet.
pub type RootsFn = Arc<dyn Fn() -> BoxFuture<'static, Vec<Root>> + Send + Sync>;

/// MCP client over an already-connected transport.
///
/// Advertises the `roots.listChanged` capability and services inbound
/// `roots/list` requests through the installed roots supplier.
pub struct McpClient {
    server_name: String,
    transport: Arc<dyn Transport>,
}

impl McpClient {
    pub fn new(server_name: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            server_name: server_name.to_string(),
            transport,
        }
    }

    /// Install the inbound handlers, then run the `initialize` handshake and
    /// send `notifications/initialized`.
    pub async fn initialize(&self, roots: RootsFn) -> AppResult<InitializeResult> {
        let server_name = self.server_name.clone();
        self.transport.set_inbound_handlers(InboundHandlers {
            on_request: Some(Arc::new(move |request| {
                let roots = roots.clone();
                Box::pin(async move {
                    let id = request.id.clone().unwrap_or(Value::Null);
                    match request.method.as_str() {
                        "roots/list" => {
                            let result = RootsListResult {
                                roots: roots().await,
                            };
                            match serde_json::to_value(result) {
                                Ok(value) => JsonRpcResponse::success(id, value),
                                Err(e) => JsonRpcResponse::error(
                                    id,
                                    JsonRpcError::internal_error(e.to_string()),
                                ),
                            }
                        }
                        "ping" => JsonRpcResponse::success(id, json!({})),
                        other => {
                            JsonRpcResponse::error(id, JsonRpcError::method_not_found(other))
                        }
                    }
                })
            })),
            on_notification: Some(Arc::new(move |notification| {
                tracing::debug!(
                    "Upstream {} sent notification: {}",
                    server_name,
                    notification.method
                );
            })),
        });

        let capabilities = ClientCapabilities {
            roots: Some(RootsCapability {
                list_changed: Some(true),
            }),
            sampling: None,
            experimental: None,
        };

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": capabilities,
            "clientInfo": { "name": "mcpman", "version": "1.0.0" },
        });

        let response = self.transport.request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(self.expect_result(response)?)
            .map_err(|e| {
                AppError::Mcp(format!(
                    "Invalid initialize result from {}: {}",
                    self.server_name, e
                ))
            })?;

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        tracing::info!(
            "Connected to {} ({} {})",
            self.server_name,
            result.server_info.name,
            result.server_info.version
        );
        Ok(result)
    }

    pub async fn list_tools(&self) -> AppResult<Vec<McpTool>> {
        let response = self.transport.request("tools/list", None).await?;
        let result: ListToolsResult = serde_json::from_value(self.expect_result(response)?)
            .map_err(|e| {
                AppError::Mcp(format!(
                    "Invalid tools/list result from {}: {}",
                    self.server_name, e
                ))
            })?;
        Ok(result.tools)
    }

    /// Call an upstream tool and return the result `content` array.
    ///
    /// Both JSON-RPC errors and `isError: true` results propagate as errors,
    /// so callers treat protocol and tool-level failures uniformly.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> AppResult<ToolResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let response = self.transport.request("tools/call", Some(params)).await?;
        let result: CallToolResult = serde_json::from_value(self.expect_result(response)?)
            .map_err(|e| {
                AppError::Mcp(format!(
                    "Invalid tools/call result from {}: {}",
                    self.server_name, e
                ))
            })?;

        if result.is_error == Some(true) {
            let message = result
                .content
                .iter()
                .find_map(|part| part.text.clone())
                .unwrap_or_else(|| "Tool reported an error".to_string());
            return Err(AppError::Mcp(format!(
                "Tool '{}' failed: {}",
                name, message
            )));
        }

        Ok(result.content)
    }

    /// Tell the upstream the root set changed so it can pull the new list.
    pub async fn notify_roots_list_changed(&self) -> AppResult<()> {
        self.transport
            .notify("notifications/roots/list_changed", None)
            .await
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub async fn close(&self) -> AppResult<()> {
        self.transport.close().await
    }

    fn expect_result(&self, response: JsonRpcResponse) -> AppResult<Value> {
        if let Some(error) = response.error {
            return Err(AppError::Mcp(format!(
                "{} returned error {}: {}",
                self.server_name, error.code, error.message
            )));
        }
        response.result.ok_or_else(|| {
            AppError::Mcp(format!("{} returned an empty response", self.server_name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcMessage;
    use crate::transport::memory_pair;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Minimal scripted upstream: answers initialize / tools/list /
    /// tools/call for a single `echo` tool and issues a roots/list request
    /// of its own after initialize.
    async fn run_fake_upstream(server: tokio::io::DuplexStream) {
        let (read, mut write) = tokio::io::split(server);
        let mut lines = BufReader::new(read).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let msg: JsonRpcMessage = match serde_json::from_str(&line) {
                Ok(msg) => msg,
                Err(_) => continue,
            };
            match msg {
                JsonRpcMessage::Request(req) => {
                    let id = req.id.clone().unwrap();
                    let result = match req.method.as_str() {
                        "initialize" => json!({
                            "protocolVersion": "2024-11-05",
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": "fake", "version": "0.0.1"}
                        }),
                        "tools/list" => json!({
                            "tools": [{
                                "name": "echo",
                                "description": "Echo back",
                                "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}
                            }]
                        }),
                        "tools/call" => {
                            let text = req.params.as_ref().unwrap()["arguments"]["text"]
                                .as_str()
                                .unwrap_or("")
                                .to_string();
                            json!({ "content": [{"type": "text", "text": text}] })
                        }
                        _ => json!({}),
                    };
                    let response =
                        serde_json::to_string(&JsonRpcResponse::success(id, result)).unwrap();
                    write
                        .write_all(format!("{}\n", response).as_bytes())
                        .await
                        .unwrap();
                }
                JsonRpcMessage::Notification(n) if n.method == "notifications/initialized" => {
                    // After the handshake, ask the client for its roots.
                    let request = json!({
                        "jsonrpc": "2.0",
                        "id": 1000,
                        "method": "roots/list"
                    });
                    write
                        .write_all(format!("{}\n", request).as_bytes())
                        .await
                        .unwrap();
                }
                JsonRpcMessage::Notification(_) | JsonRpcMessage::Response(_) => {}
            }
        }
    }

    fn static_roots() -> RootsFn {
        Arc::new(|| {
            Box::pin(async {
                vec![Root {
                    uri: "file:///workspace".to_string(),
                    name: Some("workspace".to_string()),
                }]
            })
        })
    }

    #[tokio::test]
    async fn test_initialize_and_call_round_trip() {
        let (transport, server) = memory_pair(Duration::from_secs(5));
        tokio::spawn(run_fake_upstream(server));

        let client = McpClient::new("fake", transport);
        let init = client.initialize(static_roots()).await.unwrap();
        assert_eq!(init.server_info.name, "fake");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let content = client
            .call_tool("echo", json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(content[0].text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_tool_error_results_propagate() {
        let (transport, server) = memory_pair(Duration::from_secs(5));
        let (read, mut write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(JsonRpcMessage::Request(req)) = serde_json::from_str(&line) {
                    let id = req.id.clone().unwrap();
                    let result = json!({
                        "content": [{"type": "text", "text": "disk on fire"}],
                        "isError": true
                    });
                    let response =
                        serde_json::to_string(&JsonRpcResponse::success(id, result)).unwrap();
                    write
                        .write_all(format!("{}\n", response).as_bytes())
                        .await
                        .unwrap();
                }
            }
        });

        let client = McpClient::new("fake", transport);
        let err = client.call_tool("burn", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("disk on fire"));
    }
}
