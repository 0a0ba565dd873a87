//! The downstream stdio server: one MCP client (the LLM agent) connects on
//! stdin/stdout; stdout carries nothing but JSON-RPC.
//!
//! The peer half also supports server→client requests (`roots/list`,
//! `sampling/createMessage`) with its own id space.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcpman_mcp::protocol::{
    ClientCapabilities, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, PROTOCOL_VERSION,
};
use mcpman_types::{AppError, AppResult, Root, RootsListResult};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};

use crate::engine::Engine;
use crate::meta;

/// How long we wait for the client to answer a roots request.
const ROOTS_TIMEOUT: Duration = Duration::from_secs(30);

/// Sampling completions can take a while.
const SAMPLING_TIMEOUT: Duration = Duration::from_secs(300);

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

fn normalize_id(id: &Value) -> String {
    match id {
        Value::Null => "__null_id__".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s),
        _ => id.to_string(),
    }
}

/// The write half of the downstream connection plus request correlation.
pub struct DownstreamPeer {
    writer: SharedWriter,

    pending: RwLock<HashMap<String, oneshot::Sender<JsonRpcResponse>>>,

    next_id: AtomicU64,

    capabilities: RwLock<Option<ClientCapabilities>>,
}

impl DownstreamPeer {
    fn new(writer: SharedWriter) -> Arc<Self> {
        Arc::new(Self {
            writer,
            pending: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capabilities: RwLock::new(None),
        })
    }

    async fn write_message<T: serde::Serialize>(&self, message: &T) -> AppResult<()> {
        let mut bytes = serde_json::to_vec(message)?;
        bytes.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| AppError::Mcp(format!("Failed to write to downstream: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| AppError::Mcp(format!("Failed to flush downstream: {}", e)))
    }

    pub async fn respond(&self, response: JsonRpcResponse) {
        if let Err(e) = self.write_message(&response).await {
            tracing::error!("Failed to send response: {}", e);
        }
    }

    /// Server→client request with its own id space.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> AppResult<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::with_id(id, method.to_string(), params);

        let (tx, rx) = oneshot::channel();
        self.pending.write().insert(id.to_string(), tx);

        if let Err(e) = self.write_message(&request).await {
            self.pending.write().remove(&id.to_string());
            return Err(e);
        }

        tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| {
                self.pending.write().remove(&id.to_string());
                AppError::Mcp(format!("Client did not answer '{}' in time", method))
            })?
            .map_err(|_| AppError::Mcp(format!("Response channel closed for '{}'", method)))
    }

    fn handle_response(&self, response: JsonRpcResponse) {
        let key = normalize_id(&response.id);
        if let Some(sender) = self.pending.write().remove(&key) {
            let _ = sender.send(response);
        } else {
            tracing::warn!("Client sent response for unknown request {}", key);
        }
    }

    fn set_capabilities(&self, capabilities: ClientCapabilities) {
        *self.capabilities.write() = Some(capabilities);
    }

    pub fn capabilities(&self) -> Option<ClientCapabilities> {
        self.capabilities.read().clone()
    }

    pub fn supports_sampling(&self) -> bool {
        self.capabilities()
            .map(|c| c.supports_sampling())
            .unwrap_or(false)
    }

    /// Ask the client for its roots; failures yield the empty set.
    pub async fn list_roots(&self) -> Vec<Root> {
        match self.request("roots/list", None, ROOTS_TIMEOUT).await {
            Ok(response) => match response.result {
                Some(result) => serde_json::from_value::<RootsListResult>(result)
                    .map(|r| r.roots)
                    .unwrap_or_else(|e| {
                        tracing::warn!("Client sent malformed roots: {}", e);
                        Vec::new()
                    }),
                None => Vec::new(),
            },
            Err(e) => {
                tracing::warn!("roots/list to client failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Relay a sampling request to the client.
    pub async fn create_message(&self, params: Value) -> AppResult<Value> {
        let response = self
            .request("sampling/createMessage", Some(params), SAMPLING_TIMEOUT)
            .await?;
        if let Some(error) = response.error {
            return Err(AppError::Mcp(format!(
                "Sampling failed: {} ({})",
                error.message, error.code
            )));
        }
        response
            .result
            .ok_or_else(|| AppError::Mcp("Empty sampling response".to_string()))
    }
}

/// The read loop serving one downstream client.
pub struct DownstreamServer;

impl DownstreamServer {
    /// Serve MCP over the given byte streams until EOF.
    ///
    /// Logs go to stderr only; every byte written to `writer` is JSON-RPC.
    pub async fn run<R, W>(engine: Arc<Engine>, reader: R, writer: W) -> AppResult<()>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));
        let peer = DownstreamPeer::new(writer);
        engine.set_peer(peer.clone());

        let mut lines = BufReader::new(reader).lines();

        tracing::info!("Downstream server ready, reading from stdin");

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| AppError::Mcp(format!("Failed to read from stdin: {}", e)))?
        {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                Ok(JsonRpcMessage::Request(request)) => {
                    Self::handle_request(&engine, &peer, request).await;
                }
                Ok(JsonRpcMessage::Response(response)) => peer.handle_response(response),
                Ok(JsonRpcMessage::Notification(notification)) => {
                    Self::handle_notification(&engine, &peer, notification);
                }
                Err(e) => {
                    tracing::warn!("Failed to parse JSON-RPC request: {}", e);
                    peer.respond(JsonRpcResponse::error(
                        Value::Null,
                        JsonRpcError::parse_error(e.to_string()),
                    ))
                    .await;
                }
            }
        }

        tracing::info!("Downstream client disconnected (EOF)");
        Ok(())
    }

    async fn handle_request(engine: &Arc<Engine>, peer: &Arc<DownstreamPeer>, request: JsonRpcRequest) {
        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => {
                let capabilities: ClientCapabilities = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("capabilities"))
                    .and_then(|c| serde_json::from_value(c.clone()).ok())
                    .unwrap_or_default();
                peer.set_capabilities(capabilities);

                let result = json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "mcpman", "version": "1.0.0" },
                });
                peer.respond(JsonRpcResponse::success(id, result)).await;
            }
            "tools/list" => {
                let tools = meta::tool_descriptors();
                peer.respond(JsonRpcResponse::success(id, json!({ "tools": tools })))
                    .await;
            }
            "tools/call" => {
                let name = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("arguments"))
                    .cloned()
                    .unwrap_or(json!({}));

                // Handlers can run long (eval has a 30s budget), so each call
                // gets its own task and responses may interleave.
                let engine = engine.clone();
                let peer = peer.clone();
                tokio::spawn(async move {
                    let response = match meta::dispatch(&engine, &name, arguments).await {
                        Some(outcome) => {
                            let content: Vec<Value> = outcome
                                .parts
                                .iter()
                                .map(|text| json!({ "type": "text", "text": text }))
                                .collect();
                            let mut result = json!({ "content": content });
                            if outcome.is_error {
                                result["isError"] = json!(true);
                            }
                            JsonRpcResponse::success(id, result)
                        }
                        None => {
                            JsonRpcResponse::error(id, JsonRpcError::tool_not_found(&name))
                        }
                    };
                    peer.respond(response).await;
                });
            }
            "ping" => {
                peer.respond(JsonRpcResponse::success(id, json!({}))).await;
            }
            other => {
                peer.respond(JsonRpcResponse::error(
                    id,
                    JsonRpcError::method_not_found(other),
                ))
                .await;
            }
        }
    }

    fn handle_notification(
        engine: &Arc<Engine>,
        peer: &Arc<DownstreamPeer>,
        notification: JsonRpcNotification,
    ) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                if let Some(capabilities) = peer.capabilities() {
                    tracing::info!(
                        "Client initialized (sampling: {}, roots: {})",
                        capabilities.supports_sampling(),
                        capabilities.roots.is_some()
                    );
                } else {
                    tracing::info!("Client initialized (no capabilities advertised)");
                }

                let engine = engine.clone();
                let peer = peer.clone();
                tokio::spawn(async move {
                    if let Some(fleet) = engine.fleet.clone() {
                        // Roots provider first, so sessions announce roots as
                        // they connect.
                        let peer_for_roots = peer.clone();
                        fleet
                            .set_roots_provider(Arc::new(move || {
                                let peer = peer_for_roots.clone();
                                Box::pin(async move { peer.list_roots().await })
                            }))
                            .await;

                        match fleet.connect_all().await {
                            Ok(()) => {}
                            Err(e) if e.is_unauthorized() => {
                                tracing::warn!(
                                    "{}; remaining servers stay available",
                                    e
                                );
                            }
                            Err(e) => tracing::error!("Upstream connect failed: {}", e),
                        }
                    }

                    let connected = engine.upstreams.connected_servers();
                    tracing::info!(
                        "mcpman ready with {} connected upstream server(s): {}",
                        connected.len(),
                        connected.join(", ")
                    );
                    engine.gate.open();
                });
            }
            "notifications/roots/list_changed" => {
                if let Some(fleet) = engine.fleet.clone() {
                    tokio::spawn(async move { fleet.notify_roots_changed().await });
                }
            }
            other => {
                tracing::debug!("Ignoring client notification: {}", other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcpman_mcp::Upstreams;
    use mcpman_types::{AppResult as Res, McpTool, ToolResult};
    use std::collections::HashMap as StdHashMap;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    struct EmptyUpstreams;

    #[async_trait]
    impl Upstreams for EmptyUpstreams {
        async fn all_tools(&self) -> StdHashMap<String, Vec<McpTool>> {
            StdHashMap::new()
        }
        async fn list_tools(&self, server: &str) -> Res<Vec<McpTool>> {
            Err(AppError::ServerNotConnected(server.to_string()))
        }
        async fn call_tool(&self, server: &str, _tool: &str, _args: Value) -> Res<ToolResult> {
            Err(AppError::ServerNotConnected(server.to_string()))
        }
        fn connected_servers(&self) -> Vec<String> {
            Vec::new()
        }
        fn configured_servers(&self) -> Vec<String> {
            Vec::new()
        }
    }

    async fn send(
        writer: &mut (impl AsyncWriteExt + Unpin),
        value: Value,
    ) {
        writer
            .write_all(format!("{}\n", value).as_bytes())
            .await
            .unwrap();
    }

    async fn recv<R: AsyncRead + Unpin>(lines: &mut tokio::io::Lines<BufReader<R>>) -> Value {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_tools_list() {
        let engine = Engine::new(Arc::new(EmptyUpstreams), None, None);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);

        tokio::spawn(DownstreamServer::run(engine, server_read, server_write));
        let mut lines = BufReader::new(client_read).lines();

        send(
            &mut client_write,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {"sampling": {}},
                "clientInfo": {"name": "test", "version": "0"}
            }}),
        )
        .await;

        let init = recv(&mut lines).await;
        assert_eq!(init["result"]["serverInfo"]["name"], "mcpman");
        assert_eq!(init["result"]["protocolVersion"], "2024-11-05");

        send(
            &mut client_write,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        )
        .await;

        let tools = recv(&mut lines).await;
        let names: Vec<String> = tools["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        for expected in ["eval", "invoke", "code", "help", "list_servers", "install"] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_tool_calls_wait_for_initialized_gate() {
        let engine = Engine::new(Arc::new(EmptyUpstreams), None, None);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);

        tokio::spawn(DownstreamServer::run(engine, server_read, server_write));
        let mut lines = BufReader::new(client_read).lines();

        send(
            &mut client_write,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        )
        .await;
        let _ = recv(&mut lines).await;

        // tools/call before notifications/initialized: must not answer yet.
        send(
            &mut client_write,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {
                "name": "list_servers", "arguments": {}
            }}),
        )
        .await;

        // The gate opens when initialized arrives, and only then does the
        // pending call complete.
        send(
            &mut client_write,
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await;

        let response = recv(&mut lines).await;
        assert_eq!(response["id"], 2);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("{}") || text.contains("servers"));
    }

    #[tokio::test]
    async fn test_parse_errors_get_error_response() {
        let engine = Engine::new(Arc::new(EmptyUpstreams), None, None);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);

        tokio::spawn(DownstreamServer::run(engine, server_read, server_write));
        let mut lines = BufReader::new(client_read).lines();

        client_write.write_all(b"{ not json\n").await.unwrap();
        let response = recv(&mut lines).await;
        assert_eq!(response["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error() {
        let engine = Engine::new(Arc::new(EmptyUpstreams), None, None);
        engine.gate.open();
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);

        tokio::spawn(DownstreamServer::run(engine, server_read, server_write));
        let mut lines = BufReader::new(client_read).lines();

        send(
            &mut client_write,
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": {
                "name": "no_such_tool", "arguments": {}
            }}),
        )
        .await;

        let response = recv(&mut lines).await;
        assert_eq!(response["error"]["code"], -32001);
    }
}
