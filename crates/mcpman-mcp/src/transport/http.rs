//! Streamable HTTP transport per the MCP HTTP specification.
//!
//! Each outgoing message is POSTed to the endpoint with
//! `Accept: application/json, text/event-stream`; the server may answer with
//! a direct JSON body or an SSE-framed stream. A GET stream is opened for
//! server-initiated traffic when the server supports it (405 means it does
//! not). The `mcp-session-id` header is echoed once the server assigns one.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mcpman_types::{AppError, AppResult};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;

use super::{EndpointState, InboundHandlers, Transport};
use crate::oauth::OAuthProvider;
use crate::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// The POST side of the connection, shared with reply tasks.
struct HttpChannel {
    http: reqwest::Client,
    url: String,
    server_name: String,
    session_id: Mutex<Option<String>>,
    auth: Option<Arc<OAuthProvider>>,
}

impl HttpChannel {
    async fn apply_common_headers(
        &self,
        mut request: reqwest::RequestBuilder,
    ) -> AppResult<reqwest::RequestBuilder> {
        if let Some(provider) = &self.auth {
            request = request.bearer_auth(provider.access_token().await?);
        }
        if let Some(session) = self.session_id.lock().await.clone() {
            request = request.header("mcp-session-id", session);
        }
        Ok(request)
    }

    async fn remember_session_id(&self, response: &reqwest::Response) {
        if let Some(value) = response.headers().get("mcp-session-id") {
            if let Ok(value) = value.to_str() {
                *self.session_id.lock().await = Some(value.to_string());
            }
        }
    }

    /// POST one JSON-RPC message and hand the raw response back.
    async fn post<T: serde::Serialize>(&self, message: &T) -> AppResult<reqwest::Response> {
        let body = serde_json::to_vec(message)
            .map_err(|e| AppError::Mcp(format!("Failed to serialize message: {}", e)))?;

        let request = self
            .http
            .post(&self.url)
            .header(
                reqwest::header::ACCEPT,
                "application/json, text/event-stream",
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let request = self.apply_common_headers(request).await?;

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Mcp(format!("HTTP request failed: {}", e)))?;

        self.remember_session_id(&response).await;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AppError::Unauthorized(self.server_name.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Mcp(format!("HTTP {} error: {}", status, body)));
        }
        Ok(response)
    }

    /// POST a reply to a server-initiated request; the body is ignored.
    async fn post_reply(&self, response: &JsonRpcResponse) {
        if let Err(e) = self.post(response).await {
            tracing::warn!("Failed to POST reply to server request: {}", e);
        }
    }
}

pub struct HttpTransport {
    channel: Arc<HttpChannel>,

    state: Arc<EndpointState>,

    /// Per-request timeout.
    timeout: Duration,

    sse_task: RwLock<Option<JoinHandle<()>>>,
}

impl HttpTransport {
    /// Build the transport and open the server-initiated event stream.
    pub async fn connect(
        server_name: &str,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
        auth: Option<Arc<OAuthProvider>>,
    ) -> AppResult<Self> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| AppError::Config(format!("Invalid HTTP header name: {}", key)))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|_| AppError::Config(format!("Invalid HTTP header value for: {}", key)))?;
            header_map.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(header_map)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Mcp(format!("Failed to build HTTP client: {}", e)))?;

        let channel = Arc::new(HttpChannel {
            http,
            url: url.to_string(),
            server_name: server_name.to_string(),
            session_id: Mutex::new(None),
            auth,
        });
        let state = EndpointState::new();

        let task = tokio::spawn(run_event_stream(channel.clone(), state.clone()));

        Ok(Self {
            channel,
            state,
            timeout,
            sse_task: RwLock::new(Some(task)),
        })
    }

    /// POST one message and dispatch whatever the server sends back inline.
    async fn post_and_dispatch<T: serde::Serialize>(&self, message: &T) -> AppResult<()> {
        let response = self.channel.post(message).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(io::Error::other));
            let mut reader = tokio::io::BufReader::new(StreamReader::new(stream));
            pump_sse(&mut reader, &self.channel, &self.state).await?;
            return Ok(());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Mcp(format!("Failed to read HTTP body: {}", e)))?;
        if body.is_empty() {
            // 202 Accepted with no body (typical for notifications).
            return Ok(());
        }

        let message: JsonRpcMessage = serde_json::from_slice(&body)
            .map_err(|e| AppError::Mcp(format!("HTTP response is not valid JSON-RPC: {}", e)))?;
        dispatch_with_reply(&self.state, &self.channel, message);
        Ok(())
    }
}

fn dispatch_with_reply(
    state: &Arc<EndpointState>,
    channel: &Arc<HttpChannel>,
    message: JsonRpcMessage,
) {
    let channel = channel.clone();
    state.dispatch(message, move |response| {
        let channel = channel.clone();
        Box::pin(async move { channel.post_reply(&response).await })
    });
}

/// Read SSE events and dispatch every `data:` payload.
async fn pump_sse<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    channel: &Arc<HttpChannel>,
    state: &Arc<EndpointState>,
) -> AppResult<()> {
    let mut data = String::new();
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| AppError::Mcp(format!("SSE stream error: {}", e)))?;
        if n == 0 {
            // Flush a trailing event that was not terminated by a blank line.
            if !data.is_empty() {
                if let Ok(message) = serde_json::from_str::<JsonRpcMessage>(&data) {
                    dispatch_with_reply(state, channel, message);
                }
            }
            return Ok(());
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if !data.is_empty() {
                match serde_json::from_str::<JsonRpcMessage>(&data) {
                    Ok(message) => dispatch_with_reply(state, channel, message),
                    Err(e) => tracing::warn!("Ignoring non-JSON SSE event: {}", e),
                }
                data.clear();
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        }
    }
}

/// Long-lived GET stream for server-initiated requests and notifications.
async fn run_event_stream(channel: Arc<HttpChannel>, state: Arc<EndpointState>) {
    let request = channel
        .http
        .get(&channel.url)
        .header(reqwest::header::ACCEPT, "text/event-stream");
    let request = match channel.apply_common_headers(request).await {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("Skipping event stream for {}: {}", channel.server_name, e);
            return;
        }
    };

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(
                "Event stream connect failed for {}: {}",
                channel.server_name,
                e
            );
            return;
        }
    };

    if response.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED {
        // Server does not support a standalone stream; requests still work.
        tracing::debug!("Server {} has no GET event stream", channel.server_name);
        return;
    }
    if !response.status().is_success() {
        tracing::debug!(
            "Event stream for {} refused: {}",
            channel.server_name,
            response.status()
        );
        return;
    }

    channel.remember_session_id(&response).await;

    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(io::Error::other));
    let mut reader = tokio::io::BufReader::new(StreamReader::new(stream));
    if let Err(e) = pump_sse(&mut reader, &channel, &state).await {
        tracing::debug!("Event stream for {} ended: {}", channel.server_name, e);
    }
    tracing::debug!("Event stream for {} closed", channel.server_name);
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> AppResult<JsonRpcResponse> {
        if self.state.is_closed() {
            return Err(AppError::Mcp("Transport is closed".to_string()));
        }

        let id = self.state.next_request_id();
        let request = JsonRpcRequest::with_id(id, method.to_string(), params);
        let rx = self.state.register_pending(id);

        if let Err(e) = self.post_and_dispatch(&request).await {
            self.state.drop_pending(id);
            return Err(e);
        }

        let response = tokio::time::timeout(self.timeout, rx)
            .await
            .map_err(|_| {
                self.state.drop_pending(id);
                AppError::Mcp(format!(
                    "Request '{}' timed out after {}ms",
                    method,
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|_| AppError::Mcp(format!("Response channel closed for '{}'", method)))?;

        Ok(response)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> AppResult<()> {
        if self.state.is_closed() {
            return Err(AppError::Mcp("Transport is closed".to_string()));
        }
        let notification = JsonRpcNotification::new(method.to_string(), params);
        self.post_and_dispatch(&notification).await
    }

    fn set_inbound_handlers(&self, handlers: InboundHandlers) {
        self.state.set_handlers(handlers);
    }

    fn is_open(&self) -> bool {
        !self.state.is_closed()
    }

    async fn close(&self) -> AppResult<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        self.state.mark_closed();
        if let Some(task) = self.sse_task.write().take() {
            task.abort();
        }
        Ok(())
    }
}
