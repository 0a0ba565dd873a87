//! Transports for upstream MCP connections.
//!
//! Every transport moves line-delimited JSON-RPC 2.0 messages and supports
//! bidirectional traffic: outgoing requests/notifications, and incoming
//! server-initiated requests (upstreams ask for `roots/list`) and
//! notifications.

mod http;
mod line;
mod memory;
mod stdio;

pub use http::HttpTransport;
pub use line::LineTransport;
pub use memory::memory_pair;
pub use stdio::spawn_stdio;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use mcpman_types::{AppError, AppResult};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::protocol::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

/// Handler for server-initiated requests. The returned response is written
/// back on the same transport.
pub type RequestHandler =
    Arc<dyn Fn(JsonRpcRequest) -> BoxFuture<'static, JsonRpcResponse> + Send + Sync>;

/// Handler for server-initiated notifications.
pub type NotificationHandler = Arc<dyn Fn(JsonRpcNotification) + Send + Sync>;

#[derive(Clone, Default)]
pub struct InboundHandlers {
    pub on_request: Option<RequestHandler>,
    pub on_notification: Option<NotificationHandler>,
}

/// A connected transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and await its response (with the per-server timeout).
    async fn request(&self, method: &str, params: Option<Value>) -> AppResult<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> AppResult<()>;

    /// Install handlers for server-initiated traffic.
    fn set_inbound_handlers(&self, handlers: InboundHandlers);

    /// Whether the transport is still usable.
    fn is_open(&self) -> bool;

    /// Tear the connection down. Idempotent.
    async fn close(&self) -> AppResult<()>;
}

/// Normalize a response ID for pending-map lookup.
///
/// Handles the case where a server returns `id: null` by converting to a
/// special key; other values get a string representation.
pub(crate) fn normalize_response_id(id: &Value) -> String {
    match id {
        Value::Null => "__null_id__".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s),
        _ => id.to_string(),
    }
}

/// Correlation state shared by every transport implementation.
pub(crate) struct EndpointState {
    /// Pending requests waiting for responses, keyed by normalized id.
    pending: RwLock<HashMap<String, oneshot::Sender<JsonRpcResponse>>>,

    next_id: AtomicU64,

    handlers: RwLock<InboundHandlers>,

    closed: AtomicBool,
}

impl EndpointState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(InboundHandlers::default()),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut pending = self.pending.write();
        for (id, _sender) in pending.drain() {
            tracing::debug!("Request {} terminated without response", id);
        }
    }

    pub(crate) fn set_handlers(&self, handlers: InboundHandlers) {
        *self.handlers.write() = handlers;
    }

    pub(crate) fn register_pending(&self, id: u64) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.write().insert(id.to_string(), tx);
        rx
    }

    pub(crate) fn drop_pending(&self, id: u64) {
        self.pending.write().remove(&id.to_string());
    }

    /// Route one parsed message. Server-initiated requests are answered via
    /// `reply`, which the calling transport supplies with its write path.
    pub(crate) fn dispatch<F>(self: &Arc<Self>, message: JsonRpcMessage, reply: F)
    where
        F: Fn(JsonRpcResponse) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        match message {
            JsonRpcMessage::Response(response) => {
                let key = normalize_response_id(&response.id);
                if let Some(sender) = self.pending.write().remove(&key) {
                    if sender.send(response).is_err() {
                        tracing::warn!("Response receiver dropped for request {}", key);
                    }
                } else {
                    tracing::warn!("Received response for unknown request ID: {}", key);
                }
            }
            JsonRpcMessage::Request(request) => {
                let handler = self.handlers.read().on_request.clone();
                let id = request.id.clone().unwrap_or(Value::Null);
                let method = request.method.clone();
                tokio::spawn(async move {
                    let response = match handler {
                        Some(handler) => handler(request).await,
                        None => JsonRpcResponse::error(id, JsonRpcError::method_not_found(method)),
                    };
                    reply(response).await;
                });
            }
            JsonRpcMessage::Notification(notification) => {
                tracing::debug!("Received notification: {}", notification.method);
                if let Some(callback) = self.handlers.read().on_notification.clone() {
                    callback(notification);
                }
            }
        }
    }
}

/// Serialize a message to a single JSON line.
pub(crate) fn to_line<T: serde::Serialize>(message: &T) -> AppResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)
        .map_err(|e| AppError::Mcp(format!("Failed to serialize message: {}", e)))?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_response_id() {
        assert_eq!(normalize_response_id(&Value::Null), "__null_id__");
        assert_eq!(normalize_response_id(&json!(42)), "42");
        assert_eq!(normalize_response_id(&json!("abc")), "\"abc\"");
    }

    #[test]
    fn test_request_ids_are_unique() {
        let state = EndpointState::new();
        let a = state.next_request_id();
        let b = state.next_request_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_dispatch_routes_response_to_pending() {
        let state = EndpointState::new();
        let rx = state.register_pending(7);

        let response = JsonRpcResponse::success(json!(7), json!({"ok": true}));
        state.dispatch(JsonRpcMessage::Response(response), |_| {
            Box::pin(async {})
        });

        let got = rx.await.unwrap();
        assert_eq!(got.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn test_dispatch_answers_requests_without_handler() {
        let state = EndpointState::new();
        let (tx, rx) = oneshot::channel::<JsonRpcResponse>();
        let tx = std::sync::Mutex::new(Some(tx));

        let request = JsonRpcRequest::with_id(1, "roots/list".to_string(), None);
        state.dispatch(JsonRpcMessage::Request(request), move |resp| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(resp);
            }
            Box::pin(async {})
        });

        let response = rx.await.unwrap();
        assert_eq!(response.error.unwrap().code, crate::protocol::METHOD_NOT_FOUND);
    }
}
