//! Line-delimited JSON-RPC transport over any async byte stream.
//!
//! The stdio transport wraps this around a child process; tests wrap it
//! around an in-memory duplex pipe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcpman_types::{AppError, AppResult};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{to_line, EndpointState, InboundHandlers, Transport};
use crate::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Transport over a byte stream carrying one JSON-RPC message per line.
pub struct LineTransport {
    writer: SharedWriter,

    state: Arc<EndpointState>,

    /// Background reader task handle (for cancellation).
    reader_task: RwLock<Option<JoinHandle<()>>>,

    /// Owned child process, when this transport wraps one.
    child: RwLock<Option<Child>>,

    /// Per-request timeout.
    timeout: Duration,
}

impl LineTransport {
    /// Build a transport over a read/write pair and start the reader task.
    pub fn start<R, W>(reader: R, writer: W, timeout: Duration) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));
        let state = EndpointState::new();

        let transport = Arc::new(Self {
            writer: writer.clone(),
            state: state.clone(),
            reader_task: RwLock::new(None),
            child: RwLock::new(None),
            timeout,
        });

        let task = Self::start_reader(reader, state, writer);
        *transport.reader_task.write() = Some(task);
        transport
    }

    /// Hand ownership of a child process to this transport; it is killed when
    /// the transport closes.
    pub fn attach_child(&self, child: Child) {
        *self.child.write() = Some(child);
    }

    fn start_reader<R>(reader: R, state: Arc<EndpointState>, writer: SharedWriter) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = String::new();

            loop {
                line.clear();

                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        tracing::debug!("Transport stream closed (EOF)");
                        state.mark_closed();
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                            Ok(message) => {
                                let writer = writer.clone();
                                state.dispatch(message, move |response| {
                                    let writer = writer.clone();
                                    Box::pin(async move {
                                        if let Ok(bytes) = to_line(&response) {
                                            let mut guard = writer.lock().await;
                                            if let Err(e) = guard.write_all(&bytes).await {
                                                tracing::warn!(
                                                    "Failed to write inbound-request reply: {}",
                                                    e
                                                );
                                            }
                                            let _ = guard.flush().await;
                                        }
                                    })
                                });
                            }
                            Err(e) => {
                                tracing::error!(
                                    "Failed to parse JSON-RPC message: {}\nLine: {}",
                                    e,
                                    trimmed
                                );
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error reading from transport stream: {}", e);
                        state.mark_closed();
                        break;
                    }
                }
            }
        })
    }

    async fn write_line(&self, bytes: Vec<u8>) -> AppResult<()> {
        let mut guard = self.writer.lock().await;
        guard
            .write_all(&bytes)
            .await
            .map_err(|e| AppError::Mcp(format!("Failed to write message: {}", e)))?;
        guard
            .flush()
            .await
            .map_err(|e| AppError::Mcp(format!("Failed to flush message: {}", e)))
    }
}

#[async_trait]
impl Transport for LineTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> AppResult<JsonRpcResponse> {
        if self.state.is_closed() {
            return Err(AppError::Mcp("Transport is closed".to_string()));
        }

        let id = self.state.next_request_id();
        let request = JsonRpcRequest::with_id(id, method.to_string(), params);
        let rx = self.state.register_pending(id);

        let bytes = match to_line(&request) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.state.drop_pending(id);
                return Err(e);
            }
        };
        if let Err(e) = self.write_line(bytes).await {
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
        self.write_line(to_line(&notification)?).await
    }

    fn set_inbound_handlers(&self, handlers: InboundHandlers) {
        self.state.set_handlers(handlers);
    }

    fn is_open(&self) -> bool {
        !self.state.is_closed()
    }

    async fn close(&self) -> AppResult<()> {
        if self.state.is_closed() {
            // Already closed; keep idempotent.
            return Ok(());
        }
        self.state.mark_closed();

        if let Some(task) = self.reader_task.write().take() {
            task.abort();
        }

        let child = self.child.write().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill child process: {}", e);
            }
        }

        let mut guard = self.writer.lock().await;
        let _ = guard.shutdown().await;
        Ok(())
    }
}
