//! Persistent script runtime.
//!
//! The sandbox is a lazily-spawned node child running an embedded bootstrap
//! (one `vm` context that lives for the child's lifetime), reached over
//! line-delimited JSON-RPC on its stdio — the same transport machinery used
//! for upstream stdio servers. Tool proxies inside the sandbox call back into
//! the host, which routes them to the fleet.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcpman_mcp::protocol::{JsonRpcError, JsonRpcResponse};
use mcpman_mcp::transport::{InboundHandlers, LineTransport, Transport};
use mcpman_types::{AppError, AppResult};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// The sandbox bootstrap, embedded in the binary.
const BOOTSTRAP: &str = include_str!("bootstrap.js");

/// Wall-clock budget for one eval call.
pub const EVAL_TIMEOUT_MS: u64 = 30_000;

/// Transport-level budget; must exceed the eval budget so the child's own
/// timeout error wins the race.
const TRANSPORT_TIMEOUT_MS: u64 = 40_000;

/// What the host offers the sandbox: tool calls and help lookups.
#[async_trait]
pub trait SandboxHost: Send + Sync {
    /// Call an upstream tool; returns the MCP content array as JSON.
    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> AppResult<Value>;

    /// Help payload for a server (or one tool).
    async fn help(&self, server: &str, tool: Option<&str>) -> AppResult<Value>;
}

/// Result of one eval call: the script's value and its captured console.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub result: Value,
    pub output: String,
}

pub struct ScriptRuntime {
    host: Arc<dyn SandboxHost>,

    node_command: String,

    /// Live sandbox process, if one has been started.
    process: tokio::sync::Mutex<Option<Arc<LineTransport>>>,

    /// Authoritative `$results` mirror. Indices are handed out synchronously
    /// under this lock and replayed into the child in order.
    results: Mutex<Vec<Value>>,
}

impl ScriptRuntime {
    pub fn new(host: Arc<dyn SandboxHost>) -> Arc<Self> {
        let node_command =
            std::env::var("MCPMAN_NODE").unwrap_or_else(|_| "node".to_string());
        Arc::new(Self {
            host,
            node_command,
            process: tokio::sync::Mutex::new(None),
            results: Mutex::new(Vec::new()),
        })
    }

    /// Evaluate a function expression with an optional argument.
    ///
    /// `globals` is the current proxy snapshot (servers, tools, bindings);
    /// the sandbox refreshes its bindings when it changes, while user state
    /// in the context persists across calls.
    pub async fn eval(
        &self,
        code: &str,
        arg: Option<Value>,
        globals: Value,
    ) -> AppResult<EvalOutcome> {
        let transport = self.ensure_started().await?;

        let params = json!({
            "code": code,
            "arg": arg,
            "globals": globals,
            "timeoutMs": EVAL_TIMEOUT_MS,
        });

        let response = transport.request("sandbox/eval", Some(params)).await?;
        self.eval_outcome(response)
    }

    fn eval_outcome(&self, response: JsonRpcResponse) -> AppResult<EvalOutcome> {
        if let Some(error) = response.error {
            let stack = error
                .data
                .as_ref()
                .and_then(|d| d.get("stack"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty());
            let message = match stack {
                Some(stack) => format!("{}\n{}", error.message, stack),
                None => error.message,
            };
            return Err(AppError::Script(message));
        }

        let result = response
            .result
            .ok_or_else(|| AppError::Script("Sandbox returned an empty response".to_string()))?;

        Ok(EvalOutcome {
            result: result.get("result").cloned().unwrap_or(Value::Null),
            output: result
                .get("output")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        })
    }

    /// Append a value to `$results` and return its index.
    ///
    /// The index is allocated synchronously under the mirror lock, so no two
    /// callers ever observe the same index; the child array is updated in
    /// write order behind it.
    pub async fn append_result(&self, value: Value) -> usize {
        let index = {
            let mut results = self.results.lock();
            results.push(value.clone());
            results.len() - 1
        };

        let process = self.process.lock().await;
        if let Some(transport) = process.as_ref() {
            if let Err(e) = transport
                .notify("results/append", Some(json!({ "index": index, "value": value })))
                .await
            {
                tracing::warn!("Failed to replay $results[{}] into sandbox: {}", index, e);
            }
        }
        index
    }

    /// Read back a stored result (untruncated).
    pub fn result(&self, index: usize) -> Option<Value> {
        self.results.lock().get(index).cloned()
    }

    pub fn results_len(&self) -> usize {
        self.results.lock().len()
    }

    async fn ensure_started(&self) -> AppResult<Arc<LineTransport>> {
        let mut guard = self.process.lock().await;

        if let Some(transport) = guard.as_ref() {
            if transport.is_open() {
                return Ok(transport.clone());
            }
            tracing::warn!("Sandbox process died; restarting");
            *guard = None;
        }

        tracing::info!("Starting script sandbox ({})", self.node_command);

        let mut child = Command::new(&self.node_command)
            .arg("-e")
            .arg(BOOTSTRAP)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::Script(format!(
                    "Failed to start sandbox runtime '{}': {} (node is required for eval/code)",
                    self.node_command, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Script("Failed to capture sandbox stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Script("Failed to capture sandbox stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "sandbox", "{}", line);
                }
            });
        }

        let transport =
            LineTransport::start(stdout, stdin, Duration::from_millis(TRANSPORT_TIMEOUT_MS));
        transport.attach_child(child);

        let host = self.host.clone();
        transport.set_inbound_handlers(InboundHandlers {
            on_request: Some(Arc::new(move |request| {
                let host = host.clone();
                Box::pin(async move {
                    let id = request.id.clone().unwrap_or(Value::Null);
                    let params = request.params.unwrap_or(Value::Null);
                    let result = match request.method.as_str() {
                        "host/callTool" => {
                            let server = params["server"].as_str().unwrap_or_default().to_string();
                            let tool = params["tool"].as_str().unwrap_or_default().to_string();
                            let args = params.get("args").cloned().unwrap_or(json!({}));
                            host.call_tool(&server, &tool, args).await
                        }
                        "host/help" => {
                            let server = params["server"].as_str().unwrap_or_default().to_string();
                            let tool = params["tool"].as_str().map(str::to_string);
                            host.help(&server, tool.as_deref()).await
                        }
                        other => Err(AppError::Script(format!("Unknown host call: {}", other))),
                    };
                    match result {
                        Ok(value) => JsonRpcResponse::success(id, value),
                        Err(e) => JsonRpcResponse::error(
                            id,
                            JsonRpcError::new(-32000, e.to_string(), None),
                        ),
                    }
                })
            })),
            on_notification: None,
        });

        // Seed the persistent context, replaying any results appended before
        // first use.
        let seed = self.results.lock().clone();
        let response = transport
            .request("sandbox/init", Some(json!({ "results": seed })))
            .await?;
        if let Some(error) = response.error {
            let _ = transport.close().await;
            return Err(AppError::Script(format!(
                "Sandbox initialization failed: {}",
                error.message
            )));
        }

        *guard = Some(transport.clone());
        Ok(transport)
    }

    /// Kill the sandbox process. Idempotent; a later eval restarts it.
    pub async fn close(&self) {
        let mut guard = self.process.lock().await;
        if let Some(transport) = guard.take() {
            if let Err(e) = transport.close().await {
                tracing::warn!("Error closing sandbox: {}", e);
            }
        }
    }
}
