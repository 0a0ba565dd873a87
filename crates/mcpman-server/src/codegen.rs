//! Code-generation backends for the `code` meta-tool.
//!
//! Resolution order: the deterministic test stub (keyed by SHA-1 of the
//! function description), the downstream client's MCP sampling channel, and
//! finally a subordinate agent process whose only tool is `set_code`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use mcpman_mcp::protocol::{JsonRpcError, JsonRpcResponse, PROTOCOL_VERSION};
use mcpman_mcp::transport::{InboundHandlers, LineTransport, Transport};
use mcpman_types::{AppError, AppResult};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;

/// How long the subordinate agent gets to produce code.
const AGENT_TIMEOUT: Duration = Duration::from_secs(180);

pub enum Backend {
    /// `MCPMAN_TEST_LLM_RESPONSE_DIR`: read `response-<sha1>.txt` verbatim.
    Stub(PathBuf),

    /// Ask the downstream client over `sampling/createMessage`.
    Sampling(Arc<crate::downstream::DownstreamPeer>),

    /// Spawn an agent process served a one-tool MCP server on its stdio.
    Agent(String),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Stub(_) => "stub",
            Backend::Sampling(_) => "sampling",
            Backend::Agent(_) => "agent",
        }
    }

    pub async fn generate(&self, description: &str, prompt: &str) -> AppResult<String> {
        match self {
            Backend::Stub(dir) => stub_response(dir, description),
            Backend::Sampling(peer) => {
                let params = json!({
                    "messages": [{
                        "role": "user",
                        "content": { "type": "text", "text": prompt }
                    }],
                    "maxTokens": 4000,
                });
                let result = peer.create_message(params).await?;
                let text = result
                    .get("content")
                    .and_then(|c| c.get("text"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AppError::Mcp("Sampling response carried no text content".to_string())
                    })?;
                Ok(text.to_string())
            }
            Backend::Agent(command) => agent_generate(command, prompt).await,
        }
    }
}

/// Pick the backend for this call.
pub fn backend(engine: &crate::engine::Engine) -> Backend {
    if let Ok(dir) = std::env::var("MCPMAN_TEST_LLM_RESPONSE_DIR") {
        return Backend::Stub(PathBuf::from(dir));
    }
    if let Some(peer) = engine.peer() {
        if peer.supports_sampling() {
            return Backend::Sampling(peer);
        }
    }
    let command =
        std::env::var("MCPMAN_CODEGEN_AGENT").unwrap_or_else(|_| "claude".to_string());
    Backend::Agent(command)
}

pub fn sha1_hex(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Deterministic stub: the response file must exist, or the call fails hard
/// citing the expected path and hash.
pub fn stub_response(dir: &Path, description: &str) -> AppResult<String> {
    let hash = sha1_hex(description);
    let path = dir.join(format!("response-{}.txt", hash));
    std::fs::read_to_string(&path).map_err(|_| {
        AppError::Script(format!(
            "Code-generation stub is active (MCPMAN_TEST_LLM_RESPONSE_DIR) but {} does not exist \
             (sha1 of the function description: {})",
            path.display(),
            hash
        ))
    })
}

/// Strip a markdown fence when the model wrapped its answer in one.
pub fn extract_code(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.contains("```") {
        return trimmed.to_string();
    }

    let mut in_fence = false;
    let mut code_lines = Vec::new();
    for line in trimmed.lines() {
        if line.trim_start().starts_with("```") {
            if in_fence {
                break;
            }
            in_fence = true;
            continue;
        }
        if in_fence {
            code_lines.push(line);
        }
    }
    if code_lines.is_empty() {
        trimmed.to_string()
    } else {
        code_lines.join("\n").trim().to_string()
    }
}

pub fn build_prompt(
    description: &str,
    type_text: &str,
    tool_summary: &str,
    feedback: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Write a single JavaScript function expression (arrow or classic, taking zero or one \
         argument) for the mcpman eval tool. Tool calls return promises; await them.\n\n\
         Available tools:\n{}\n\
         These declarations describe the call signatures:\n\n{}\n\nTask: {}\n\n\
         If a set_code tool is available, call it exactly once with the code; otherwise respond \
         with only the function expression.",
        tool_summary, type_text, description
    );
    if let Some(errors) = feedback {
        prompt.push_str(&format!(
            "\n\nYour previous attempt failed validation:\n{}\nFix these problems and submit \
             the corrected function expression.",
            errors
        ));
    }
    prompt
}

/// Spawn the agent, serve it a one-tool MCP server over its stdio, and wait
/// for the `set_code` call.
async fn agent_generate(command: &str, prompt: &str) -> AppResult<String> {
    tracing::info!("Spawning codegen agent: {}", command);

    let mut child = Command::new(command)
        .arg(prompt)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            AppError::Script(format!("Failed to spawn codegen agent '{}': {}", command, e))
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Script("Failed to capture agent stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Script("Failed to capture agent stdout".to_string()))?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "codegen_agent", "{}", line);
            }
        });
    }

    let transport = LineTransport::start(stdout, stdin, AGENT_TIMEOUT);
    transport.attach_child(child);

    let (tx, rx) = oneshot::channel::<String>();
    let tx = Arc::new(parking_lot::Mutex::new(Some(tx)));

    transport.set_inbound_handlers(InboundHandlers {
        on_request: Some(Arc::new(move |request| {
            let tx = tx.clone();
            Box::pin(async move {
                let id = request.id.clone().unwrap_or(Value::Null);
                match request.method.as_str() {
                    "initialize" => JsonRpcResponse::success(
                        id,
                        json!({
                            "protocolVersion": PROTOCOL_VERSION,
                            "capabilities": { "tools": {} },
                            "serverInfo": { "name": "mcpman-codegen", "version": "1.0.0" },
                        }),
                    ),
                    "tools/list" => JsonRpcResponse::success(
                        id,
                        json!({
                            "tools": [{
                                "name": "set_code",
                                "description": "Submit the generated function expression",
                                "inputSchema": {
                                    "type": "object",
                                    "properties": {"code": {"type": "string"}},
                                    "required": ["code"]
                                }
                            }]
                        }),
                    ),
                    "tools/call" => {
                        let code = request
                            .params
                            .as_ref()
                            .and_then(|p| p.get("arguments"))
                            .and_then(|a| a.get("code"))
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        if let Some(tx) = tx.lock().take() {
                            let _ = tx.send(code);
                        }
                        JsonRpcResponse::success(
                            id,
                            json!({ "content": [{"type": "text", "text": "Code received"}] }),
                        )
                    }
                    "ping" => JsonRpcResponse::success(id, json!({})),
                    other => {
                        JsonRpcResponse::error(id, JsonRpcError::method_not_found(other))
                    }
                }
            })
        })),
        on_notification: None,
    });

    let code = tokio::time::timeout(AGENT_TIMEOUT, rx)
        .await
        .map_err(|_| {
            AppError::Script(format!(
                "Codegen agent '{}' did not call set_code within {}s",
                command,
                AGENT_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|_| {
            AppError::Script("Codegen agent exited before calling set_code".to_string())
        })?;

    let _ = transport.close().await;
    Ok(code)
}
