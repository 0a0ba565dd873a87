//! STDIO transport: spawn a subprocess and speak JSON-RPC over its pipes.
//!
//! This is the most common transport type for MCP servers.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use mcpman_types::{AppError, AppResult};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::LineTransport;

/// Spawn an MCP server process and wrap its stdio in a transport.
///
/// The child environment is the current process environment with `env`
/// merged over it.
pub async fn spawn_stdio(
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
    timeout: Duration,
) -> AppResult<Arc<LineTransport>> {
    tracing::info!("Spawning MCP STDIO process: {} {:?}", command, args);

    let mut child = Command::new(command)
        .args(args)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::Mcp(format!("Failed to spawn MCP process '{}': {}", command, e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Mcp("Failed to capture stdin of MCP process".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Mcp("Failed to capture stdout of MCP process".to_string()))?;

    // Forward child stderr into our logs so upstream diagnostics are visible.
    if let Some(stderr) = child.stderr.take() {
        let name = command.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "upstream_stderr", "[{}] {}", name, line);
            }
        });
    }

    let transport = LineTransport::start(stdout, stdin, timeout);
    transport.attach_child(child);

    tracing::info!("MCP STDIO process spawned successfully");
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    #[tokio::test]
    async fn test_spawn_failure_is_an_mcp_error() {
        let result = spawn_stdio(
            "definitely-not-a-real-binary-mcpman",
            &[],
            &HashMap::new(),
            Duration::from_secs(1),
        )
        .await;

        let err = result.err().expect("spawn should fail");
        assert!(err.to_string().contains("Failed to spawn"));
    }

    #[tokio::test]
    async fn test_close_kills_child_and_is_idempotent() {
        // `cat` reads stdin forever, so it stays alive until killed.
        let transport = match spawn_stdio("cat", &[], &HashMap::new(), Duration::from_secs(1)).await
        {
            Ok(t) => t,
            Err(_) => return, // environment without `cat`
        };

        assert!(transport.is_open());
        transport.close().await.unwrap();
        assert!(!transport.is_open());
        transport.close().await.unwrap();
    }
}
