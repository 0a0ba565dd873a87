//! End-to-end scenarios against a real fleet with an in-memory upstream.
//!
//! The fake upstream serves a single `filesystem` server whose
//! `list_directory` tool answers `{"path": "."}` with the entries "a" and
//! "b" as two text content parts. Scenarios that execute scripts skip when
//! `node` is not on PATH.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mcpman_config::{ConfigStore, ServerConfig, Settings};
use mcpman_mcp::protocol::{JsonRpcMessage, JsonRpcResponse};
use mcpman_mcp::transport::memory_pair;
use mcpman_mcp::{Fleet, MemoryTokenStore, UpstreamSession};
use mcpman_server::{meta, Engine};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn node_available() -> bool {
    std::process::Command::new("node")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Scripted `filesystem` upstream over a duplex stream.
async fn run_filesystem_upstream(stream: tokio::io::DuplexStream) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let message: JsonRpcMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(_) => continue,
        };
        let request = match message {
            JsonRpcMessage::Request(request) => request,
            _ => continue,
        };
        let id = match request.id.clone() {
            Some(id) => id,
            None => continue,
        };

        let result = match request.method.as_str() {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "filesystem-stub", "version": "0.1.0"}
            }),
            "tools/list" => json!({
                "tools": [{
                    "name": "list_directory",
                    "description": "List directory entries",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"path": {"type": "string"}},
                        "required": ["path"]
                    }
                }]
            }),
            "tools/call" => {
                let path = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("arguments"))
                    .and_then(|a| a.get("path"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if path == "." {
                    json!({"content": [
                        {"type": "text", "text": "a"},
                        {"type": "text", "text": "b"}
                    ]})
                } else {
                    json!({"content": [], "isError": false})
                }
            }
            _ => json!({}),
        };

        let response = serde_json::to_string(&JsonRpcResponse::success(id, result)).unwrap();
        if write
            .write_all(format!("{}\n", response).as_bytes())
            .await
            .is_err()
        {
            break;
        }
    }
}

async fn engine_with_filesystem() -> (Arc<Engine>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();

    let mut settings = Settings::default();
    settings.servers.insert(
        "filesystem".to_string(),
        ServerConfig::Stdio {
            command: "stub".to_string(),
            args: vec![],
            env: HashMap::new(),
            disabled: false,
            timeout_ms: 5000,
        },
    );
    let config = ConfigStore::from_settings(settings, dir.path().join("config.json"));
    let fleet = Fleet::new(config.clone(), MemoryTokenStore::new(), Arc::new(|_| {}));

    let (transport, upstream) = memory_pair(Duration::from_secs(5));
    tokio::spawn(run_filesystem_upstream(upstream));

    let session = UpstreamSession::from_transport(
        "filesystem",
        ServerConfig::Stdio {
            command: "stub".to_string(),
            args: vec![],
            env: HashMap::new(),
            disabled: false,
            timeout_ms: 5000,
        },
        transport,
        fleet.roots_fn(),
        false,
    )
    .await
    .unwrap();
    fleet.insert_session(session);

    let engine = Engine::new(fleet.clone(), Some(fleet), Some(config));
    engine.gate.open();
    (engine, dir)
}

async fn call(engine: &Arc<Engine>, tool: &str, args: Value) -> meta::HandlerResult {
    meta::dispatch(engine, tool, args)
        .await
        .expect("known meta-tool")
}

#[tokio::test]
async fn scenario_persistence_across_eval_calls() {
    if !node_available() {
        eprintln!("skipping: node not on PATH");
        return;
    }
    let (engine, _dir) = engine_with_filesystem().await;

    let a = call(
        &engine,
        "eval",
        json!({"code": "() => { globalThis.x = 42; return x; }"}),
    )
    .await;
    assert!(!a.is_error, "{:?}", a.parts);
    assert!(a.parts[0].starts_with("$results[0] = // eval"));
    assert!(a.parts[0].ends_with("42"));

    let b = call(&engine, "eval", json!({"code": "() => x + 8"})).await;
    assert!(!b.is_error, "{:?}", b.parts);
    assert_eq!(b.parts[0], "$results[1] = // eval\n50");

    engine.runtime.close().await;
}

#[tokio::test]
async fn scenario_argument_passing() {
    if !node_available() {
        eprintln!("skipping: node not on PATH");
        return;
    }
    let (engine, _dir) = engine_with_filesystem().await;

    let result = call(
        &engine,
        "eval",
        json!({"code": "(a) => a.value * 2", "arg": {"value": 21}}),
    )
    .await;
    assert!(!result.is_error, "{:?}", result.parts);
    assert!(result.parts[0].contains("42"));

    engine.runtime.close().await;
}

#[tokio::test]
async fn scenario_tool_call_via_proxy() {
    if !node_available() {
        eprintln!("skipping: node not on PATH");
        return;
    }
    let (engine, _dir) = engine_with_filesystem().await;

    let result = call(
        &engine,
        "eval",
        json!({"code": "async () => { const r = await filesystem.list_directory({path:'.'}); return r.length; }"}),
    )
    .await;
    assert!(!result.is_error, "{:?}", result.parts);
    assert!(result.parts[0].contains('2'));

    // The camelCase alias hits the same tool.
    let result = call(
        &engine,
        "eval",
        json!({"code": "async () => (await filesystem.listDirectory({path:'.'})).length"}),
    )
    .await;
    assert!(!result.is_error, "{:?}", result.parts);
    assert!(result.parts[0].contains('2'));

    engine.runtime.close().await;
}

#[tokio::test]
async fn scenario_sequential_invoke_stops_on_error() {
    let (engine, _dir) = engine_with_filesystem().await;

    let result = call(
        &engine,
        "invoke",
        json!({
            "calls": [
                {"server": "filesystem", "tool": "list_directory", "parameters": {"path": "."}},
                {"server": "nope", "tool": "x"}
            ],
            "parallel": false
        }),
    )
    .await;

    assert_eq!(result.parts.len(), 2);
    assert!(result.parts[0].starts_with("$results[0]"));
    assert!(result.parts[1].contains("Server 'nope' not found"));
    assert_eq!(engine.runtime.results_len(), 1);
}

#[tokio::test]
async fn scenario_parallel_invoke_returns_all() {
    let (engine, _dir) = engine_with_filesystem().await;

    let result = call(
        &engine,
        "invoke",
        json!({
            "calls": [
                {"server": "filesystem", "tool": "list_directory", "parameters": {"path": "."}},
                {"server": "nope", "tool": "x"}
            ],
            "parallel": true
        }),
    )
    .await;

    assert_eq!(result.parts.len(), 2);
    assert!(result.parts[0].contains("// invoke filesystem.list_directory"));
    assert!(result.parts[1].contains("Server 'nope' not found"));
    // Exactly one success reached the results log.
    assert_eq!(engine.runtime.results_len(), 1);
}

#[tokio::test]
async fn scenario_empty_invoke_makes_no_calls() {
    let (engine, _dir) = engine_with_filesystem().await;
    let result = call(&engine, "invoke", json!({"calls": []})).await;
    assert!(result.parts.is_empty());
    assert!(!result.is_error);
    assert_eq!(engine.runtime.results_len(), 0);
}

#[tokio::test]
async fn scenario_type_validation_rejects_nonsense() {
    let (engine, _dir) = engine_with_filesystem().await;

    let result = call(
        &engine,
        "eval",
        json!({"code": "async () => { const x: number = 'str'; return x; }"}),
    )
    .await;

    assert!(result.is_error);
    let text = &result.parts[0];
    // Line L, Column C: ... and the offending type name.
    assert!(text.contains("Line 1, Column "));
    assert!(text.contains("string"));
    assert_eq!(engine.runtime.results_len(), 0);
}

#[tokio::test]
async fn scenario_help_and_list_servers() {
    let (engine, _dir) = engine_with_filesystem().await;

    let help = call(&engine, "help", json!({"server": "filesystem"})).await;
    assert!(!help.is_error);
    assert!(help.parts[0].contains("interface FilesystemListDirectoryInput"));
    assert!(help.parts[0].contains("listDirectory(input: FilesystemListDirectoryInput)"));

    let listed = call(&engine, "list_servers", json!({})).await;
    assert!(!listed.is_error);
    let report: Value = serde_json::from_str(&listed.parts[0]).unwrap();
    assert_eq!(report["filesystem"]["connected"], true);
    assert_eq!(report["filesystem"]["tools"][0], "list_directory");
}

#[tokio::test]
async fn scenario_truncated_result_is_recoverable_by_index() {
    if !node_available() {
        eprintln!("skipping: node not on PATH");
        return;
    }
    let (engine, _dir) = engine_with_filesystem().await;

    let result = call(
        &engine,
        "eval",
        json!({"code": "() => 'y'.repeat(2000)"}),
    )
    .await;
    assert!(!result.is_error, "{:?}", result.parts);
    assert!(result.parts[0].contains("see $results[0] for full result"));

    // The stored value is untruncated and visible to a later eval.
    let length = call(&engine, "eval", json!({"code": "() => $results[0].length"})).await;
    assert!(!length.is_error, "{:?}", length.parts);
    assert!(length.parts[0].ends_with("2000"));

    engine.runtime.close().await;
}
