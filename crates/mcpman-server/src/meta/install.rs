//! The `install` meta-tool: add an upstream server at runtime.

use std::collections::HashMap;

use mcpman_config::{validate_server_name, ServerConfig, DEFAULT_TIMEOUT_MS};
use serde::Deserialize;
use serde_json::Value;

use super::HandlerResult;
use crate::engine::Engine;

#[derive(Debug, Deserialize)]
struct InstallParams {
    name: String,

    transport: String,

    #[serde(default)]
    command: Option<String>,

    #[serde(default)]
    args: Vec<String>,

    #[serde(default)]
    url: Option<String>,

    #[serde(default)]
    env: HashMap<String, String>,

    #[serde(default)]
    headers: HashMap<String, String>,

    #[serde(default)]
    disabled: bool,
}

fn build_config(params: &InstallParams) -> Result<ServerConfig, String> {
    match params.transport.as_str() {
        "stdio" => {
            let command = params
                .command
                .clone()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| "stdio transport requires 'command'".to_string())?;
            Ok(ServerConfig::Stdio {
                command,
                args: params.args.clone(),
                env: params.env.clone(),
                disabled: params.disabled,
                timeout_ms: DEFAULT_TIMEOUT_MS,
            })
        }
        "http" => {
            let url = params
                .url
                .clone()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| "http transport requires 'url'".to_string())?;
            Ok(ServerConfig::Http {
                url,
                headers: params.headers.clone(),
                disabled: params.disabled,
                timeout_ms: DEFAULT_TIMEOUT_MS,
                oauth: None,
            })
        }
        other => Err(format!(
            "Unknown transport '{}': expected 'stdio' or 'http'",
            other
        )),
    }
}

pub async fn handle(engine: &Engine, args: Value) -> HandlerResult {
    let params: InstallParams = match serde_json::from_value(args) {
        Ok(params) => params,
        Err(e) => return HandlerResult::err(format!("Invalid arguments: {}", e)),
    };

    let (fleet, config) = match (&engine.fleet, &engine.config) {
        (Some(fleet), Some(config)) => (fleet.clone(), config.clone()),
        _ => return HandlerResult::err("install is not available: no config store attached"),
    };

    if let Err(e) = validate_server_name(&params.name) {
        return HandlerResult::err(e.to_string());
    }
    if config.has_server(&params.name) {
        return HandlerResult::err(format!(
            "Server '{}' already exists; choose a different name",
            params.name
        ));
    }

    let server_config = match build_config(&params) {
        Ok(config) => config,
        Err(message) => return HandlerResult::err(message),
    };
    let transport = server_config.transport_name();

    let connect_result = fleet.add_server(&params.name, server_config).await;

    if params.disabled {
        return HandlerResult::ok(format!(
            "Installed server '{}' ({} transport), disabled; enable it in the config to connect.",
            params.name, transport
        ));
    }

    match connect_result {
        Ok(()) => {
            let tools = engine
                .upstreams
                .list_tools(&params.name)
                .await
                .map(|tools| tools.len())
                .unwrap_or(0);
            HandlerResult::ok(format!(
                "Installed server '{}' ({} transport).\nStatus: connected, {} tool(s) available.",
                params.name, transport, tools
            ))
        }
        Err(e) => HandlerResult::err(format!(
            "Installed server '{}' ({} transport), but the connection failed: {}\nThe server stays configured; fix the issue and restart or reinstall.",
            params.name, transport, e
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::meta::testutil::StubUpstreams;
    use mcpman_config::ConfigStore;
    use mcpman_mcp::{Fleet, MemoryTokenStore};
    use serde_json::json;
    use std::sync::Arc;

    fn engine_with_fleet() -> (Arc<Engine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::load_from_path(dir.path().join("config.json")).unwrap();
        let fleet = Fleet::new(config.clone(), MemoryTokenStore::new(), Arc::new(|_| {}));
        let engine = Engine::new(StubUpstreams::new(), Some(fleet), Some(config));
        engine.gate.open();
        (engine, dir)
    }

    #[tokio::test]
    async fn test_install_rejects_invalid_names() {
        let (engine, _dir) = engine_with_fleet();
        let result = handle(
            &engine,
            json!({"name": "bad name!", "transport": "stdio", "command": "true"}),
        )
        .await;
        assert!(result.is_error);
        assert!(result.parts[0].contains("Invalid server name"));
    }

    #[tokio::test]
    async fn test_install_requires_transport_fields() {
        let (engine, _dir) = engine_with_fleet();

        let result = handle(&engine, json!({"name": "a", "transport": "stdio"})).await;
        assert!(result.is_error);
        assert!(result.parts[0].contains("requires 'command'"));

        let result = handle(&engine, json!({"name": "a", "transport": "http"})).await;
        assert!(result.is_error);
        assert!(result.parts[0].contains("requires 'url'"));

        let result = handle(&engine, json!({"name": "a", "transport": "carrier-pigeon"})).await;
        assert!(result.is_error);
        assert!(result.parts[0].contains("Unknown transport"));
    }

    #[tokio::test]
    async fn test_install_disabled_server_persists_without_connecting() {
        let (engine, _dir) = engine_with_fleet();
        let result = handle(
            &engine,
            json!({
                "name": "later",
                "transport": "stdio",
                "command": "definitely-not-a-real-binary-mcpman",
                "disabled": true
            }),
        )
        .await;

        assert!(!result.is_error, "{:?}", result.parts);
        assert!(result.parts[0].contains("disabled"));
        assert!(engine.config.as_ref().unwrap().has_server("later"));
    }

    #[tokio::test]
    async fn test_install_reports_connection_failure_but_persists() {
        let (engine, _dir) = engine_with_fleet();
        let result = handle(
            &engine,
            json!({
                "name": "ghost",
                "transport": "stdio",
                "command": "definitely-not-a-real-binary-mcpman"
            }),
        )
        .await;

        assert!(result.is_error);
        assert!(result.parts[0].contains("connection failed"));
        assert!(engine.config.as_ref().unwrap().has_server("ghost"));
    }

    #[tokio::test]
    async fn test_install_collision_is_rejected_before_persisting() {
        let (engine, _dir) = engine_with_fleet();
        let first = handle(
            &engine,
            json!({
                "name": "dup",
                "transport": "stdio",
                "command": "definitely-not-a-real-binary-mcpman",
                "disabled": true
            }),
        )
        .await;
        assert!(!first.is_error);

        let second = handle(
            &engine,
            json!({"name": "dup", "transport": "http", "url": "http://localhost:1/mcp"}),
        )
        .await;
        assert!(second.is_error);
        assert!(second.parts[0].contains("already exists"));
    }
}
