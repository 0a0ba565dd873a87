//! The `help` and `list_servers` meta-tools.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value};

use super::HandlerResult;
use crate::engine::Engine;

#[derive(Debug, Deserialize)]
struct HelpParams {
    server: String,

    #[serde(default)]
    tool: Option<String>,
}

pub async fn help(engine: &Engine, args: Value) -> HandlerResult {
    let params: HelpParams = match serde_json::from_value(args) {
        Ok(params) => params,
        Err(e) => return HandlerResult::err(format!("Invalid arguments: {}", e)),
    };

    let surface = engine.surface().await;
    match surface.help_text(&params.server, params.tool.as_deref()) {
        Ok(text) => HandlerResult::ok(text),
        Err(e) => HandlerResult::err(e.to_string()),
    }
}

pub async fn list_servers(engine: &Engine) -> HandlerResult {
    let tools = engine.upstreams.all_tools().await;
    let connected = engine.upstreams.connected_servers();

    // Every configured server appears, connected or not.
    let mut names: Vec<String> = engine.upstreams.configured_servers();
    for server in tools.keys() {
        if !names.contains(server) {
            names.push(server.clone());
        }
    }

    let mut report = BTreeMap::new();
    for name in names {
        let tool_names: Vec<&str> = tools
            .get(&name)
            .map(|list| list.iter().map(|t| t.name.as_str()).collect())
            .unwrap_or_default();
        report.insert(
            name.clone(),
            json!({
                "connected": connected.contains(&name),
                "toolCount": tool_names.len(),
                "tools": tool_names,
            }),
        );
    }

    match serde_json::to_string_pretty(&report) {
        Ok(text) => HandlerResult::ok(text),
        Err(e) => HandlerResult::err(format!("Failed to render server list: {}", e)),
    }
}
