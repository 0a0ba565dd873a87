//! Shared state behind every meta-tool handler.

use std::sync::Arc;

use async_trait::async_trait;
use mcpman_config::ConfigStore;
use mcpman_mcp::{Fleet, Upstreams};
use mcpman_script::{SandboxHost, ScriptRuntime};
use mcpman_surface::{names, ToolSurface, TypeSurfaceCache};
use mcpman_types::{AppError, AppResult};
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::downstream::DownstreamPeer;
use crate::lifecycle::InitGate;

pub struct Engine {
    pub upstreams: Arc<dyn Upstreams>,

    /// The concrete fleet, used by install and lifecycle wiring. Absent in
    /// handler tests that stub [`Upstreams`].
    pub fleet: Option<Arc<Fleet>>,

    pub config: Option<ConfigStore>,

    pub cache: TypeSurfaceCache,

    pub runtime: Arc<ScriptRuntime>,

    pub gate: InitGate,

    peer: RwLock<Option<Arc<DownstreamPeer>>>,
}

impl Engine {
    pub fn new(
        upstreams: Arc<dyn Upstreams>,
        fleet: Option<Arc<Fleet>>,
        config: Option<ConfigStore>,
    ) -> Arc<Self> {
        let host = Arc::new(EngineHost {
            upstreams: upstreams.clone(),
        });
        Arc::new(Self {
            upstreams,
            fleet,
            config,
            cache: TypeSurfaceCache::new(),
            runtime: ScriptRuntime::new(host),
            gate: InitGate::new(),
            peer: RwLock::new(None),
        })
    }

    /// Current snapshot of every upstream tool.
    pub async fn surface(&self) -> ToolSurface {
        ToolSurface::from_tools(self.upstreams.all_tools().await)
    }

    /// The globals payload the sandbox consumes: per-server tool lists plus
    /// the binding table (original names and camel aliases).
    pub fn globals(&self, surface: &ToolSurface) -> Value {
        let mut servers = serde_json::Map::new();
        for (name, tools) in surface.iter() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|t| json!({ "name": t.name, "description": t.description }))
                .collect();
            servers.insert(name.clone(), json!({ "tools": tools }));
        }
        json!({ "servers": servers, "bindings": surface.script_bindings() })
    }

    pub fn set_peer(&self, peer: Arc<DownstreamPeer>) {
        *self.peer.write() = Some(peer);
    }

    pub fn peer(&self) -> Option<Arc<DownstreamPeer>> {
        self.peer.read().clone()
    }
}

/// The host surface exposed to the sandbox: tool calls and help lookups.
struct EngineHost {
    upstreams: Arc<dyn Upstreams>,
}

impl EngineHost {
    async fn resolve_server(&self, requested: &str) -> AppResult<String> {
        let tools = self.upstreams.all_tools().await;
        names::resolve(requested, tools.keys().map(String::as_str)).ok_or_else(|| {
            let mut available: Vec<&String> = tools.keys().collect();
            available.sort();
            AppError::Mcp(format!(
                "Unknown server '{}'. Available servers: {}",
                requested,
                available
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }
}

#[async_trait]
impl SandboxHost for EngineHost {
    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> AppResult<Value> {
        let content = self.upstreams.call_tool(server, tool, args).await?;
        Ok(serde_json::to_value(content)?)
    }

    async fn help(&self, server: &str, tool: Option<&str>) -> AppResult<Value> {
        let resolved = self.resolve_server(server).await?;
        let tools = self.upstreams.list_tools(&resolved).await?;

        match tool {
            Some(requested) => {
                let name = names::resolve(requested, tools.iter().map(|t| t.name.as_str()))
                    .ok_or_else(|| AppError::ToolNotFound {
                        server: resolved.clone(),
                        tool: requested.to_string(),
                        available: tools
                            .iter()
                            .map(|t| t.name.clone())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })?;
                let tool = tools
                    .iter()
                    .find(|t| t.name == name)
                    .ok_or_else(|| AppError::Internal(format!("resolved tool '{}' vanished", name)))?;
                Ok(json!({
                    "server": resolved,
                    "tool": {
                        "name": tool.name,
                        "description": tool.description,
                        "inputSchema": tool.input_schema,
                    }
                }))
            }
            None => {
                let tools: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "inputSchema": t.input_schema,
                        })
                    })
                    .collect();
                Ok(json!({ "server": resolved, "tools": tools }))
            }
        }
    }
}
