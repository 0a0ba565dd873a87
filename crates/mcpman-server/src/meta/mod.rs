//! The fixed meta-tool set exposed to the downstream client.

mod code;
mod eval;
mod info;
mod install;
mod invoke;

use std::sync::Arc;

use mcpman_types::McpTool;
use serde_json::{json, Value};

use crate::engine::Engine;

/// Outcome of one meta-tool call: text parts plus the error flag.
///
/// Recoverable failures become `is_error: true` records so the downstream
/// agent can react and retry; only startup/shutdown errors terminate the
/// process.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResult {
    pub parts: Vec<String>,
    pub is_error: bool,
}

impl HandlerResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            parts: vec![text.into()],
            is_error: false,
        }
    }

    pub fn err(text: impl Into<String>) -> Self {
        Self {
            parts: vec![text.into()],
            is_error: true,
        }
    }

    pub fn parts(parts: Vec<String>, is_error: bool) -> Self {
        Self { parts, is_error }
    }
}

/// Dispatch one tool call. Returns None for unknown tool names.
///
/// Every handler waits on the initialization gate first, so no call can
/// observe the fleet mid-startup.
pub async fn dispatch(engine: &Arc<Engine>, name: &str, args: Value) -> Option<HandlerResult> {
    engine.gate.wait().await;

    let result = match name {
        "eval" => eval::handle(engine, args).await,
        "invoke" => invoke::handle(engine, args).await,
        "code" => code::handle(engine, args).await,
        "help" => info::help(engine, args).await,
        "list_servers" => info::list_servers(engine).await,
        "install" => install::handle(engine, args).await,
        _ => return None,
    };
    Some(result)
}

/// The registered tool descriptors, exactly the fixed set.
pub fn tool_descriptors() -> Vec<McpTool> {
    vec![
        McpTool {
            name: "eval".to_string(),
            description: Some(
                "Evaluate a JavaScript function expression in the persistent sandbox. \
                 Upstream tools are available as server objects (e.g. await filesystem.listDirectory({path: '.'})); \
                 results are appended to $results."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "A function expression taking zero or one argument"
                    },
                    "arg": {
                        "type": "object",
                        "description": "Argument passed to the function (defaults to {})"
                    }
                },
                "required": ["code"]
            }),
        },
        McpTool {
            name: "invoke".to_string(),
            description: Some(
                "Invoke upstream tools directly. Sequential by default (stops at the first \
                 failure); parallel mode runs every call and reports all outcomes."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "calls": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "server": {"type": "string"},
                                "tool": {"type": "string"},
                                "parameters": {"type": "object"}
                            },
                            "required": ["server", "tool"]
                        }
                    },
                    "parallel": {"type": "boolean"}
                },
                "required": ["calls"]
            }),
        },
        McpTool {
            name: "code".to_string(),
            description: Some(
                "Generate a script from a natural-language description, validate it against \
                 the tool surface, and execute it."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "functionDescription": {
                        "type": "string",
                        "description": "What the generated function should do"
                    },
                    "servers": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Restrict the visible tool surface to these servers"
                    }
                },
                "required": ["functionDescription"]
            }),
        },
        McpTool {
            name: "help".to_string(),
            description: Some(
                "Type declarations for a server's tools (or one tool when given).".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "server": {"type": "string"},
                    "tool": {"type": "string"}
                },
                "required": ["server"]
            }),
        },
        McpTool {
            name: "list_servers".to_string(),
            description: Some(
                "Connected upstream servers and their tools, as JSON.".to_string(),
            ),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        McpTool {
            name: "install".to_string(),
            description: Some(
                "Add an upstream MCP server to the configuration and connect it.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "transport": {"type": "string", "enum": ["stdio", "http"]},
                    "command": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}},
                    "url": {"type": "string"},
                    "env": {"type": "object"},
                    "headers": {"type": "object"},
                    "disabled": {"type": "boolean"}
                },
                "required": ["name", "transport"]
            }),
        },
    ]
}

#[cfg(test)]
pub(crate) mod testutil {
    //! A scripted upstream for handler tests: one `filesystem` server with a
    //! `list_directory` tool that answers `{"path": "."}` with two entries.

    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use mcpman_mcp::Upstreams;
    use mcpman_types::{AppError, AppResult, ContentPart, McpTool, ToolResult};
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use crate::engine::Engine;

    pub struct StubUpstreams {
        pub calls: Mutex<Vec<(String, String, Value)>>,
    }

    impl StubUpstreams {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn tools() -> Vec<McpTool> {
            vec![McpTool {
                name: "list_directory".to_string(),
                description: Some("List directory entries".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}},
                    "required": ["path"]
                }),
            }]
        }
    }

    #[async_trait]
    impl Upstreams for StubUpstreams {
        async fn all_tools(&self) -> HashMap<String, Vec<McpTool>> {
            let mut map = HashMap::new();
            map.insert("filesystem".to_string(), Self::tools());
            map
        }

        async fn list_tools(&self, server: &str) -> AppResult<Vec<McpTool>> {
            if server == "filesystem" {
                Ok(Self::tools())
            } else {
                Err(AppError::ServerNotConnected(server.to_string()))
            }
        }

        async fn call_tool(&self, server: &str, tool: &str, args: Value) -> AppResult<ToolResult> {
            if server != "filesystem" {
                return Err(AppError::ServerNotConnected(server.to_string()));
            }
            self.calls
                .lock()
                .push((server.to_string(), tool.to_string(), args.clone()));
            match tool {
                "list_directory" => Ok(vec![ContentPart::text("a"), ContentPart::text("b")]),
                other => Err(AppError::ToolNotFound {
                    server: server.to_string(),
                    tool: other.to_string(),
                    available: "list_directory".to_string(),
                }),
            }
        }

        fn connected_servers(&self) -> Vec<String> {
            vec!["filesystem".to_string()]
        }

        fn configured_servers(&self) -> Vec<String> {
            vec!["filesystem".to_string()]
        }
    }

    pub fn stub_engine() -> (Arc<Engine>, Arc<StubUpstreams>) {
        let stub = StubUpstreams::new();
        let engine = Engine::new(stub.clone(), None, None);
        engine.gate.open();
        (engine, stub)
    }
}
