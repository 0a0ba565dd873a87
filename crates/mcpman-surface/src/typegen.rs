//! Type-surface engine: snapshots of the fleet's tools, generated TypeScript
//! declaration text, and the signature-keyed cache.

use std::collections::{BTreeMap, HashMap};

use mcpman_types::{AppError, AppResult, McpTool};
use parking_lot::Mutex;
use serde_json::Value;

use crate::names;
use crate::schema::{compile_schema, Schema};

/// One tool as seen by the surface engine.
#[derive(Debug, Clone)]
pub struct SurfaceTool {
    pub name: String,
    pub description: Option<String>,
    pub schema: Schema,
    pub raw_schema: Value,
}

/// Snapshot of every upstream tool, grouped per server.
#[derive(Debug, Clone, Default)]
pub struct ToolSurface {
    servers: BTreeMap<String, Vec<SurfaceTool>>,
}

/// The open-ended MCP output type, shared by every method signature.
const TOOL_OUTPUT_INTERFACE: &str = "interface ToolOutput {\n  content: Array<{ type: string; text?: string; [key: string]: unknown }>;\n  isError?: boolean;\n}\n";

/// Ambient declarations available to every script.
const AMBIENT_DECLARATIONS: &str = "declare function listServers(): string[];\ndeclare function listTools(server?: string): string[] | Record<string, string[]>;\ndeclare function help(server: string, tool?: string): Promise<unknown>;\ndeclare const $results: any[];\n";

impl ToolSurface {
    pub fn from_tools(tools: HashMap<String, Vec<McpTool>>) -> Self {
        let mut servers = BTreeMap::new();
        for (server, mut list) in tools {
            list.sort_by(|a, b| a.name.cmp(&b.name));
            let surface_tools = list
                .into_iter()
                .map(|tool| SurfaceTool {
                    schema: compile_schema(&tool.input_schema),
                    raw_schema: tool.input_schema,
                    name: tool.name,
                    description: tool.description,
                })
                .collect();
            servers.insert(server, surface_tools);
        }
        Self { servers }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.servers.keys().map(String::as_str).collect()
    }

    pub fn server_tools(&self, server: &str) -> Option<&[SurfaceTool]> {
        self.servers.get(server).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<SurfaceTool>)> {
        self.servers.iter()
    }

    /// Resolve a requested server name, tolerating camelCase requests.
    pub fn resolve_server(&self, requested: &str) -> Option<&str> {
        let resolved = names::resolve(requested, self.servers.keys().map(String::as_str))?;
        self.servers
            .keys()
            .find(|name| **name == resolved)
            .map(String::as_str)
    }

    /// Resolve a requested tool name on a server per the lookup rules.
    pub fn resolve_tool(&self, server: &str, requested: &str) -> Option<&SurfaceTool> {
        let tools = self.servers.get(server)?;
        let resolved = names::resolve(requested, tools.iter().map(|t| t.name.as_str()))?;
        tools.iter().find(|t| t.name == resolved)
    }

    /// `server.tool:inputSchemaJSON` over all tools, sorted and concatenated.
    /// This is the cache key for the unfiltered type text.
    pub fn signature(&self) -> String {
        let mut out = String::new();
        for (server, tools) in &self.servers {
            for tool in tools {
                out.push_str(server);
                out.push('.');
                out.push_str(&tool.name);
                out.push(':');
                out.push_str(&tool.raw_schema.to_string());
                out.push(';');
            }
        }
        out
    }

    /// Restrict to the given servers; unknown names error with alternatives.
    pub fn filtered(&self, servers: &[String]) -> AppResult<ToolSurface> {
        let mut out = BTreeMap::new();
        for requested in servers {
            let resolved = self.resolve_server(requested).ok_or_else(|| {
                AppError::Mcp(format!(
                    "Unknown server '{}'. Available servers: {}",
                    requested,
                    self.server_names().join(", ")
                ))
            })?;
            out.insert(resolved.to_string(), self.servers[resolved].clone());
        }
        Ok(ToolSurface { servers: out })
    }

    /// The sandbox bindings: each server under its original name (when it is
    /// a valid identifier) and its camelCase form when that differs.
    pub fn script_bindings(&self) -> Vec<(String, String)> {
        let mut bindings = Vec::new();
        for server in self.servers.keys() {
            let camel = names::camel(server);
            if names::is_identifier(server) {
                bindings.push((server.clone(), server.clone()));
                if camel != *server {
                    bindings.push((camel, server.clone()));
                }
            } else {
                bindings.push((camel, server.clone()));
            }
        }
        bindings
    }

    fn input_interface_name(server: &str, tool: &str) -> String {
        format!("{}{}Input", names::pascal(server), names::pascal(tool))
    }

    fn render_interface(server: &str, tool: &SurfaceTool) -> String {
        format!(
            "interface {} {{\n{}}}\n",
            Self::input_interface_name(server, tool.name.as_str()),
            tool.schema.interface_body()
        )
    }

    fn render_method_line(server: &str, tool: &SurfaceTool) -> String {
        let mut out = String::new();
        if let Some(description) = &tool.description {
            out.push_str(&format!("  /** {} */\n", description.replace('\n', " ")));
        }
        out.push_str(&format!(
            "  {}(input: {}): Promise<ToolOutput>;\n",
            names::camel(&tool.name),
            Self::input_interface_name(server, &tool.name)
        ));
        out
    }

    fn render_server_declaration(server: &str, tools: &[SurfaceTool]) -> String {
        let primary = if names::is_identifier(server) {
            server.to_string()
        } else {
            names::camel(server)
        };

        let mut out = String::new();
        out.push_str(&format!("declare const {}: {{\n", primary));
        for tool in tools {
            out.push_str(&Self::render_method_line(server, tool));
        }
        out.push_str("};\n");

        let camel = names::camel(server);
        if camel != primary {
            out.push_str(&format!("declare const {}: typeof {};\n", camel, primary));
        }
        out
    }

    /// The full declaration text for this surface.
    pub fn render_type_definitions(&self) -> String {
        let mut out = String::new();

        for (server, tools) in &self.servers {
            for tool in tools {
                out.push_str(&Self::render_interface(server, tool));
                out.push('\n');
            }
        }

        out.push_str(TOOL_OUTPUT_INTERFACE);
        out.push('\n');

        for (server, tools) in &self.servers {
            out.push_str(&Self::render_server_declaration(server, tools));
            out.push('\n');
        }

        out.push_str(AMBIENT_DECLARATIONS);
        out
    }

    /// `- server.tool: description` lines, the lightweight counterpart.
    pub fn render_tool_descriptions(&self) -> String {
        let mut out = String::new();
        for (server, tools) in &self.servers {
            for tool in tools {
                let description = tool
                    .description
                    .as_deref()
                    .map(|d| d.lines().next().unwrap_or(""))
                    .unwrap_or("(no description)");
                out.push_str(&format!("- {}.{}: {}\n", server, tool.name, description));
            }
        }
        out
    }

    /// Markdown help for one server, or one tool on it.
    pub fn help_text(&self, server: &str, tool: Option<&str>) -> AppResult<String> {
        let resolved = self.resolve_server(server).ok_or_else(|| {
            AppError::Mcp(format!(
                "Unknown server '{}'. Available servers: {}",
                server,
                self.server_names().join(", ")
            ))
        })?;
        let tools = &self.servers[resolved];

        match tool {
            Some(requested) => {
                let tool = self.resolve_tool(resolved, requested).ok_or_else(|| {
                    AppError::ToolNotFound {
                        server: resolved.to_string(),
                        tool: requested.to_string(),
                        available: tools
                            .iter()
                            .map(|t| t.name.clone())
                            .collect::<Vec<_>>()
                            .join(", "),
                    }
                })?;

                let mut out = format!("## {}.{}\n\n", resolved, tool.name);
                if let Some(description) = &tool.description {
                    out.push_str(description);
                    out.push_str("\n\n");
                }
                out.push_str("```typescript\n");
                out.push_str(&Self::render_interface(resolved, tool));
                out.push('\n');
                out.push_str(TOOL_OUTPUT_INTERFACE);
                out.push('\n');
                out.push_str(&format!(
                    "{}.{}(input: {}): Promise<ToolOutput>\n",
                    names::camel(resolved),
                    names::camel(&tool.name),
                    Self::input_interface_name(resolved, &tool.name)
                ));
                out.push_str("```\n");
                Ok(out)
            }
            None => {
                let mut out = format!("## {}\n\n```typescript\n", resolved);
                for tool in tools {
                    out.push_str(&Self::render_interface(resolved, tool));
                    out.push('\n');
                }
                out.push_str(TOOL_OUTPUT_INTERFACE);
                out.push('\n');
                out.push_str(&Self::render_server_declaration(resolved, tools));
                out.push_str("```\n");
                Ok(out)
            }
        }
    }
}

/// Signature-keyed cache over the unfiltered renderings.
///
/// Filtered renderings are always recomputed; the unfiltered entry is
/// invalidated whenever the signature changes (never by notification).
#[derive(Default)]
pub struct TypeSurfaceCache {
    definitions: Mutex<Option<(String, String)>>,
    descriptions: Mutex<Option<(String, String)>>,
}

impl TypeSurfaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn type_definitions(
        &self,
        surface: &ToolSurface,
        filter: Option<&[String]>,
    ) -> AppResult<String> {
        if let Some(servers) = filter {
            return Ok(surface.filtered(servers)?.render_type_definitions());
        }

        let signature = surface.signature();
        let mut cached = self.definitions.lock();
        if let Some((key, text)) = cached.as_ref() {
            if *key == signature {
                return Ok(text.clone());
            }
        }

        let text = surface.render_type_definitions();
        *cached = Some((signature, text.clone()));
        Ok(text)
    }

    pub fn tool_descriptions(&self, surface: &ToolSurface) -> String {
        let signature = surface.signature();
        let mut cached = self.descriptions.lock();
        if let Some((key, text)) = cached.as_ref() {
            if *key == signature {
                return text.clone();
            }
        }

        let text = surface.render_tool_descriptions();
        *cached = Some((signature, text.clone()));
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_surface() -> ToolSurface {
        let mut tools = HashMap::new();
        tools.insert(
            "filesystem".to_string(),
            vec![
                McpTool {
                    name: "list_directory".to_string(),
                    description: Some("List directory entries".to_string()),
                    input_schema: json!({
                        "type": "object",
                        "properties": {"path": {"type": "string"}},
                        "required": ["path"]
                    }),
                },
                McpTool {
                    name: "read_file".to_string(),
                    description: None,
                    input_schema: json!({
                        "type": "object",
                        "properties": {"path": {"type": "string"}},
                        "required": ["path"]
                    }),
                },
            ],
        );
        tools.insert(
            "my-github".to_string(),
            vec![McpTool {
                name: "create-issue".to_string(),
                description: Some("Open an issue".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {"title": {"type": "string"}},
                    "required": ["title"]
                }),
            }],
        );
        ToolSurface::from_tools(tools)
    }

    #[test]
    fn test_type_definitions_contain_interfaces_and_methods() {
        let text = sample_surface().render_type_definitions();

        assert!(text.contains("interface FilesystemListDirectoryInput {"));
        assert!(text.contains("  path: string;"));
        assert!(text.contains("interface ToolOutput {"));
        assert!(text.contains("declare const filesystem: {"));
        assert!(text
            .contains("  listDirectory(input: FilesystemListDirectoryInput): Promise<ToolOutput>;"));
        assert!(text.contains("declare const $results: any[];"));
        assert!(text.contains("declare function listServers(): string[];"));
    }

    #[test]
    fn test_non_identifier_server_binds_camel_only() {
        let text = sample_surface().render_type_definitions();
        assert!(text.contains("declare const myGithub: {"));
        assert!(!text.contains("declare const my-github"));
    }

    #[test]
    fn test_signature_is_order_independent() {
        let surface = sample_surface();
        let again = sample_surface();
        assert_eq!(surface.signature(), again.signature());
        assert!(surface.signature().contains("filesystem.list_directory:"));
    }

    #[test]
    fn test_cache_hits_until_signature_changes() {
        let cache = TypeSurfaceCache::new();
        let surface = sample_surface();

        let first = cache.type_definitions(&surface, None).unwrap();
        let second = cache.type_definitions(&surface, None).unwrap();
        assert_eq!(first, second);

        // A changed tool set yields a new signature and fresh text.
        let mut tools = HashMap::new();
        tools.insert(
            "filesystem".to_string(),
            vec![McpTool {
                name: "stat".to_string(),
                description: None,
                input_schema: json!({"type": "object"}),
            }],
        );
        let changed = ToolSurface::from_tools(tools);
        let third = cache.type_definitions(&changed, None).unwrap();
        assert_ne!(first, third);
        assert!(third.contains("FilesystemStatInput"));
    }

    #[test]
    fn test_filtered_definitions_only_include_requested_servers() {
        let cache = TypeSurfaceCache::new();
        let surface = sample_surface();

        let text = cache
            .type_definitions(&surface, Some(&["filesystem".to_string()]))
            .unwrap();
        assert!(text.contains("declare const filesystem"));
        assert!(!text.contains("myGithub"));

        let err = cache
            .type_definitions(&surface, Some(&["nope".to_string()]))
            .unwrap_err();
        assert!(err.to_string().contains("Available servers"));
    }

    #[test]
    fn test_tool_descriptions_lines() {
        let surface = sample_surface();
        let text = surface.render_tool_descriptions();
        assert!(text.contains("- filesystem.list_directory: List directory entries"));
        assert!(text.contains("- filesystem.read_file: (no description)"));
    }

    #[test]
    fn test_help_for_one_tool() {
        let surface = sample_surface();
        let text = surface.help_text("filesystem", Some("listDirectory")).unwrap();
        assert!(text.contains("## filesystem.list_directory"));
        assert!(text.contains("interface FilesystemListDirectoryInput"));

        let err = surface.help_text("filesystem", Some("zap")).unwrap_err();
        assert!(err.to_string().contains("Available tools"));

        let err = surface.help_text("nope", None).unwrap_err();
        assert!(err.to_string().contains("Available servers"));
    }

    #[test]
    fn test_resolve_server_accepts_camel() {
        let surface = sample_surface();
        assert_eq!(surface.resolve_server("myGithub"), Some("my-github"));
        assert_eq!(surface.resolve_server("filesystem"), Some("filesystem"));
    }

    #[test]
    fn test_script_bindings() {
        let surface = sample_surface();
        let bindings = surface.script_bindings();
        assert!(bindings.contains(&("filesystem".to_string(), "filesystem".to_string())));
        assert!(bindings.contains(&("myGithub".to_string(), "my-github".to_string())));
        // The kebab name itself is not an identifier, so it is not a binding.
        assert!(!bindings.iter().any(|(b, _)| b == "my-github"));
    }
}
