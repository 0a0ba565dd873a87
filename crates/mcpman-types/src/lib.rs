//! Shared error and MCP entity types used across the mcpman workspace.

mod errors;
mod mcp_types;

pub use errors::{AppError, AppResult};
pub use mcp_types::{ContentPart, McpTool, Root, RootsListResult, ToolResult};
