//! Settings model and config file loader for mcpman.
//!
//! The config file is JSON at `$MCP_CONFIG_DIR/config.json` (default
//! `~/.config/mcpman/config.json`). The loader hands the core a parsed
//! [`Settings`] object; the saver is used by the `install` meta-tool to
//! persist dynamically added servers.

mod store;
mod types;

pub use store::{config_dir, config_file, ConfigStore};
pub use types::{
    validate_server_name, LogLevel, LoggingSettings, OAuthSettings, ServerConfig, Settings,
    DEFAULT_TIMEOUT_MS,
};
