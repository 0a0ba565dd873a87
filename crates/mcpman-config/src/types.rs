//! Configuration types.

use std::collections::{BTreeMap, HashMap};

use mcpman_types::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Default per-server request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Top-level settings object supplied by the loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: String,

    /// Upstream servers keyed by name. Names match `[A-Za-z0-9_-]+`.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            servers: BTreeMap::new(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Servers that are enabled (not marked `disabled`).
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &ServerConfig)> {
        self.servers.iter().filter(|(_, cfg)| !cfg.disabled())
    }

    /// Validate every server name against `[A-Za-z0-9_-]+`.
    pub fn validate(&self) -> AppResult<()> {
        for name in self.servers.keys() {
            validate_server_name(name)?;
        }
        Ok(())
    }
}

/// Validate a server name against `[A-Za-z0-9_-]+`.
pub fn validate_server_name(name: &str) -> AppResult<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(AppError::Config(format!(
            "Invalid server name '{}': names must match [A-Za-z0-9_-]+",
            name
        )))
    }
}

/// Per-server configuration, tagged by transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ServerConfig {
    /// Child process speaking line-delimited JSON-RPC over stdio.
    Stdio {
        command: String,

        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,

        /// Merged over the process environment when spawning.
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,

        #[serde(default)]
        disabled: bool,

        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },

    /// Streamable HTTP endpoint, optionally guarded by OAuth 2.1.
    Http {
        url: String,

        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,

        #[serde(default)]
        disabled: bool,

        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        oauth: Option<OAuthSettings>,
    },
}

impl ServerConfig {
    pub fn disabled(&self) -> bool {
        match self {
            ServerConfig::Stdio { disabled, .. } | ServerConfig::Http { disabled, .. } => *disabled,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        match self {
            ServerConfig::Stdio { timeout_ms, .. } | ServerConfig::Http { timeout_ms, .. } => {
                *timeout_ms
            }
        }
    }

    pub fn transport_name(&self) -> &'static str {
        match self {
            ServerConfig::Stdio { .. } => "stdio",
            ServerConfig::Http { .. } => "http",
        }
    }
}

/// OAuth 2.1 client settings for an HTTP upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSettings {
    pub client_name: String,

    pub redirect_url: String,

    #[serde(default)]
    pub scopes: Vec<String>,

    /// Pre-registered client id; when absent, dynamic registration is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Logging block consumed by the tracing setup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingSettings {
    #[serde(default)]
    pub level: LogLevel,

    /// Optional log file; redirection itself is handled outside the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
