//! Config file loading and saving.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mcpman_types::{AppError, AppResult};
use parking_lot::RwLock;

use crate::types::{validate_server_name, ServerConfig, Settings};

/// Resolve the configuration directory.
///
/// `MCP_CONFIG_DIR` wins; otherwise `~/.config/mcpman`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MCP_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".config").join("mcpman")
}

/// Path of the config file inside [`config_dir`].
pub fn config_file() -> PathBuf {
    config_dir().join("config.json")
}

/// Owns the parsed settings and knows how to persist them.
///
/// The in-memory copy is the source of truth after startup; `install` mutates
/// it through [`ConfigStore::add_server`] which also writes the file back.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    path: PathBuf,
    settings: Arc<RwLock<Settings>>,
}

impl ConfigStore {
    /// Load settings from `path`. A missing file yields default settings so a
    /// bare `mcpman` run starts with zero upstreams.
    pub fn load_from_path(path: PathBuf) -> AppResult<Self> {
        let settings = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| AppError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
            let settings: Settings = serde_json::from_str(&raw).map_err(|e| {
                AppError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            settings.validate()?;
            settings
        } else {
            tracing::info!("No config file at {}, starting empty", path.display());
            Settings::default()
        };

        Ok(Self {
            path,
            settings: Arc::new(RwLock::new(settings)),
        })
    }

    /// Load from the default location (honors `MCP_CONFIG_DIR`).
    pub fn load() -> AppResult<Self> {
        Self::load_from_path(config_file())
    }

    /// Construct a store around already-parsed settings (tests, embedding).
    pub fn from_settings(settings: Settings, path: PathBuf) -> Self {
        Self {
            path,
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a server with this name exists (enabled or not).
    pub fn has_server(&self, name: &str) -> bool {
        self.settings.read().servers.contains_key(name)
    }

    /// Add a server to the settings and persist the file.
    ///
    /// Collisions are the caller's error: the install handler reports them to
    /// the client before calling this.
    pub fn add_server(&self, name: &str, config: ServerConfig) -> AppResult<()> {
        validate_server_name(name)?;
        {
            let mut settings = self.settings.write();
            if settings.servers.contains_key(name) {
                return Err(AppError::Config(format!(
                    "Server '{}' already exists",
                    name
                )));
            }
            settings.servers.insert(name.to_string(), config);
        }
        self.save()
    }

    /// Write the settings back as pretty JSON, atomically (temp file + rename).
    pub fn save(&self) -> AppResult<()> {
        let settings = self.settings.read().clone();
        let json = serde_json::to_string_pretty(&settings)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .map_err(|e| AppError::Config(format!("Failed to write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            AppError::Config(format!("Failed to move config into place: {}", e))
        })?;

        tracing::debug!("Saved config to {}", self.path.display());
        Ok(())
    }
}
