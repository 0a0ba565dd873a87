//! Token persistence for OAuth-guarded upstreams.
//!
//! Storage is an injected trait so the backing (file, keychain, memory) stays
//! outside the core. Records are keyed by server name.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mcpman_types::{AppError, AppResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Tokens issued by the authorization server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,

    #[serde(default)]
    pub token_type: Option<String>,

    /// Absolute expiry computed from `expires_in` at save time.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,
}

impl OAuthTokens {
    /// Valid if no expiry is known or the expiry is more than a minute away.
    pub fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > Utc::now() + chrono::Duration::seconds(60),
            None => true,
        }
    }
}

/// Client credentials, configured or dynamically registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInformation {
    pub client_id: String,

    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Everything persisted per server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoredAuth {
    #[serde(default)]
    pub tokens: Option<OAuthTokens>,

    #[serde(default)]
    pub client_information: Option<ClientInformation>,

    /// PKCE verifier of the in-flight authorization, if any.
    #[serde(default)]
    pub code_verifier: Option<String>,

    /// CSRF state of the in-flight authorization, if any.
    #[serde(default)]
    pub pending_state: Option<String>,
}

/// Storage backend contract.
pub trait TokenStore: Send + Sync {
    fn load(&self, server: &str) -> AppResult<Option<StoredAuth>>;
    fn save(&self, server: &str, auth: &StoredAuth) -> AppResult<()>;
    fn clear(&self, server: &str) -> AppResult<()>;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryTokenStore {
    records: Mutex<HashMap<String, StoredAuth>>,
}

impl MemoryTokenStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, server: &str) -> AppResult<Option<StoredAuth>> {
        Ok(self.records.lock().get(server).cloned())
    }

    fn save(&self, server: &str, auth: &StoredAuth) -> AppResult<()> {
        self.records.lock().insert(server.to_string(), auth.clone());
        Ok(())
    }

    fn clear(&self, server: &str) -> AppResult<()> {
        self.records.lock().remove(server);
        Ok(())
    }
}

/// JSON-file store, one map of server name to record.
pub struct FileTokenStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, StoredAuth>>,
}

impl FileTokenStore {
    pub fn new(path: PathBuf) -> AppResult<Arc<Self>> {
        let cache = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| AppError::OAuth(format!("Failed to read token store: {}", e)))?;
            serde_json::from_str(&raw)
                .map_err(|e| AppError::OAuth(format!("Failed to parse token store: {}", e)))?
        } else {
            HashMap::new()
        };

        Ok(Arc::new(Self {
            path,
            cache: Mutex::new(cache),
        }))
    }

    fn flush(&self, cache: &HashMap<String, StoredAuth>) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::OAuth(format!("Failed to create token dir: {}", e)))?;
        }
        let json = serde_json::to_string_pretty(cache)?;
        std::fs::write(&self.path, json)
            .map_err(|e| AppError::OAuth(format!("Failed to write token store: {}", e)))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, server: &str) -> AppResult<Option<StoredAuth>> {
        Ok(self.cache.lock().get(server).cloned())
    }

    fn save(&self, server: &str, auth: &StoredAuth) -> AppResult<()> {
        let mut cache = self.cache.lock();
        cache.insert(server.to_string(), auth.clone());
        self.flush(&cache)
    }

    fn clear(&self, server: &str) -> AppResult<()> {
        let mut cache = self.cache.lock();
        cache.remove(server);
        self.flush(&cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoredAuth {
        StoredAuth {
            tokens: Some(OAuthTokens {
                access_token: "tok".to_string(),
                token_type: Some("Bearer".to_string()),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                refresh_token: Some("ref".to_string()),
                scope: None,
            }),
            client_information: Some(ClientInformation {
                client_id: "cid".to_string(),
                client_secret: None,
            }),
            code_verifier: None,
            pending_state: None,
        }
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryTokenStore::new();
        assert!(store.load("x").unwrap().is_none());

        store.save("x", &sample()).unwrap();
        let loaded = store.load("x").unwrap().unwrap();
        assert_eq!(loaded.tokens.unwrap().access_token, "tok");

        store.clear("x").unwrap();
        assert!(store.load("x").unwrap().is_none());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenStore::new(path.clone()).unwrap();
        store.save("github", &sample()).unwrap();

        let reopened = FileTokenStore::new(path).unwrap();
        let loaded = reopened.load("github").unwrap().unwrap();
        assert_eq!(loaded.client_information.unwrap().client_id, "cid");
    }

    #[test]
    fn expired_tokens_are_not_fresh() {
        let tokens = OAuthTokens {
            access_token: "tok".to_string(),
            token_type: None,
            expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
            refresh_token: None,
            scope: None,
        };
        assert!(!tokens.is_fresh());
    }
}
