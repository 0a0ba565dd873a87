//! The upstream fleet manager: owns every session, fans out connects,
//! routes tool calls, and forwards roots.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use mcpman_config::{ConfigStore, ServerConfig};
use mcpman_types::{AppError, AppResult, McpTool, Root, ToolResult};
use parking_lot::RwLock;
use serde_json::Value;

use crate::client::RootsFn;
use crate::oauth::RedirectCallback;
use crate::session::UpstreamSession;
use crate::token_store::TokenStore;

/// Async supplier of the downstream client's roots.
pub type RootsProvider = Arc<dyn Fn() -> BoxFuture<'static, Vec<Root>> + Send + Sync>;

/// The read/call surface the tool layer consumes.
///
/// Implemented by [`Fleet`]; meta-tool tests substitute a stub.
#[async_trait]
pub trait Upstreams: Send + Sync {
    /// Tools per connected server. Per-server failures yield an empty list;
    /// this never fails as a whole.
    async fn all_tools(&self) -> HashMap<String, Vec<McpTool>>;

    /// Fresh `tools/list` from one server.
    async fn list_tools(&self, server: &str) -> AppResult<Vec<McpTool>>;

    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> AppResult<ToolResult>;

    fn connected_servers(&self) -> Vec<String>;

    fn configured_servers(&self) -> Vec<String>;
}

pub struct Fleet {
    config: ConfigStore,

    /// Connected sessions only; a session is present iff state == Connected.
    clients: DashMap<String, Arc<UpstreamSession>>,

    roots_provider: Arc<RwLock<Option<RootsProvider>>>,

    token_store: Arc<dyn TokenStore>,

    on_redirect: RedirectCallback,
}

impl Fleet {
    pub fn new(
        config: ConfigStore,
        token_store: Arc<dyn TokenStore>,
        on_redirect: RedirectCallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            clients: DashMap::new(),
            roots_provider: Arc::new(RwLock::new(None)),
            token_store,
            on_redirect,
        })
    }

    /// The per-session roots supplier: consults the provider installed at
    /// call time, so sessions created before `set_roots_provider` still see
    /// the roots afterwards.
    fn session_roots_fn(&self) -> RootsFn {
        let provider = self.roots_provider.clone();
        Arc::new(move || {
            let current = provider.read().clone();
            Box::pin(async move {
                match current {
                    Some(provider) => provider().await,
                    None => Vec::new(),
                }
            })
        })
    }

    fn roots_installed(&self) -> bool {
        self.roots_provider.read().is_some()
    }

    /// Connect every enabled server concurrently. Individual failures are
    /// logged and the server is simply absent from the fleet; the aggregate
    /// error reports Unauthorized servers so startup can print re-auth
    /// instructions.
    pub async fn connect_all(&self) -> AppResult<()> {
        let servers: Vec<(String, ServerConfig)> = self
            .config
            .get()
            .enabled_servers()
            .map(|(name, cfg)| (name.clone(), cfg.clone()))
            .collect();

        tracing::info!("Connecting {} upstream server(s)", servers.len());

        let attempts = servers.into_iter().map(|(name, cfg)| async move {
            let result = self.connect_server(&name, cfg).await;
            (name, result)
        });

        let mut unauthorized = Vec::new();
        for (name, result) in join_all(attempts).await {
            if let Err(e) = result {
                if e.is_unauthorized() {
                    unauthorized.push(name);
                }
            }
        }

        if let Some(first) = unauthorized.first() {
            return Err(AppError::Unauthorized(first.clone()));
        }
        Ok(())
    }

    /// Connect a single server; on success it joins the fleet, on failure it
    /// stays absent and the error is logged (and returned for the caller).
    pub async fn connect_server(&self, name: &str, config: ServerConfig) -> AppResult<()> {
        match UpstreamSession::connect(
            name,
            config,
            self.session_roots_fn(),
            self.roots_installed(),
            self.token_store.clone(),
            self.on_redirect.clone(),
        )
        .await
        {
            Ok(session) => {
                self.clients.insert(name.to_string(), session);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", name, e);
                Err(e)
            }
        }
    }

    /// Add a server to the settings (persisted through the config store) and
    /// attempt a connection when it is enabled.
    ///
    /// Name collisions are the install handler's error to report; the store
    /// rejects them here as a backstop.
    pub async fn add_server(&self, name: &str, config: ServerConfig) -> AppResult<()> {
        self.config.add_server(name, config.clone())?;
        if config.disabled() {
            tracing::info!("Added disabled server {}", name);
            return Ok(());
        }
        self.connect_server(name, config).await
    }

    /// Install the roots provider and tell every connected upstream that the
    /// root set changed.
    pub async fn set_roots_provider(&self, provider: RootsProvider) {
        *self.roots_provider.write() = Some(provider);
        self.notify_roots_changed().await;
    }

    /// Send `rootsListChanged` to every connected session; individual
    /// failures are logged, never propagated.
    pub async fn notify_roots_changed(&self) {
        let sessions: Vec<Arc<UpstreamSession>> =
            self.clients.iter().map(|e| e.value().clone()).collect();

        let notifications = sessions.into_iter().map(|session| async move {
            if let Err(e) = session.notify_roots_list_changed().await {
                tracing::warn!(
                    "Failed to notify {} of roots change: {}",
                    session.name(),
                    e
                );
            }
        });
        join_all(notifications).await;
    }

    /// Close every session and clear the map. Idempotent; per-session close
    /// errors are swallowed.
    pub async fn disconnect(&self) {
        let sessions: Vec<(String, Arc<UpstreamSession>)> = self
            .clients
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        self.clients.clear();

        let closes = sessions.into_iter().map(|(name, session)| async move {
            if let Err(e) = session.close().await {
                tracing::warn!("Error closing session {}: {}", name, e);
            }
        });
        join_all(closes).await;
        tracing::info!("All upstream sessions closed");
    }

    pub fn session(&self, name: &str) -> Option<Arc<UpstreamSession>> {
        self.clients.get(name).map(|e| e.value().clone())
    }

    /// Test-and-embedding seam: adopt an externally-built session (e.g. over
    /// an in-memory transport).
    pub fn insert_session(&self, session: Arc<UpstreamSession>) {
        self.clients
            .insert(session.name().to_string(), session);
    }

    /// The roots supplier handed to sessions built outside the fleet.
    pub fn roots_fn(&self) -> RootsFn {
        self.session_roots_fn()
    }
}

#[async_trait]
impl Upstreams for Fleet {
    async fn all_tools(&self) -> HashMap<String, Vec<McpTool>> {
        let sessions: Vec<Arc<UpstreamSession>> =
            self.clients.iter().map(|e| e.value().clone()).collect();

        let lookups = sessions.into_iter().map(|session| async move {
            let tools = match session.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!("tools/list failed for {}: {}", session.name(), e);
                    Vec::new()
                }
            };
            (session.name().to_string(), tools)
        });

        join_all(lookups).await.into_iter().collect()
    }

    async fn list_tools(&self, server: &str) -> AppResult<Vec<McpTool>> {
        let session = self
            .session(server)
            .ok_or_else(|| AppError::ServerNotConnected(server.to_string()))?;
        session.list_tools().await
    }

    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> AppResult<ToolResult> {
        let session = self
            .session(server)
            .ok_or_else(|| AppError::ServerNotConnected(server.to_string()))?;
        session.call_tool(tool, args).await
    }

    fn connected_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn configured_servers(&self) -> Vec<String> {
        self.config
            .get()
            .enabled_servers()
            .map(|(name, _)| name.clone())
            .collect()
    }
}
