//! One upstream connection: transport selection, handshake, state.

use std::sync::Arc;

use mcpman_config::ServerConfig;
use mcpman_types::{AppResult, McpTool, ToolResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::time::Duration;

use crate::client::{McpClient, RootsFn};
use crate::oauth::{OAuthProvider, RedirectCallback};
use crate::protocol::InitializeResult;
use crate::token_store::TokenStore;
use crate::transport::{spawn_stdio, HttpTransport, Transport};

/// Connection state of a session.
///
/// A session appears in the fleet's client map iff it is `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

pub struct UpstreamSession {
    name: String,
    config: ServerConfig,
    client: McpClient,
    state: RwLock<ConnectionState>,
    init_result: RwLock<Option<InitializeResult>>,
}

impl UpstreamSession {
    /// Construct the transport for `config`, run the MCP handshake, and (when
    /// a roots provider is installed fleet-side) announce the initial roots.
    pub async fn connect(
        name: &str,
        config: ServerConfig,
        roots: RootsFn,
        announce_roots: bool,
        token_store: Arc<dyn TokenStore>,
        on_redirect: RedirectCallback,
    ) -> AppResult<Arc<Self>> {
        let timeout = Duration::from_millis(config.timeout_ms());

        let transport: Arc<dyn Transport> = match &config {
            ServerConfig::Stdio {
                command, args, env, ..
            } => spawn_stdio(command, args, env, timeout).await?,
            ServerConfig::Http {
                url,
                headers,
                oauth,
                ..
            } => {
                let auth = oauth.as_ref().map(|settings| {
                    Arc::new(OAuthProvider::new(
                        name,
                        url,
                        settings.clone(),
                        token_store.clone(),
                        on_redirect.clone(),
                    ))
                });
                Arc::new(HttpTransport::connect(name, url, headers, timeout, auth).await?)
            }
        };

        Self::from_transport(name, config, transport, roots, announce_roots).await
    }

    /// Handshake over an already-built transport (shared by both transports
    /// and by in-memory test upstreams).
    pub async fn from_transport(
        name: &str,
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        roots: RootsFn,
        announce_roots: bool,
    ) -> AppResult<Arc<Self>> {
        let session = Arc::new(Self {
            name: name.to_string(),
            config,
            client: McpClient::new(name, transport),
            state: RwLock::new(ConnectionState::Connecting),
            init_result: RwLock::new(None),
        });

        match session.client.initialize(roots).await {
            Ok(result) => {
                *session.init_result.write() = Some(result);
                *session.state.write() = ConnectionState::Connected;
            }
            Err(e) => {
                *session.state.write() = ConnectionState::Failed;
                let _ = session.client.close().await;
                return Err(e);
            }
        }

        if announce_roots {
            if let Err(e) = session.client.notify_roots_list_changed().await {
                tracing::warn!("Failed to announce roots to {}: {}", name, e);
            }
        }

        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn init_result(&self) -> Option<InitializeResult> {
        self.init_result.read().clone()
    }

    pub async fn list_tools(&self) -> AppResult<Vec<McpTool>> {
        self.client.list_tools().await
    }

    pub async fn call_tool(&self, tool: &str, args: Value) -> AppResult<ToolResult> {
        self.client.call_tool(tool, args).await
    }

    pub async fn notify_roots_list_changed(&self) -> AppResult<()> {
        self.client.notify_roots_list_changed().await
    }

    pub async fn close(&self) -> AppResult<()> {
        *self.state.write() = ConnectionState::Disconnected;
        self.client.close().await
    }
}

impl std::fmt::Debug for UpstreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSession")
            .field("name", &self.name)
            .field("transport", &self.config.transport_name())
            .field("state", &self.state())
            .finish()
    }
}
