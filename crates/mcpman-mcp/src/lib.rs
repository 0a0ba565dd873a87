//! Upstream MCP plumbing: JSON-RPC protocol types, transports, the OAuth 2.1
//! provider, the upstream client/session, and the fleet manager.

pub mod client;
pub mod fleet;
pub mod oauth;
pub mod protocol;
pub mod session;
pub mod token_store;
pub mod transport;

pub use client::{McpClient, RootsFn};
pub use fleet::{Fleet, RootsProvider, Upstreams};
pub use oauth::{OAuthProvider, RedirectCallback};
pub use session::{ConnectionState, UpstreamSession};
pub use token_store::{FileTokenStore, MemoryTokenStore, StoredAuth, TokenStore};
