//! mcpman: a multiplexing MCP proxy.
//!
//! One downstream client connects over stdio; mcpman fans out to the
//! configured upstream MCP servers and exposes the meta-tool set.

use std::sync::Arc;

use mcpman_config::{config_dir, ConfigStore, LoggingSettings};
use mcpman_mcp::{FileTokenStore, Fleet, MemoryTokenStore, TokenStore};
use mcpman_server::{DownstreamServer, Engine};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Config must parse before anything else; a broken file is exit 1.
    let config = match ConfigStore::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mcpman: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.get().logging);

    info!("mcpman 1.0.0 starting");
    info!("Configuration: {}", config.path().display());

    let token_store: Arc<dyn TokenStore> =
        match FileTokenStore::new(config_dir().join("tokens.json")) {
            Ok(store) => store,
            Err(e) => {
                warn!("Token store unavailable ({}); using in-memory tokens", e);
                MemoryTokenStore::new()
            }
        };

    // OAuth redirects escape the JSON-RPC path by design: print the URL for
    // the operator and let the external callback server finish the flow.
    let on_redirect = Arc::new(|url: String| {
        eprintln!("==========================================================");
        eprintln!("Authorization required. Open this URL in your browser:");
        eprintln!("  {}", url);
        eprintln!("==========================================================");
    });

    let fleet = Fleet::new(config.clone(), token_store, on_redirect);
    let engine = Engine::new(fleet.clone(), Some(fleet.clone()), Some(config));

    let server = {
        let engine = engine.clone();
        tokio::spawn(async move {
            DownstreamServer::run(engine, tokio::io::stdin(), tokio::io::stdout()).await
        })
    };

    tokio::select! {
        result = server => {
            match result {
                Ok(Ok(())) => info!("Downstream connection closed"),
                Ok(Err(e)) => error!("Downstream server failed: {}", e),
                Err(e) => error!("Downstream server panicked: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    // Orderly teardown: sandbox first, then every upstream session. Both
    // paths are idempotent.
    engine.runtime.close().await;
    fleet.disconnect().await;

    info!("mcpman stopped");
    std::process::exit(0);
}

/// Logging goes to stderr only; stdout belongs to the downstream JSON-RPC
/// stream. `RUST_LOG` wins, `MCPMAN_TRACE` forces trace, otherwise the
/// configured level applies.
fn init_logging(logging: &LoggingSettings) {
    let default_filter = if std::env::var("MCPMAN_TRACE").is_ok() {
        "trace".to_string()
    } else {
        format!("mcpman={level},mcpman_server={level},mcpman_mcp={level},mcpman_script={level},mcpman_surface={level},mcpman_config={level}", level = logging.level.as_str())
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
