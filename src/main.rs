//! jam-relay server entry point.
//!
//! Starts the Axum HTTP server with the WebSocket relay and REST endpoints.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use jam_relay::api;
use jam_relay::app_state::AppState;
use jam_relay::config::RelayConfig;
use jam_relay::identity::{AnonymousIdentity, HeaderIdentity, IdentityResolver};
use jam_relay::registry::HubRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = RelayConfig::from_env().context("invalid configuration")?;
    tracing::info!(addr = %config.listen_addr, "starting jam-relay");

    // Session hubs
    let registry = Arc::new(HubRegistry::new(&config));
    let cleanup = registry.spawn_cleanup_task();

    let identity: Arc<dyn IdentityResolver> = if config.trust_participant_header {
        Arc::new(HeaderIdentity)
    } else {
        Arc::new(AnonymousIdentity)
    };

    let app_state = AppState {
        registry: Arc::clone(&registry),
        identity,
        connection: config.connection,
    };
    let app = api::build_app(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&registry)))
        .await?;

    cleanup.abort();
    tracing::info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl-C after closing every session, so upgraded
/// connections end with a going-away close frame instead of holding the
/// server open.
async fn shutdown_signal(registry: Arc<HubRegistry>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown requested");
    registry.shutdown().await;
}
