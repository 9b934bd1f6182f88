//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::identity::IdentityResolver;
use crate::registry::HubRegistry;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live session hubs.
    pub registry: Arc<HubRegistry>,
    /// Resolves upgrade requests to participants.
    pub identity: Arc<dyn IdentityResolver>,
    /// Keepalive and queue settings for new connections.
    pub connection: ConnectionConfig,
}
