//! Axum WebSocket upgrade handler.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::app_state::AppState;
use crate::domain::SessionId;
use crate::envelope::MAX_FRAME_LEN;
use crate::error::{ErrorResponse, RelayError};
use crate::transport::serve;

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConnectParams {
    /// Session to join (UUID).
    pub session: Option<String>,
}

impl ConnectParams {
    /// Extracts and validates the session identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MissingSession`] if absent or blank, and
    /// [`RelayError::InvalidSession`] if it is not a UUID.
    pub fn session_id(&self) -> Result<SessionId, RelayError> {
        let raw = self
            .session
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(RelayError::MissingSession)?;
        raw.parse()
            .map_err(|_| RelayError::InvalidSession(raw.to_string()))
    }
}

/// `GET /ws?session={id}`: Join a session over WebSocket.
///
/// Capacity is checked before upgrading, so a full session costs the
/// rejected client nothing beyond the HTTP response.
///
/// # Errors
///
/// Returns [`RelayError`] when the session is missing or invalid, the
/// identity is rejected, or the session is full.
#[utoipa::path(
    get,
    path = "/ws",
    tag = "Sessions",
    summary = "Join a session",
    description = "Upgrades to a WebSocket carrying binary envelopes. Every envelope received is broadcast to the session.",
    params(ConnectParams),
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 400, description = "Missing or invalid session", body = ErrorResponse),
        (status = 401, description = "Identity rejected", body = ErrorResponse),
        (status = 503, description = "Session at capacity", body = ErrorResponse),
    )
)]
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, RelayError> {
    let session_id = params.session_id()?;
    let participant = state.identity.resolve(&headers)?;
    let hub = state.registry.admit(session_id).await.inspect_err(|err| {
        tracing::info!(%session_id, participant = %participant.id, error = %err, "upgrade refused");
    })?;
    let config = state.connection;

    Ok(ws
        .max_message_size(MAX_FRAME_LEN)
        .on_upgrade(move |socket| serve(socket, session_id, participant.id, hub, config))
        .into_response())
}
