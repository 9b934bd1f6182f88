//! Session endpoints used by the session owner's service.
//!
//! Session records live in an external store; these routes only let that
//! store tell the relay when a jam opens (with its capacity) or ends, and
//! expose live membership counts.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::domain::SessionId;
use crate::error::{ErrorResponse, RelayError};
use crate::hub::HubStats;

/// Body of `PUT /sessions/{session_id}`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenSessionRequest {
    /// Maximum concurrent connections (0 = unbounded).
    pub capacity: usize,
}

/// `GET /sessions/{session_id}`: Live membership of a session.
///
/// # Errors
///
/// Returns [`RelayError::SessionNotFound`] if the session has no hub.
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}",
    tag = "Sessions",
    summary = "Get session stats",
    params(("session_id" = SessionId, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session is live", body = HubStats),
        (status = 404, description = "No such live session", body = ErrorResponse),
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<impl IntoResponse, RelayError> {
    let stats = state
        .registry
        .stats(session_id)
        .await
        .ok_or(RelayError::SessionNotFound(session_id))?;
    Ok(Json(stats))
}

/// `PUT /sessions/{session_id}`: Open a session with a capacity.
///
/// Creates the hub ahead of the first participant, or updates the
/// capacity of a live one.
///
/// # Errors
///
/// Returns [`RelayError::SessionClosed`] if the hub stopped while being
/// configured.
#[utoipa::path(
    put,
    path = "/api/v1/sessions/{session_id}",
    tag = "Sessions",
    summary = "Open a session",
    params(("session_id" = SessionId, Path, description = "Session identifier")),
    request_body = OpenSessionRequest,
    responses(
        (status = 200, description = "Session is open", body = HubStats),
        (status = 503, description = "Session unavailable", body = ErrorResponse),
    )
)]
pub async fn open_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(req): Json<OpenSessionRequest>,
) -> Result<impl IntoResponse, RelayError> {
    let hub = state.registry.open_session(session_id, req.capacity).await;
    let stats = hub.stats().await?;
    tracing::info!(%session_id, capacity = req.capacity, "session opened");
    Ok(Json(stats))
}

/// `DELETE /sessions/{session_id}`: End a session.
///
/// Closes every participant connection of the session.
///
/// # Errors
///
/// Returns [`RelayError::SessionNotFound`] if the session has no hub.
#[utoipa::path(
    delete,
    path = "/api/v1/sessions/{session_id}",
    tag = "Sessions",
    summary = "Close a session",
    params(("session_id" = SessionId, Path, description = "Session identifier")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "No such live session", body = ErrorResponse),
    )
)]
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<impl IntoResponse, RelayError> {
    if state.registry.close_session(session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RelayError::SessionNotFound(session_id))
    }
}

/// Session routes, nested under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/sessions/{session_id}",
        get(get_session).put(open_session).delete(close_session),
    )
}
