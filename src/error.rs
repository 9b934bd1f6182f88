//! Relay error types with HTTP status code mapping.
//!
//! [`RelayError`] is what the HTTP surface returns. Connection-level
//! failures never reach it: once a socket is upgraded, errors end that
//! connection only and are reported through logs and close frames.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::SessionId;
use crate::hub::HubError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 4001,
///     "message": "session is full (8 connections)"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                 |
/// |-----------|-----------------|-----------------------------|
/// | 1000–1999 | Request         | 400 Bad Request / 401       |
/// | 2000–2999 | Not Found       | 404 Not Found               |
/// | 4000–4999 | Session Limits  | 503 Service Unavailable     |
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Upgrade request did not name a session.
    #[error("missing session identifier")]
    MissingSession,

    /// Session identifier is not a valid UUID.
    #[error("invalid session identifier: {0}")]
    InvalidSession(String),

    /// Identity resolution rejected the request.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// No hub exists for the session.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session is at capacity.
    #[error("session is full ({capacity} connections)")]
    CapacityExceeded {
        /// Configured connection limit.
        capacity: usize,
    },

    /// Session hub stopped while the request was being handled.
    #[error("session unavailable")]
    SessionClosed,
}

impl RelayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::MissingSession => 1001,
            Self::InvalidSession(_) => 1002,
            Self::Unauthorized(_) => 1101,
            Self::SessionNotFound(_) => 2001,
            Self::CapacityExceeded { .. } => 4001,
            Self::SessionClosed => 4002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSession | Self::InvalidSession(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::CapacityExceeded { .. } | Self::SessionClosed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<HubError> for RelayError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::CapacityExceeded { capacity } => Self::CapacityExceeded { capacity },
            HubError::Closed => Self::SessionClosed,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
