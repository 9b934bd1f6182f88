//! Participant identity seam.
//!
//! Authentication happens outside the relay (an OAuth/OIDC front end or
//! an auth proxy). By the time an upgrade request reaches the relay, an
//! [`IdentityResolver`] only has to turn the request headers into a
//! [`Participant`] or refuse it.

use std::fmt;

use axum::http::HeaderMap;

use crate::domain::ParticipantId;
use crate::error::RelayError;

/// Header set by an authenticating proxy in front of the relay.
pub const PARTICIPANT_HEADER: &str = "x-participant-id";

/// An authenticated participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Stable participant identifier.
    pub id: ParticipantId,
}

/// Resolves an upgrade request to a participant.
pub trait IdentityResolver: fmt::Debug + Send + Sync {
    /// Identifies the caller of an upgrade request.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Unauthorized`] when the request carries no
    /// acceptable identity.
    fn resolve(&self, headers: &HeaderMap) -> Result<Participant, RelayError>;
}

/// Accepts everyone, assigning each connection a fresh participant id.
///
/// For local development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousIdentity;

impl IdentityResolver for AnonymousIdentity {
    fn resolve(&self, _headers: &HeaderMap) -> Result<Participant, RelayError> {
        Ok(Participant {
            id: ParticipantId::new(),
        })
    }
}

/// Trusts the [`PARTICIPANT_HEADER`] set by an upstream auth proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderIdentity;

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, headers: &HeaderMap) -> Result<Participant, RelayError> {
        let value = headers
            .get(PARTICIPANT_HEADER)
            .ok_or_else(|| RelayError::Unauthorized(format!("missing {PARTICIPANT_HEADER}")))?;
        let id = value
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse::<ParticipantId>().ok())
            .ok_or_else(|| RelayError::Unauthorized(format!("malformed {PARTICIPANT_HEADER}")))?;
        Ok(Participant { id })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn anonymous_assigns_distinct_ids() {
        let headers = HeaderMap::new();
        let (Ok(a), Ok(b)) = (
            AnonymousIdentity.resolve(&headers),
            AnonymousIdentity.resolve(&headers),
        ) else {
            panic!("anonymous identity never fails");
        };
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn header_identity_reads_proxy_header() {
        let id = ParticipantId::new();
        let mut headers = HeaderMap::new();
        let Ok(value) = HeaderValue::from_str(&id.to_string()) else {
            panic!("uuid is a valid header value");
        };
        headers.insert(PARTICIPANT_HEADER, value);

        let Ok(participant) = HeaderIdentity.resolve(&headers) else {
            panic!("header identity resolves");
        };
        assert_eq!(participant.id, id);
    }

    #[test]
    fn header_identity_rejects_missing_or_bad_header() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            HeaderIdentity.resolve(&headers),
            Err(RelayError::Unauthorized(_))
        ));

        headers.insert(PARTICIPANT_HEADER, HeaderValue::from_static("someone"));
        assert!(matches!(
            HeaderIdentity.resolve(&headers),
            Err(RelayError::Unauthorized(_))
        ));
    }
}
