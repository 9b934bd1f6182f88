//! Connection lifecycle state shared by the hub and the socket loops.

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::close_code;
use tokio::sync::watch;

use crate::domain::{ConnectionId, ParticipantId};
use crate::envelope::ProtocolError;

/// Why a connection left its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or ended the stream.
    PeerClosed,
    /// Peer sent a malformed envelope.
    ProtocolViolation(ProtocolError),
    /// No pong arrived within the pong wait.
    KeepaliveTimeout,
    /// Outbound queue overflowed; the hub evicted the peer.
    SlowConsumer,
    /// Read, write or write-deadline failure on the stream.
    Transport,
    /// Hub was already at capacity when registration was attempted.
    SessionFull,
    /// Hub shut down or went away.
    SessionClosed,
}

impl CloseReason {
    /// WebSocket close code sent to the peer.
    #[must_use]
    pub const fn close_code(self) -> u16 {
        match self {
            Self::PeerClosed => close_code::NORMAL,
            Self::ProtocolViolation(_) => close_code::PROTOCOL,
            Self::KeepaliveTimeout | Self::SlowConsumer => close_code::POLICY,
            Self::Transport => close_code::ERROR,
            Self::SessionFull => close_code::AGAIN,
            Self::SessionClosed => close_code::AWAY,
        }
    }

    /// Short reason text for the close frame and logs.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::PeerClosed => "closed",
            Self::ProtocolViolation(_) => "protocol violation",
            Self::KeepaliveTimeout => "keepalive timeout",
            Self::SlowConsumer => "slow consumer",
            Self::Transport => "transport error",
            Self::SessionFull => "session full",
            Self::SessionClosed => "session closed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolViolation(err) => write!(f, "protocol violation: {err}"),
            other => f.write_str(other.description()),
        }
    }
}

/// Lifecycle of a connection.
///
/// `Open → Active → Closing → Closed`. Transitions only move forward and
/// the first close reason recorded is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgraded, not yet registered with a hub.
    Open,
    /// Registered; read and write loops running.
    Active,
    /// Shutdown requested; loops are winding down.
    Closing(CloseReason),
    /// Stream closed and loops finished.
    Closed(CloseReason),
}

impl ConnectionState {
    /// `true` once shutdown has been requested.
    #[must_use]
    pub const fn is_closing(&self) -> bool {
        matches!(self, Self::Closing(_) | Self::Closed(_))
    }

    /// The recorded close reason, if any.
    #[must_use]
    pub const fn reason(&self) -> Option<CloseReason> {
        match self {
            Self::Closing(reason) | Self::Closed(reason) => Some(*reason),
            Self::Open | Self::Active => None,
        }
    }
}

/// Identity and lifecycle of one participant socket.
///
/// Cheap to clone; clones share the same state. The hub, the read loop
/// and the write loop each hold one and coordinate shutdown through it.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    participant: ParticipantId,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Connection {
    /// Creates a connection in the [`ConnectionState::Open`] state.
    #[must_use]
    pub fn new(participant: ParticipantId) -> Self {
        let (state, _) = watch::channel(ConnectionState::Open);
        Self {
            id: ConnectionId::new(),
            participant,
            state: Arc::new(state),
        }
    }

    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Participant owning this connection.
    #[must_use]
    pub const fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Moves `Open` to `Active`. Returns `false` if the connection was
    /// already past `Open`.
    pub fn activate(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Open {
                *state = ConnectionState::Active;
                true
            } else {
                false
            }
        })
    }

    /// Requests shutdown. Returns `false` if shutdown was already
    /// requested, in which case the earlier reason is kept.
    pub fn begin_close(&self, reason: CloseReason) -> bool {
        self.state.send_if_modified(|state| match state {
            ConnectionState::Open | ConnectionState::Active => {
                *state = ConnectionState::Closing(reason);
                true
            }
            ConnectionState::Closing(_) | ConnectionState::Closed(_) => false,
        })
    }

    /// Marks the connection terminal and returns the final reason.
    pub fn finish_close(&self, fallback: CloseReason) -> CloseReason {
        let mut reason = fallback;
        self.state.send_if_modified(|state| match *state {
            ConnectionState::Closed(recorded) => {
                reason = recorded;
                false
            }
            ConnectionState::Closing(recorded) => {
                reason = recorded;
                *state = ConnectionState::Closed(recorded);
                true
            }
            ConnectionState::Open | ConnectionState::Active => {
                *state = ConnectionState::Closed(fallback);
                true
            }
        });
        reason
    }
}

/// Resolves once `state` reports shutdown, yielding the recorded reason.
pub(crate) async fn closing(state: &mut watch::Receiver<ConnectionState>) -> CloseReason {
    match state.wait_for(ConnectionState::is_closing).await {
        Ok(current) => current.reason().unwrap_or(CloseReason::SessionClosed),
        // Sender lives inside the `Connection` we were subscribed from.
        Err(_) => CloseReason::SessionClosed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_forward_only() {
        let conn = Connection::new(ParticipantId::new());
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.activate());
        assert!(!conn.activate());
        assert_eq!(conn.state(), ConnectionState::Active);

        assert!(conn.begin_close(CloseReason::SlowConsumer));
        assert!(!conn.begin_close(CloseReason::PeerClosed));
        assert_eq!(
            conn.state(),
            ConnectionState::Closing(CloseReason::SlowConsumer)
        );

        assert_eq!(
            conn.finish_close(CloseReason::Transport),
            CloseReason::SlowConsumer
        );
        assert_eq!(conn.state(), ConnectionState::Closed(CloseReason::SlowConsumer));
        assert!(!conn.activate());
    }

    #[test]
    fn finish_without_close_uses_fallback() {
        let conn = Connection::new(ParticipantId::new());
        assert_eq!(
            conn.finish_close(CloseReason::SessionFull),
            CloseReason::SessionFull
        );
        assert_eq!(conn.state().reason(), Some(CloseReason::SessionFull));
    }

    #[test]
    fn clones_share_state() {
        let conn = Connection::new(ParticipantId::new());
        let other = conn.clone();
        conn.begin_close(CloseReason::KeepaliveTimeout);
        assert!(other.state().is_closing());
        assert_eq!(other.id(), conn.id());
    }

    #[test]
    fn close_codes_follow_rfc6455() {
        assert_eq!(CloseReason::PeerClosed.close_code(), 1000);
        assert_eq!(
            CloseReason::ProtocolViolation(ProtocolError::MissingHeader).close_code(),
            1002
        );
        assert_eq!(CloseReason::SlowConsumer.close_code(), 1008);
        assert_eq!(CloseReason::SessionFull.close_code(), 1013);
    }

    #[tokio::test]
    async fn closing_resolves_after_begin_close() {
        let conn = Connection::new(ParticipantId::new());
        let mut rx = conn.subscribe();
        let waiter = tokio::spawn(async move { closing(&mut rx).await });
        tokio::task::yield_now().await;
        conn.begin_close(CloseReason::Transport);
        let reason = waiter.await.ok();
        assert_eq!(reason, Some(CloseReason::Transport));
    }
}
