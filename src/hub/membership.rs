//! Connection set of one session and the broadcast policy applied to it.
//!
//! [`Membership`] is plain synchronous state. Only the hub event loop
//! holds it, which serializes every register, unregister and broadcast
//! without a lock. Tests drive it directly to assert exact ordering.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use utoipa::ToSchema;

use super::HubError;
use crate::domain::{ConnectionId, SessionId};
use crate::envelope::Envelope;
use crate::transport::{CloseReason, ConnectionHandle, EnqueueError};

/// Which members receive a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Every member, including the sender (authoritative echo).
    #[default]
    All,
    /// Every member except the sender.
    Others,
}

impl Delivery {
    /// Maps the echo setting to a delivery mode.
    #[must_use]
    pub const fn from_echo(echo: bool) -> Self {
        if echo { Self::All } else { Self::Others }
    }
}

/// Result of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Members the frame was queued for.
    pub delivered: usize,
    /// Members evicted during this broadcast.
    pub evicted: Vec<ConnectionId>,
}

/// Point-in-time view of a hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct HubStats {
    /// Session served by the hub.
    pub session_id: SessionId,
    /// Currently registered connections.
    pub connections: usize,
    /// Connection limit (0 = unbounded).
    pub capacity: usize,
    /// When the hub was created.
    pub created_at: DateTime<Utc>,
}

/// Registered connections of one session.
#[derive(Debug)]
pub struct Membership {
    session_id: SessionId,
    capacity: usize,
    members: HashMap<ConnectionId, ConnectionHandle>,
    created_at: DateTime<Utc>,
    idle_since: Option<Instant>,
}

impl Membership {
    /// Creates an empty membership. `capacity` 0 means unbounded.
    #[must_use]
    pub fn new(session_id: SessionId, capacity: usize) -> Self {
        Self {
            session_id,
            capacity,
            members: HashMap::new(),
            created_at: Utc::now(),
            idle_since: Some(Instant::now()),
        }
    }

    /// Session this membership belongs to.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// `true` when nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    /// `true` when a bounded hub has no free slot.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.capacity != 0 && self.members.len() >= self.capacity
    }

    /// Changes the connection limit. Existing members are kept even if
    /// the new limit is lower.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Adds a connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::CapacityExceeded`] if the hub is full; the
    /// handle is dropped, which closes its outbound queue.
    pub fn register(&mut self, handle: ConnectionHandle) -> Result<(), HubError> {
        if self.is_full() {
            return Err(HubError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        tracing::debug!(
            session_id = %self.session_id,
            connection_id = %handle.id(),
            members = self.members.len() + 1,
            "member joined"
        );
        self.members.insert(handle.id(), handle);
        self.idle_since = None;
        Ok(())
    }

    /// Removes a connection and closes its queue. Idempotent: returns
    /// `false` if `id` was not registered.
    pub fn unregister(&mut self, id: ConnectionId, reason: CloseReason) -> bool {
        let Some(handle) = self.members.remove(&id) else {
            return false;
        };
        handle.evict(reason);
        tracing::debug!(
            session_id = %self.session_id,
            connection_id = %id,
            %reason,
            members = self.members.len(),
            "member left"
        );
        self.mark_idle_if_empty();
        true
    }

    /// Queues `envelope` for every member selected by `delivery`.
    ///
    /// Never waits: a member whose queue is full is evicted as a slow
    /// consumer and the broadcast continues with the rest.
    pub fn broadcast(
        &mut self,
        from: ConnectionId,
        envelope: &Envelope,
        delivery: Delivery,
    ) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        if self.members.is_empty() {
            return outcome;
        }

        let frame = envelope.encode();
        let mut evicted = Vec::new();
        for (id, member) in &self.members {
            if delivery == Delivery::Others && *id == from {
                continue;
            }
            match member.try_enqueue(frame.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(EnqueueError::Full) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        connection_id = %id,
                        "slow consumer evicted"
                    );
                    evicted.push((*id, CloseReason::SlowConsumer));
                }
                Err(EnqueueError::Closed) => evicted.push((*id, CloseReason::Transport)),
            }
        }

        for (id, reason) in evicted {
            if let Some(handle) = self.members.remove(&id) {
                handle.evict(reason);
                outcome.evicted.push(id);
            }
        }
        self.mark_idle_if_empty();
        outcome
    }

    /// Evicts every member with `reason`.
    pub fn close_all(&mut self, reason: CloseReason) {
        for (_, handle) in self.members.drain() {
            handle.evict(reason);
        }
        self.mark_idle_if_empty();
    }

    /// Restarts the idle clock of an empty hub; called when a new
    /// participant is about to join.
    pub fn touch(&mut self) {
        if self.members.is_empty() {
            self.idle_since = Some(Instant::now());
        }
    }

    /// How long the hub has been continuously empty.
    #[must_use]
    pub fn idle_for(&self) -> Option<Duration> {
        self.idle_since.map(|since| since.elapsed())
    }

    /// Snapshot for monitoring and admission.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            session_id: self.session_id,
            connections: self.members.len(),
            capacity: self.capacity,
            created_at: self.created_at,
        }
    }

    fn mark_idle_if_empty(&mut self) {
        if self.members.is_empty() && self.idle_since.is_none() {
            self.idle_since = Some(Instant::now());
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::ParticipantId;
    use crate::envelope::{MessageType, Version};
    use crate::transport::{Connection, ConnectionState};

    struct Member {
        id: ConnectionId,
        connection: Connection,
        rx: mpsc::Receiver<Bytes>,
    }

    fn join(hub: &mut Membership, queue: usize) -> Member {
        let (handle, rx) = ConnectionHandle::channel(ParticipantId::new(), queue);
        let connection = handle.connection().clone();
        let id = handle.id();
        let Ok(()) = hub.register(handle) else {
            panic!("registration should succeed");
        };
        Member { id, connection, rx }
    }

    fn message(text: &str) -> Envelope {
        let Ok(env) = Envelope::new(Version::V1, MessageType::Text, text.to_string()) else {
            panic!("small payload");
        };
        env
    }

    #[test]
    fn capacity_admits_n_and_rejects_next() {
        let mut hub = Membership::new(SessionId::new(), 3);
        for _ in 0..3 {
            join(&mut hub, 4);
        }
        let (extra, _rx) = ConnectionHandle::channel(ParticipantId::new(), 4);
        let extra_conn = extra.connection().clone();
        assert_eq!(
            hub.register(extra),
            Err(HubError::CapacityExceeded { capacity: 3 })
        );
        assert_eq!(hub.len(), 3);
        assert_eq!(extra_conn.state(), ConnectionState::Open);
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let mut hub = Membership::new(SessionId::new(), 0);
        for _ in 0..100 {
            join(&mut hub, 1);
        }
        assert!(!hub.is_full());
        assert_eq!(hub.len(), 100);
    }

    #[test]
    fn broadcast_reaches_everyone_including_sender() {
        let mut hub = Membership::new(SessionId::new(), 0);
        let mut a = join(&mut hub, 4);
        let mut b = join(&mut hub, 4);
        let mut c = join(&mut hub, 4);

        let msg = message("riff");
        let outcome = hub.broadcast(a.id, &msg, Delivery::All);

        assert_eq!(outcome.delivered, 3);
        assert!(outcome.evicted.is_empty());
        let expected = msg.encode();
        for member in [&mut a, &mut b, &mut c] {
            let Ok(frame) = member.rx.try_recv() else {
                panic!("every member receives the broadcast");
            };
            assert_eq!(frame, expected);
        }
    }

    #[test]
    fn broadcast_to_others_skips_sender() {
        let mut hub = Membership::new(SessionId::new(), 0);
        let mut a = join(&mut hub, 4);
        let mut b = join(&mut hub, 4);
        let mut c = join(&mut hub, 4);

        let outcome = hub.broadcast(a.id, &message("riff"), Delivery::Others);

        assert_eq!(outcome.delivered, 2);
        assert!(a.rx.try_recv().is_err());
        assert!(b.rx.try_recv().is_ok());
        assert!(c.rx.try_recv().is_ok());
    }

    #[test]
    fn slow_consumer_is_evicted_others_still_served() {
        let mut hub = Membership::new(SessionId::new(), 0);
        let mut a = join(&mut hub, 1);
        let b = join(&mut hub, 1);
        let mut c = join(&mut hub, 1);

        hub.broadcast(a.id, &message("one"), Delivery::All);
        // A and C keep up; B never drains.
        assert!(a.rx.try_recv().is_ok());
        assert!(c.rx.try_recv().is_ok());

        let outcome = hub.broadcast(a.id, &message("two"), Delivery::All);

        assert_eq!(outcome.evicted, vec![b.id]);
        assert_eq!(outcome.delivered, 2);
        assert!(!hub.contains(b.id));
        assert_eq!(
            b.connection.state(),
            ConnectionState::Closing(CloseReason::SlowConsumer)
        );
        let Ok(frame) = c.rx.try_recv() else {
            panic!("C still receives after B is evicted");
        };
        assert_eq!(frame, message("two").encode());
    }

    #[test]
    fn member_with_closed_queue_is_dropped() {
        let mut hub = Membership::new(SessionId::new(), 0);
        let a = join(&mut hub, 2);
        let b = join(&mut hub, 2);
        drop(b.rx);

        let outcome = hub.broadcast(a.id, &message("x"), Delivery::All);
        assert_eq!(outcome.evicted, vec![b.id]);
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn broadcast_to_empty_hub_is_noop() {
        let mut hub = Membership::new(SessionId::new(), 0);
        let outcome = hub.broadcast(ConnectionId::new(), &message("x"), Delivery::All);
        assert_eq!(outcome, BroadcastOutcome::default());
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut hub = Membership::new(SessionId::new(), 0);
        let a = join(&mut hub, 2);
        let mut b = join(&mut hub, 2);

        assert!(hub.unregister(a.id, CloseReason::PeerClosed));
        assert!(!hub.unregister(a.id, CloseReason::PeerClosed));
        assert!(!hub.unregister(ConnectionId::new(), CloseReason::PeerClosed));

        assert_eq!(hub.len(), 1);
        assert!(hub.contains(b.id));
        assert_eq!(
            a.connection.state(),
            ConnectionState::Closing(CloseReason::PeerClosed)
        );
        hub.broadcast(b.id, &message("still here"), Delivery::All);
        assert!(b.rx.try_recv().is_ok());
    }

    #[test]
    fn unregister_frees_a_slot() {
        let mut hub = Membership::new(SessionId::new(), 1);
        let a = join(&mut hub, 1);
        assert!(hub.is_full());
        hub.unregister(a.id, CloseReason::PeerClosed);
        join(&mut hub, 1);
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn per_sender_order_is_preserved() {
        let mut hub = Membership::new(SessionId::new(), 0);
        let a = join(&mut hub, 8);
        let b = join(&mut hub, 8);
        let mut c = join(&mut hub, 8);

        hub.broadcast(a.id, &message("a1"), Delivery::Others);
        hub.broadcast(b.id, &message("b1"), Delivery::Others);
        hub.broadcast(a.id, &message("a2"), Delivery::Others);

        let received: Vec<Bytes> = std::iter::from_fn(|| c.rx.try_recv().ok()).collect();
        assert_eq!(
            received,
            vec![
                message("a1").encode(),
                message("b1").encode(),
                message("a2").encode()
            ]
        );
    }

    #[test]
    fn close_all_evicts_everyone() {
        let mut hub = Membership::new(SessionId::new(), 0);
        let a = join(&mut hub, 1);
        let b = join(&mut hub, 1);
        hub.close_all(CloseReason::SessionClosed);

        assert!(hub.is_empty());
        for member in [a, b] {
            assert_eq!(
                member.connection.state(),
                ConnectionState::Closing(CloseReason::SessionClosed)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_clock_tracks_emptiness() {
        let mut hub = Membership::new(SessionId::new(), 0);
        assert!(hub.idle_for().is_some());

        let a = join(&mut hub, 1);
        assert_eq!(hub.idle_for(), None);

        hub.unregister(a.id, CloseReason::PeerClosed);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(hub.idle_for(), Some(Duration::from_secs(5)));

        hub.touch();
        assert_eq!(hub.idle_for(), Some(Duration::ZERO));
    }
}
