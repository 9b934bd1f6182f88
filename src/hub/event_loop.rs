//! Single-owner event loop of a session hub.
//!
//! [`Hub`] is a cheap, clonable handle. Every operation becomes a
//! [`HubEvent`] on a bounded queue; one task per session owns the
//! [`Membership`] and applies events strictly in arrival order.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::HubError;
use super::membership::{Delivery, HubStats, Membership};
use crate::config::HubConfig;
use crate::domain::{ConnectionId, SessionId};
use crate::envelope::Envelope;
use crate::transport::{CloseReason, ConnectionHandle};

/// Work submitted to the hub loop.
#[derive(Debug)]
enum HubEvent {
    Register {
        handle: ConnectionHandle,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Unregister {
        id: ConnectionId,
    },
    Broadcast {
        from: ConnectionId,
        envelope: Envelope,
        delivery: Delivery,
    },
    Admit {
        reply: oneshot::Sender<Result<HubStats, HubError>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    SetCapacity {
        capacity: usize,
    },
    Retire {
        grace: Duration,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Handle to a running session hub.
///
/// The hub loop stops on [`Hub::shutdown`], on a successful
/// [`Hub::retire_if_idle`], or when every handle has been dropped.
/// Stopping evicts all members with [`CloseReason::SessionClosed`].
#[derive(Debug, Clone)]
pub struct Hub {
    session_id: SessionId,
    delivery: Delivery,
    events: mpsc::Sender<HubEvent>,
}

impl Hub {
    /// Starts the event loop for `session_id`. `capacity` 0 means
    /// unbounded.
    #[must_use]
    pub fn spawn(session_id: SessionId, capacity: usize, config: &HubConfig) -> Self {
        let (events, rx) = mpsc::channel(config.event_capacity.max(1));
        let membership = Membership::new(session_id, capacity);
        tokio::spawn(run(membership, rx));
        tracing::info!(%session_id, capacity, "hub started");
        Self {
            session_id,
            delivery: Delivery::from_echo(config.echo),
            events,
        }
    }

    /// Session served by this hub.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// `true` once the hub loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// `true` if both handles drive the same hub loop.
    #[must_use]
    pub fn same_hub(&self, other: &Self) -> bool {
        self.events.same_channel(&other.events)
    }

    /// Adds a connection to the session.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::CapacityExceeded`] if the session is full, or
    /// [`HubError::Closed`] if the hub has stopped.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Register { handle, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Removes a connection. Safe to call repeatedly and after the hub
    /// has stopped.
    pub async fn unregister(&self, id: ConnectionId) {
        let _ = self.send(HubEvent::Unregister { id }).await;
    }

    /// Fans `envelope` out using the hub's default delivery mode.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn broadcast(&self, from: ConnectionId, envelope: Envelope) -> Result<(), HubError> {
        self.broadcast_with(from, envelope, self.delivery).await
    }

    /// Fans `envelope` out with an explicit delivery mode.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn broadcast_with(
        &self,
        from: ConnectionId,
        envelope: Envelope,
        delivery: Delivery,
    ) -> Result<(), HubError> {
        self.send(HubEvent::Broadcast {
            from,
            envelope,
            delivery,
        })
        .await
    }

    /// Checks that a new participant would fit, and restarts the idle
    /// clock so the hub is not retired while the upgrade completes.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::CapacityExceeded`] if the session is full, or
    /// [`HubError::Closed`] if the hub has stopped.
    pub async fn admit(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Admit { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Current membership snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Changes the connection limit for future registrations.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn set_capacity(&self, capacity: usize) -> Result<(), HubError> {
        self.send(HubEvent::SetCapacity { capacity }).await
    }

    /// Stops the hub if it has been empty for at least `grace`.
    ///
    /// Returns `true` if the hub is stopped after the call.
    pub async fn retire_if_idle(&self, grace: Duration) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.send(HubEvent::Retire { grace, reply }).await.is_err() {
            return true;
        }
        rx.await.unwrap_or(true)
    }

    /// Stops the hub, closing every member connection.
    pub async fn shutdown(&self) {
        let _ = self.send(HubEvent::Shutdown).await;
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }
}

async fn run(mut membership: Membership, mut events: mpsc::Receiver<HubEvent>) {
    let session_id = membership.session_id();

    while let Some(event) = events.recv().await {
        match event {
            HubEvent::Register { handle, reply } => {
                let result = membership.register(handle);
                if let Err(err) = &result {
                    tracing::info!(%session_id, error = %err, "registration refused");
                }
                let _ = reply.send(result);
            }
            HubEvent::Unregister { id } => {
                membership.unregister(id, CloseReason::PeerClosed);
            }
            HubEvent::Broadcast {
                from,
                envelope,
                delivery,
            } => {
                let outcome = membership.broadcast(from, &envelope, delivery);
                tracing::trace!(
                    %session_id,
                    %from,
                    kind = %envelope.kind(),
                    bytes = envelope.encoded_len(),
                    delivered = outcome.delivered,
                    evicted = outcome.evicted.len(),
                    "broadcast"
                );
            }
            HubEvent::Admit { reply } => {
                let result = if membership.is_full() {
                    Err(HubError::CapacityExceeded {
                        capacity: membership.stats().capacity,
                    })
                } else {
                    membership.touch();
                    Ok(membership.stats())
                };
                let _ = reply.send(result);
            }
            HubEvent::Stats { reply } => {
                let _ = reply.send(membership.stats());
            }
            HubEvent::SetCapacity { capacity } => {
                membership.set_capacity(capacity);
            }
            HubEvent::Retire { grace, reply } => {
                let idle = membership
                    .idle_for()
                    .is_some_and(|idle| idle >= grace && membership.is_empty());
                let _ = reply.send(idle);
                if idle {
                    tracing::info!(%session_id, "hub retired after idle grace period");
                    break;
                }
            }
            HubEvent::Shutdown => break,
        }
    }

    // Refuse anything still queued; pending callers observe `Closed`.
    events.close();
    membership.close_all(CloseReason::SessionClosed);
    tracing::info!(%session_id, "hub stopped");
}
