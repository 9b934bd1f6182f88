//! Hub-side handle to a connection's outbound queue.

use bytes::Bytes;
use tokio::sync::mpsc;

use super::state::{CloseReason, Connection};
use crate::domain::{ConnectionId, ParticipantId};

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// Queue is at capacity: the peer is not keeping up.
    #[error("outbound queue full")]
    Full,
    /// Write loop has already exited.
    #[error("outbound queue closed")]
    Closed,
}

/// The part of a connection owned by its hub.
///
/// Holds the only sender of the connection's bounded outbound queue, so
/// dropping the handle closes the queue. Pushes never block.
#[derive(Debug)]
pub struct ConnectionHandle {
    connection: Connection,
    outbound: mpsc::Sender<Bytes>,
}

impl ConnectionHandle {
    /// Creates a connection with an outbound queue of `capacity` frames.
    ///
    /// Returns the hub-side handle and the receiver drained by the write
    /// loop.
    #[must_use]
    pub fn channel(participant: ParticipantId, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            connection: Connection::new(participant),
            outbound,
        };
        (handle, rx)
    }

    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Shared connection state.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Pushes a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] when the queue is at capacity and
    /// [`EnqueueError::Closed`] when the write loop is gone.
    pub fn try_enqueue(&self, frame: Bytes) -> Result<(), EnqueueError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Requests shutdown and closes the outbound queue.
    ///
    /// Frames still queued are discarded; the write loop sends a close
    /// frame instead of draining them.
    pub fn evict(self, reason: CloseReason) {
        self.connection.begin_close(reason);
    }
}
