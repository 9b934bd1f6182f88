//! Session hub: the single authority over one session's connections.
//!
//! Membership is mutated only inside the hub's event loop; connections
//! and the registry talk to it exclusively through [`Hub`] events.
//! Broadcast never waits on a recipient: a full outbound queue gets its
//! connection evicted instead.

pub mod event_loop;
pub mod membership;

pub use event_loop::Hub;
pub use membership::{BroadcastOutcome, Delivery, HubStats, Membership};

/// Errors returned by hub operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The session already holds its maximum number of connections.
    #[error("session is full ({capacity} connections)")]
    CapacityExceeded {
        /// Configured connection limit.
        capacity: usize,
    },

    /// The hub loop has stopped.
    #[error("session hub is closed")]
    Closed,
}
