//! Transport layer: one participant socket, its lifecycle and its loops.
//!
//! A [`Connection`] is split three ways once registered: the hub keeps a
//! [`ConnectionHandle`] (the only sender into the bounded outbound
//! queue), the write loop drains that queue, and the read loop feeds
//! decoded envelopes back to the hub.

pub mod connection;
pub mod handle;
pub mod state;

pub use connection::{read_loop, serve, write_loop};
pub use handle::{ConnectionHandle, EnqueueError};
pub use state::{CloseReason, Connection, ConnectionState};
