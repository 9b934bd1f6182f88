//! WebSocket entry point.
//!
//! The endpoint at `/ws` is the seam between the HTTP router and the
//! relay core: it resolves the participant, checks session capacity and
//! only then upgrades, handing the socket to [`crate::transport::serve`].

pub mod handler;
