//! Domain identifiers shared by every layer.

pub mod ids;

pub use ids::{ConnectionId, ParticipantId, SessionId};
