//! # jam-relay
//!
//! Real-time WebSocket fan-out relay for collaborative jam sessions.
//!
//! Every participant of a session holds one WebSocket connection. Each
//! binary envelope a participant sends is validated and broadcast to
//! every connection of the same session. The relay never interprets
//! payloads and never persists them.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── Upgrade Handler (ws/)        REST Handlers (api/)
//!     │
//!     ├── HubRegistry (registry)       session → hub, idle cleanup
//!     │
//!     ├── Hub (hub/)                   one event loop per session
//!     │       └── Membership           connection set, fan-out, eviction
//!     │
//!     ├── Connection (transport/)      read loop, write loop, keepalive
//!     │
//!     └── Envelope Codec (envelope)    4-byte header + payload
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod identity;
pub mod registry;
pub mod transport;
pub mod ws;
