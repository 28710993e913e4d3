//! # cv-realtime
//!
//! Real-time update distribution for the CV builder.
//!
//! One [`TransportAdapter`](transport::TransportAdapter) owns the socket to
//! the server. One [`UpdateHub`](hub::UpdateHub) sits on top of it, drops
//! duplicate and out-of-order change notifications, keeps a short history
//! and fans accepted updates out to any number of consumers, each of which
//! decides on its own whether to refetch.
//!
//! ## Architecture
//!
//! ```text
//! Server (WebSocket)
//!     │  data-updated / notification
//!     ├── TransportAdapter (transport/)   reconnect, auth-on-connect
//!     │
//!     ├── UpdateHub (hub/)                decode, dedupe, order, history
//!     │     └── UpdateLedger, UpdateBus (domain/)
//!     │
//!     └── Consumers (consumer/)           filtered subscriptions, refresh gate
//! ```
//!
//! The [`relay`] module is a small server speaking the same protocol, used
//! for local development and integration tests.

pub mod clock;
pub mod config;
pub mod consumer;
pub mod domain;
pub mod error;
pub mod hub;
pub mod relay;
pub mod transport;

mod sync;
