//! Transport layer: the single reconnecting socket to the real-time server.
//!
//! [`TransportAdapter`] is a leaf component. It knows nothing about update
//! semantics; it only moves `{event, data}` frames and reports connection
//! state.

pub mod adapter;
pub mod backoff;
pub mod listeners;
pub mod messages;
pub mod status;

pub use adapter::{TransportAdapter, TransportConfig};
pub use backoff::ReconnectPolicy;
pub use listeners::{EventHandler, ListenerRegistry};
pub use messages::{OutboundMessage, WireMessage};
pub use status::ConnectionStatus;
