//! Helpers for consumers of the hub: filtered subscriptions and refetch
//! throttling.

pub mod refresh_gate;
pub mod subscription;

pub use refresh_gate::RefreshGate;
pub use subscription::{DataTypeFilter, DataTypeSubscription};
