//! Domain layer: update events, the dedup/ordering ledger and the
//! broadcast bus.
//!
//! Everything here is transport-agnostic and synchronous apart from the
//! bus receivers.

pub mod listener_id;
pub mod update_bus;
pub mod update_event;
pub mod update_ledger;
pub mod user_id;

pub use listener_id::ListenerId;
pub use update_bus::{BusStats, UpdateBus};
pub use update_event::{HubEvent, Notification, UpdateEvent};
pub use update_ledger::{Admission, CursorScope, UpdateLedger};
pub use user_id::UserId;
