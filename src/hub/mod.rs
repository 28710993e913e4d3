//! Update distribution hub: dedup, ordering and fan-out above the
//! transport adapter.

pub mod current_user;
pub mod update_hub;

pub use current_user::CurrentUser;
pub use update_hub::{HubConfig, UpdateHub};
