//! Snapshot of the adapter's connection state.

use serde::Serialize;

use crate::domain::UserId;

/// Locally cached connection state, readable without touching the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// A socket is currently open.
    #[serde(rename = "isConnected")]
    pub connected: bool,
    /// User the open socket is authenticated as. Always `None` while
    /// disconnected.
    pub user_id: Option<UserId>,
    /// Consecutive failed attempts since the last successful connect.
    pub reconnect_attempts: u32,
}
