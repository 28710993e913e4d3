//! Wire envelope and message types exchanged with the real-time server.
//!
//! Every text frame is a JSON object `{"event": "<name>", "data": <value>}`.
//! The adapter never interprets `data` for inbound events; it hands the raw
//! value to whichever local listeners registered for `event`.

use serde::{Deserialize, Serialize};

use crate::domain::UserId;
use crate::error::RealtimeError;

/// Inbound: a category of server-side data changed.
pub const DATA_UPDATED: &str = "data-updated";
/// Inbound: fire-and-forget notification.
pub const NOTIFICATION: &str = "notification";
/// Local: the socket (re)connected.
pub const CONNECT: &str = "connect";
/// Local: the socket dropped or was closed.
pub const DISCONNECT: &str = "disconnect";
/// Outbound: associates the connection with a user.
pub const AUTHENTICATE: &str = "authenticate";
/// Outbound: heartbeat for the signed-in user.
pub const USER_ACTIVITY: &str = "user-activity";

/// Top-level frame envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Event name.
    pub event: String,
    /// Event-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WireMessage {
    /// Builds an envelope.
    #[must_use]
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::MalformedFrame`] if the text is not a JSON
    /// object with a string `event` field.
    pub fn parse(text: &str) -> Result<Self, RealtimeError> {
        serde_json::from_str(text).map_err(|e| RealtimeError::MalformedFrame(e.to_string()))
    }

    /// Encodes the envelope as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Serialization`] if encoding fails.
    pub fn to_text(&self) -> Result<String, RealtimeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload of both outbound message kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    /// The user the message is about.
    pub user_id: UserId,
}

/// Messages the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// `authenticate {userId}`.
    Authenticate(UserId),
    /// `user-activity {userId}`.
    UserActivity(UserId),
}

impl OutboundMessage {
    /// Returns the wire event name.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Authenticate(_) => AUTHENTICATE,
            Self::UserActivity(_) => USER_ACTIVITY,
        }
    }

    /// Converts into the wire envelope.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Serialization`] if the payload cannot be
    /// encoded.
    pub fn to_wire(&self) -> Result<WireMessage, RealtimeError> {
        let user_id = match self {
            Self::Authenticate(id) | Self::UserActivity(id) => id.clone(),
        };
        let data = serde_json::to_value(UserRef { user_id })?;
        Ok(WireMessage::new(self.event_name(), data))
    }
}
