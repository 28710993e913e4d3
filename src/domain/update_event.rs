//! Change notifications received from the server and the events the hub
//! republishes to consumers.
//!
//! An [`UpdateEvent`] says "data of category `data_type` changed at
//! `timestamp`". The hub accepts or drops it (see [`super::UpdateLedger`])
//! and broadcasts accepted ones as [`HubEvent::Updated`] through the
//! [`super::UpdateBus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::RealtimeError;

/// Notification that some category of server-side data changed.
///
/// Wire shape (camelCase):
/// ```json
/// { "dataType": "photo", "timestamp": 1718000000000, "payload": { "id": "p1" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    /// Category key, e.g. `"personal-info"` or `"photo"`.
    pub data_type: String,
    /// Server-assigned timestamp in milliseconds since the Unix epoch.
    /// Integral floats (`1718000000000.0`) are accepted on decode.
    #[serde(deserialize_with = "integral_millis")]
    pub timestamp: i64,
    /// Category-specific body. Never interpreted by the hub.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl UpdateEvent {
    /// Creates an event with an empty payload.
    #[must_use]
    pub fn new(data_type: impl Into<String>, timestamp: i64) -> Self {
        Self {
            data_type: data_type.into(),
            timestamp,
            payload: serde_json::Map::new(),
        }
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Decodes and validates a raw `data-updated` payload.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::MalformedEvent`] if a required field is
    /// missing or mistyped, or if `dataType` is empty.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, RealtimeError> {
        let event = Self::deserialize(value)
            .map_err(|e| RealtimeError::MalformedEvent(e.to_string()))?;
        if event.data_type.trim().is_empty() {
            return Err(RealtimeError::MalformedEvent(
                "dataType must not be empty".to_string(),
            ));
        }
        Ok(event)
    }
}

fn null_as_empty<'de, D>(
    deserializer: D,
) -> Result<serde_json::Map<String, serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = Option::<serde_json::Map<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(map.unwrap_or_default())
}

fn integral_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(millis) = number.as_i64() {
        return Ok(millis);
    }
    match number.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() <= 9.0e18 => Ok(f as i64),
        _ => Err(serde::de::Error::custom(format!(
            "timestamp must be whole milliseconds, got {number}"
        ))),
    }
}

/// Fire-and-forget message from the server (toast content and the like).
///
/// Not retained in history and never deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Raw payload as sent by the server.
    pub payload: serde_json::Value,
    /// Local receipt time.
    pub received_at: DateTime<Utc>,
}

impl Notification {
    /// Wraps a payload stamped with the current time.
    #[must_use]
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Event published by the hub to its consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HubEvent {
    /// An update passed dedup and ordering checks and became `last_update`.
    Updated(UpdateEvent),
    /// A notification arrived.
    Notification(Notification),
    /// The retained history was cleared.
    HistoryCleared,
}

impl HubEvent {
    /// Returns the accepted update, if this is an [`HubEvent::Updated`].
    #[must_use]
    pub fn as_update(&self) -> Option<&UpdateEvent> {
        match self {
            Self::Updated(event) => Some(event),
            Self::Notification(_) | Self::HistoryCleared => None,
        }
    }

    /// Returns the event kind as a static string slice.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::Updated(_) => "updated",
            Self::Notification(_) => "notification",
            Self::HistoryCleared => "history_cleared",
        }
    }
}
