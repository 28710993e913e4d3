//! Relay HTTP endpoints: event injection, session control, health.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::state::{RelayState, RelayStatsSnapshot};
use crate::domain::{UpdateEvent, UserId};
use crate::error::RealtimeError;

/// Body of `POST /api/v1/updates`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishUpdateRequest {
    /// Category that changed.
    pub data_type: String,
    /// Opaque body forwarded as-is.
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Explicit timestamp, for replaying duplicates or stale events.
    /// Assigned by the relay when absent.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Restrict delivery to sockets authenticated as this user.
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// Body of `POST /api/v1/notifications`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishNotificationRequest {
    /// Opaque body forwarded as-is.
    pub payload: serde_json::Value,
    /// Restrict delivery to sockets authenticated as this user.
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// Response to publish endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Sockets the frame was queued for.
    pub delivered: usize,
    /// Timestamp carried by a published update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Response to `POST /api/v1/sessions/disconnect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectResponse {
    /// Sockets that were told to close.
    pub disconnected: usize,
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    #[serde(flatten)]
    stats: RelayStatsSnapshot,
}

/// `POST /api/v1/updates` — Broadcast a `data-updated` event.
///
/// # Errors
///
/// Returns [`RealtimeError::InvalidRequest`] if `dataType` is blank.
pub async fn publish_update(
    State(state): State<RelayState>,
    Json(req): Json<PublishUpdateRequest>,
) -> Result<impl IntoResponse, RealtimeError> {
    if req.data_type.trim().is_empty() {
        return Err(RealtimeError::InvalidRequest(
            "dataType must not be empty".to_string(),
        ));
    }
    let timestamp = req.timestamp.unwrap_or_else(|| state.next_timestamp());
    let event = UpdateEvent::new(req.data_type, timestamp).with_payload(req.payload);
    let delivered = state.publish_update(req.user_id, &event)?;
    tracing::info!(data_type = %event.data_type, timestamp, delivered, "update published");
    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            delivered,
            timestamp: Some(timestamp),
        }),
    ))
}

/// `POST /api/v1/notifications` — Broadcast a `notification` event.
pub async fn publish_notification(
    State(state): State<RelayState>,
    Json(req): Json<PublishNotificationRequest>,
) -> impl IntoResponse {
    let delivered = state.publish_notification(req.user_id, req.payload);
    (
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            delivered,
            timestamp: None,
        }),
    )
}

/// `POST /api/v1/sessions/disconnect` — Drop every open socket.
pub async fn disconnect_sessions(State(state): State<RelayState>) -> impl IntoResponse {
    let disconnected = state.disconnect_all();
    (StatusCode::OK, Json(DisconnectResponse { disconnected }))
}

/// `GET /health` — Relay health and counters.
pub async fn health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            stats: state.stats().snapshot(),
        }),
    )
}

/// Relay HTTP routes.
pub fn routes() -> Router<RelayState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/updates", post(publish_update))
        .route("/api/v1/notifications", post(publish_notification))
        .route("/api/v1/sessions/disconnect", post(disconnect_sessions))
}
