//! Crate error types with HTTP status code mapping.
//!
//! [`RealtimeError`] covers every fallible internal operation: configuration
//! loading, event decoding and the relay's HTTP endpoints. The transport
//! adapter and the hub never return it across their public boundary; they
//! log it and carry on.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All relay error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "malformed update event: missing field `timestamp`"
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Crate-wide error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category      | HTTP Status               |
/// |-----------|---------------|---------------------------|
/// | 1000–1999 | Validation    | 400 Bad Request           |
/// | 2000–2999 | Configuration | 500 Internal Server Error |
/// | 3000      | Internal      | 500 Internal Server Error |
/// | 3001–3999 | Transport     | 502 Bad Gateway           |
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// An inbound `data-updated` payload could not be decoded.
    #[error("malformed update event: {0}")]
    MalformedEvent(String),

    /// A wire frame was not a valid `{event, data}` envelope.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A configuration value is present but unusable.
    #[error("invalid configuration for {key}: {reason}")]
    InvalidConfig {
        /// Environment key that failed validation.
        key: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// JSON encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Socket-level failure (connect, read or write).
    #[error("transport error: {0}")]
    Transport(String),

    /// The relay server stopped unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RealtimeError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::MalformedEvent(_) => 1001,
            Self::MalformedFrame(_) => 1002,
            Self::InvalidRequest(_) => 1003,
            Self::Serialization(_) => 1004,
            Self::InvalidConfig { .. } => 2001,
            Self::Transport(_) => 3001,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedEvent(_)
            | Self::MalformedFrame(_)
            | Self::InvalidRequest(_)
            | Self::Serialization(_) => StatusCode::BAD_REQUEST,
            Self::InvalidConfig { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl IntoResponse for RealtimeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
