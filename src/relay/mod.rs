//! Development relay server speaking the client protocol.
//!
//! Useful for running the hub locally and for integration tests: clients
//! connect to `/ws`, and events are injected over HTTP.
//!
//! ```text
//! POST /api/v1/updates ─┐
//! POST /api/v1/notifications ─┤→ RelayState (broadcast) → /ws sockets
//! POST /api/v1/sessions/disconnect ─┘
//! ```

pub mod api;
pub mod connection;
pub mod handler;
pub mod state;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::{RelayFrame, RelayState, RelayStats};

use crate::error::RealtimeError;

/// Builds the relay router with HTTP and WebSocket endpoints.
pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .merge(api::routes())
        .route("/ws", get(handler::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the relay on `listener` until the task is cancelled.
///
/// # Errors
///
/// Returns [`RealtimeError::Internal`] if the server stops with an I/O
/// error.
pub async fn serve(listener: TcpListener, state: RelayState) -> Result<(), RealtimeError> {
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| RealtimeError::Internal(format!("relay server stopped: {e}")))
}
