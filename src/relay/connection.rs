//! Relay-side WebSocket connection loop.
//!
//! Handles the read/write loop for a single client socket: records
//! `authenticate` / `user-activity` messages and forwards relay frames
//! addressed to everyone or to the socket's authenticated user.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use super::state::RelayState;
use crate::domain::UserId;
use crate::error::RealtimeError;
use crate::transport::WireMessage;
use crate::transport::messages::{AUTHENTICATE, USER_ACTIVITY, UserRef};

/// Runs the read/write loop for a single WebSocket connection.
pub async fn run_connection(socket: WebSocket, state: RelayState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut frames = state.subscribe_frames();
    let mut kick = state.subscribe_kick();
    let _session = state.open_session();
    let mut user: Option<UserId> = None;

    tracing::debug!("relay session opened");

    loop {
        tokio::select! {
            // Incoming message from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(err) = handle_client_frame(text.as_str(), &state, &mut user) {
                            tracing::warn!(error = %err, "ignoring client frame");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "relay socket read failed");
                        break;
                    }
                }
            }
            // Frame queued by the HTTP API
            frame = frames.recv() => {
                match frame {
                    Ok(frame) => {
                        let addressed = frame
                            .target
                            .as_ref()
                            .is_none_or(|target| user.as_ref() == Some(target));
                        if !addressed {
                            continue;
                        }
                        let Ok(text) = frame.message.to_text() else {
                            continue;
                        };
                        if ws_tx.send(Message::text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "relay client lagged behind frame channel");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = kick.recv() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    tracing::debug!(user_id = ?user, "relay session closed");
}

/// Handles one text frame from the client.
fn handle_client_frame(
    text: &str,
    state: &RelayState,
    user: &mut Option<UserId>,
) -> Result<(), RealtimeError> {
    let msg = WireMessage::parse(text)?;
    match msg.event.as_str() {
        AUTHENTICATE => {
            let UserRef { user_id } = serde_json::from_value(msg.data)?;
            tracing::info!(%user_id, "relay session authenticated");
            state.stats().record_authentication(user_id.clone());
            *user = Some(user_id);
        }
        USER_ACTIVITY => {
            let UserRef { user_id } = serde_json::from_value(msg.data)?;
            tracing::debug!(%user_id, "user activity");
            state.stats().record_activity();
        }
        other => {
            return Err(RealtimeError::InvalidRequest(format!(
                "unknown event `{other}`"
            )));
        }
    }
    Ok(())
}
