//! cv-realtime monitor entry point.
//!
//! Mounts an update hub from environment configuration, authenticates
//! `REALTIME_USER_ID` if set, and logs every hub event until Ctrl-C.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use cv_realtime::config::RealtimeConfig;
use cv_realtime::domain::HubEvent;
use cv_realtime::hub::{CurrentUser, UpdateHub};
use cv_realtime::transport::TransportAdapter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = RealtimeConfig::from_env()?;
    tracing::info!(url = %config.transport.url, "starting cv-realtime monitor");

    let adapter = Arc::new(TransportAdapter::new(config.transport.clone()));
    let hub = UpdateHub::mount(adapter, config.hub.clone());
    let mut events = hub.subscribe();

    match config.user_id.clone() {
        Some(user_id) => hub.set_current_user(CurrentUser::LoggedIn(user_id)),
        None => hub.set_current_user(CurrentUser::LoggedOut),
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Ok(HubEvent::Updated(update)) => tracing::info!(
                    data_type = %update.data_type,
                    timestamp = update.timestamp,
                    history = hub.update_history().len(),
                    "update"
                ),
                Ok(HubEvent::Notification(note)) => {
                    tracing::info!(payload = %note.payload, "notification");
                }
                Ok(HubEvent::HistoryCleared) => tracing::info!("history cleared"),
                Err(RecvError::Lagged(n)) => tracing::warn!(lagged = n, "monitor lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    let stats = hub.bus_stats();
    tracing::info!(
        updates = stats.updates,
        notifications = stats.notifications,
        clears = stats.clears,
        "monitor stopped"
    );
    hub.unmount();
    Ok(())
}
