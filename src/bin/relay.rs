//! Development relay server entry point.
//!
//! Serves `/ws` for clients and the HTTP injection endpoints.

use tracing_subscriber::EnvFilter;

use cv_realtime::config::RealtimeConfig;
use cv_realtime::relay::{self, RelayState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RealtimeConfig::from_env()?;
    let state = RelayState::new(config.hub.bus_capacity);

    let listener = tokio::net::TcpListener::bind(config.relay_listen_addr).await?;
    tracing::info!(addr = %config.relay_listen_addr, "relay listening");

    relay::serve(listener, state).await?;
    Ok(())
}
