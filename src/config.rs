//! Configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Unset or unparsable numeric values
//! fall back to defaults; values that parse but make no sense are rejected.

use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::{CursorScope, UserId};
use crate::error::RealtimeError;
use crate::hub::HubConfig;
use crate::transport::{ReconnectPolicy, TransportConfig};

/// Default server endpoint.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:5000/ws";

/// Default relay bind address.
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:5000";

/// Top-level configuration.
///
/// Loaded once at startup via [`RealtimeConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Adapter settings.
    pub transport: TransportConfig,
    /// Hub settings.
    pub hub: HubConfig,
    /// User to authenticate as on startup, if any.
    pub user_id: Option<UserId>,
    /// Bind address of the development relay server.
    pub relay_listen_addr: SocketAddr,
}

impl RealtimeConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidConfig`] if `REALTIME_URL` is not a
    /// `ws://`/`wss://` URL, `REALTIME_CURSOR_SCOPE` is unknown, or
    /// `RELAY_LISTEN_ADDR` is not a socket address.
    pub fn from_env() -> Result<Self, RealtimeError> {
        dotenvy::dotenv().ok();

        let url = std::env::var("REALTIME_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        validate_url(&url)?;

        let initial_delay = parse_env("REALTIME_RECONNECT_INITIAL_DELAY_MS", 1_000_u64);
        let max_delay = parse_env("REALTIME_RECONNECT_MAX_DELAY_MS", 5_000_u64).max(initial_delay);
        let max_attempts = match parse_env("REALTIME_RECONNECT_MAX_ATTEMPTS", 0_u32) {
            0 => None,
            n => Some(n),
        };

        let transport = TransportConfig {
            url,
            connect_timeout: Duration::from_millis(parse_env(
                "REALTIME_CONNECT_TIMEOUT_MS",
                10_000_u64,
            )),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(initial_delay),
                max_delay: Duration::from_millis(max_delay),
                max_attempts,
            },
        };

        let cursor_scope = match std::env::var("REALTIME_CURSOR_SCOPE") {
            Ok(raw) => raw
                .parse::<CursorScope>()
                .map_err(|reason| RealtimeError::InvalidConfig {
                    key: "REALTIME_CURSOR_SCOPE",
                    reason,
                })?,
            Err(_) => CursorScope::Global,
        };

        let defaults = HubConfig::default();
        let hub = HubConfig {
            history_capacity: parse_env("REALTIME_HISTORY_CAPACITY", defaults.history_capacity)
                .max(1),
            cursor_scope,
            recent_window_minutes: parse_env(
                "REALTIME_RECENT_WINDOW_MINUTES",
                defaults.recent_window_minutes,
            ),
            status_poll_interval: Duration::from_millis(
                parse_env("REALTIME_STATUS_POLL_INTERVAL_MS", 1_000_u64).max(1),
            ),
            bus_capacity: parse_env("REALTIME_BUS_CAPACITY", defaults.bus_capacity).max(1),
        };

        let user_id = std::env::var("REALTIME_USER_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(UserId::new);

        let relay_listen_addr = std::env::var("RELAY_LISTEN_ADDR")
            .unwrap_or_else(|_| DEFAULT_RELAY_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| RealtimeError::InvalidConfig {
                key: "RELAY_LISTEN_ADDR",
                reason: e.to_string(),
            })?;

        Ok(Self {
            transport,
            hub,
            user_id,
            relay_listen_addr,
        })
    }
}

/// Checks that `url` uses a WebSocket scheme and names a host.
///
/// # Errors
///
/// Returns [`RealtimeError::InvalidConfig`] for any other shape.
pub fn validate_url(url: &str) -> Result<(), RealtimeError> {
    let rest = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))
        .ok_or_else(|| RealtimeError::InvalidConfig {
            key: "REALTIME_URL",
            reason: format!("`{url}` must start with ws:// or wss://"),
        })?;
    if rest.split('/').next().is_none_or(str::is_empty) {
        return Err(RealtimeError::InvalidConfig {
            key: "REALTIME_URL",
            reason: format!("`{url}` has no host"),
        });
    }
    Ok(())
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
