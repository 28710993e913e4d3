//! Single reconnecting WebSocket connection to the real-time server.
//!
//! [`TransportAdapter`] owns one background task per `connect()` call. The
//! task dials the server, runs the read/write loop while the socket is up,
//! and redials with [`ReconnectPolicy`] backoff when it drops. Inbound
//! frames are re-emitted to local listeners by event name; outbound
//! messages go through a per-socket channel.
//!
//! No public method returns an error or blocks on the network. Failures
//! are logged and show up only in [`ConnectionStatus`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::listeners::{EventHandler, ListenerRegistry};
use super::messages::{CONNECT, DISCONNECT, OutboundMessage, WireMessage};
use super::{ConnectionStatus, ReconnectPolicy};
use crate::domain::{ListenerId, UserId};
use crate::error::RealtimeError;
use crate::sync::lock;

/// Default timeout for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for [`TransportAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Backoff between attempts.
    pub reconnect: ReconnectPolicy,
}

impl TransportConfig {
    /// Config for `url` with default timeout and backoff.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Mutable link state shared between the adapter and its task.
///
/// `generation` increments on every `connect()`/`disconnect()`; a task only
/// touches the state while its own generation is current, so results from
/// a cancelled task are discarded.
#[derive(Debug, Default)]
struct LinkState {
    generation: u64,
    connected: bool,
    authenticated: Option<UserId>,
    identity: Option<UserId>,
    reconnect_attempts: u32,
    outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
}

#[derive(Debug)]
struct Shared {
    config: TransportConfig,
    link: Mutex<LinkState>,
    listeners: ListenerRegistry,
}

impl Shared {
    /// Invalidates the running task (if any) and returns the new generation.
    fn reset_link(&self) -> u64 {
        let mut link = lock(&self.link);
        link.generation = link.generation.wrapping_add(1);
        link.connected = false;
        link.authenticated = None;
        link.outbound = None;
        link.reconnect_attempts = 0;
        link.generation
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.link).generation == generation
    }

    /// Marks the link up and queues the buffered identity as the first
    /// outbound message of this socket.
    fn on_connected(&self, generation: u64, tx: mpsc::UnboundedSender<OutboundMessage>) -> bool {
        let mut link = lock(&self.link);
        if link.generation != generation {
            return false;
        }
        link.connected = true;
        link.reconnect_attempts = 0;
        if let Some(user) = link.identity.clone() {
            tracing::debug!(user_id = %user, "re-sending buffered authentication");
            let _ = tx.send(OutboundMessage::Authenticate(user));
        }
        link.outbound = Some(tx);
        true
    }

    fn on_sent(&self, generation: u64, message: &OutboundMessage) {
        let OutboundMessage::Authenticate(user) = message else {
            return;
        };
        let mut link = lock(&self.link);
        if link.generation != generation {
            return;
        }
        if link.identity.as_ref() == Some(user) {
            link.authenticated = Some(user.clone());
        } else {
            tracing::debug!(user_id = %user, "stale authenticate sent; identity has changed since");
        }
    }

    fn on_disconnected(&self, generation: u64) -> bool {
        let mut link = lock(&self.link);
        if link.generation != generation {
            return false;
        }
        link.connected = false;
        link.authenticated = None;
        link.outbound = None;
        true
    }

    fn record_attempt(&self, generation: u64, attempt: u32) {
        let mut link = lock(&self.link);
        if link.generation == generation {
            link.reconnect_attempts = attempt;
        }
    }

    fn dispatch(&self, generation: u64, text: &str) {
        if !self.is_current(generation) {
            return;
        }
        match WireMessage::parse(text) {
            Ok(message) => {
                let delivered = self.listeners.emit(&message.event, &message.data);
                tracing::debug!(event = %message.event, delivered, "inbound event");
            }
            Err(err) => tracing::warn!(error = %err, "discarding malformed frame"),
        }
    }

    fn emit_lifecycle(&self, generation: u64, event: &str) {
        if self.is_current(generation) {
            self.listeners.emit(event, &serde_json::Value::Null);
        }
    }
}

#[derive(Debug)]
struct SessionHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owner of the single live connection to the real-time server.
///
/// Construct one per process and share it behind an [`Arc`]. All methods
/// take `&self` and are safe to call from any thread.
#[derive(Debug)]
pub struct TransportAdapter {
    shared: Arc<Shared>,
    session: Mutex<Option<SessionHandle>>,
}

impl TransportAdapter {
    /// Creates an idle adapter. Nothing is dialled until [`Self::connect`].
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                link: Mutex::new(LinkState::default()),
                listeners: ListenerRegistry::new(),
            }),
            session: Mutex::new(None),
        }
    }

    /// Connection settings.
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    /// Starts the background connection task unless it is already running.
    ///
    /// Must be called from within a Tokio runtime; otherwise the call is
    /// logged and ignored.
    pub fn connect(&self) {
        let mut session = lock(&self.session);
        if session.as_ref().is_some_and(|s| !s.task.is_finished()) {
            tracing::debug!("connect called while already running");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("connect called outside a Tokio runtime; ignoring");
            return;
        };

        let generation = self.shared.reset_link();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(run_link(Arc::clone(&self.shared), generation, shutdown_rx));
        *session = Some(SessionHandle { shutdown, task });
        tracing::info!(url = %self.shared.config.url, "real-time transport started");
    }

    /// Stops the connection task and the reconnect loop. Safe to call
    /// repeatedly or before any [`Self::connect`].
    pub fn disconnect(&self) {
        let Some(handle) = lock(&self.session).take() else {
            tracing::debug!("disconnect called while idle");
            return;
        };
        self.shared.reset_link();
        let _ = handle.shutdown.send(true);
        tracing::info!("real-time transport stopped");
    }

    /// Returns `true` while the background task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Associates the connection with `user_id`.
    ///
    /// The identity is buffered (last write wins) and re-sent automatically
    /// after every successful connect. If a socket is open it is also sent
    /// immediately.
    pub fn authenticate(&self, user_id: UserId) {
        let mut link = lock(&self.shared.link);
        link.identity = Some(user_id.clone());
        match link.outbound.as_ref() {
            Some(tx) => {
                if tx.send(OutboundMessage::Authenticate(user_id)).is_err() {
                    tracing::debug!("socket closing; authentication deferred to next connect");
                }
            }
            None => tracing::debug!(%user_id, "not connected; authentication buffered"),
        }
    }

    /// Clears the buffered identity so later reconnects stay
    /// unauthenticated. The open socket, if any, is left as is.
    pub fn forget_user(&self) {
        let mut link = lock(&self.shared.link);
        link.identity = None;
        link.authenticated = None;
    }

    /// Currently buffered identity.
    #[must_use]
    pub fn buffered_user(&self) -> Option<UserId> {
        lock(&self.shared.link).identity.clone()
    }

    /// Best-effort activity heartbeat. Dropped while disconnected.
    pub fn send_user_activity(&self, user_id: &UserId) {
        let link = lock(&self.shared.link);
        let sent = link
            .outbound
            .as_ref()
            .is_some_and(|tx| tx.send(OutboundMessage::UserActivity(user_id.clone())).is_ok());
        if !sent {
            tracing::debug!(%user_id, "not connected; user activity dropped");
        }
    }

    /// Registers `handler` for inbound `event`.
    pub fn add_event_listener<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.shared.listeners.add(event, handler)
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub fn remove_event_listener(&self, event: &str, id: ListenerId) -> bool {
        self.shared.listeners.remove(event, id)
    }

    /// Number of handlers registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.shared.listeners.count(event)
    }

    /// Cached connection state.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        let link = lock(&self.shared.link);
        ConnectionStatus {
            connected: link.connected,
            user_id: link.authenticated.clone(),
            reconnect_attempts: link.reconnect_attempts,
        }
    }
}

impl Drop for TransportAdapter {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Shutdown,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial / serve / back off until shut down or out of attempts.
async fn run_link(shared: Arc<Shared>, generation: u64, mut shutdown: watch::Receiver<bool>) {
    let url = shared.config.url.clone();
    let policy = shared.config.reconnect;
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let dial = tokio::time::timeout(shared.config.connect_timeout, connect_async(url.as_str()));
        let outcome = tokio::select! {
            _ = shutdown.changed() => break,
            outcome = dial => outcome,
        };

        match outcome {
            Ok(Ok((socket, _response))) => {
                attempt = 0;
                tracing::info!(%url, "real-time connection established");
                if run_session(&shared, generation, socket, &mut shutdown).await
                    == SessionEnd::Shutdown
                {
                    break;
                }
                tracing::warn!(%url, "real-time connection lost");
            }
            Ok(Err(err)) => tracing::warn!(%url, error = %err, "connect failed"),
            Err(_) => tracing::warn!(
                %url,
                timeout_ms = shared.config.connect_timeout.as_millis(),
                "connect timed out"
            ),
        }

        attempt = attempt.saturating_add(1);
        if policy.exhausted(attempt) {
            tracing::error!(%url, attempts = attempt.saturating_sub(1), "reconnect budget exhausted; giving up");
            break;
        }
        shared.record_attempt(generation, attempt);

        let delay = policy.delay_for(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis(), "scheduling reconnect");
        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!(generation, "connection task finished");
}

/// Read/write loop for one open socket.
async fn run_session(
    shared: &Shared,
    generation: u64,
    socket: Socket,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (tx, mut rx) = mpsc::unbounded_channel();
    if !shared.on_connected(generation, tx) {
        return SessionEnd::Shutdown;
    }
    shared.emit_lifecycle(generation, CONNECT);

    let (mut sink, mut source) = socket.split();
    let end = loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break SessionEnd::Shutdown;
            }
            outbound = rx.recv() => {
                let Some(message) = outbound else {
                    break SessionEnd::Lost;
                };
                match send_outbound(&mut sink, &message).await {
                    Ok(()) => shared.on_sent(generation, &message),
                    Err(RealtimeError::Transport(err)) => {
                        tracing::warn!(event = message.event_name(), error = %err, "send failed");
                        break SessionEnd::Lost;
                    }
                    Err(err) => {
                        tracing::warn!(event = message.event_name(), error = %err, "could not encode message");
                    }
                }
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.dispatch(generation, text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "server closed the connection");
                    break SessionEnd::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "read failed");
                    break SessionEnd::Lost;
                }
                None => break SessionEnd::Lost,
            }
        }
    };

    if shared.on_disconnected(generation) {
        shared.emit_lifecycle(generation, DISCONNECT);
    }
    end
}

async fn send_outbound<S>(sink: &mut S, message: &OutboundMessage) -> Result<(), RealtimeError>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = message.to_wire()?.to_text()?;
    sink.send(Message::text(text)).await?;
    tracing::debug!(event = message.event_name(), "outbound message sent");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::transport::messages::DATA_UPDATED;
    use futures_util::SinkExt;
    use tokio::net::TcpListener;

    fn fast_config(url: String) -> TransportConfig {
        TransportConfig {
            url,
            connect_timeout: Duration::from_millis(500),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
                max_attempts: None,
            },
        }
    }

    async fn refused_url() -> String {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local addr");
        };
        drop(listener);
        format!("ws://{addr}/ws")
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn disconnect_before_connect_is_noop() {
        let adapter = TransportAdapter::new(TransportConfig::new("ws://127.0.0.1:1/ws"));
        adapter.disconnect();
        adapter.disconnect();
        assert_eq!(adapter.connection_status(), ConnectionStatus::default());
    }

    #[test]
    fn connect_outside_runtime_is_ignored() {
        let adapter = TransportAdapter::new(TransportConfig::new("ws://127.0.0.1:1/ws"));
        adapter.connect();
        assert!(!adapter.is_running());
    }

    #[test]
    fn authenticate_while_disconnected_is_buffered() {
        let adapter = TransportAdapter::new(TransportConfig::new("ws://127.0.0.1:1/ws"));
        adapter.authenticate(UserId::new("first"));
        adapter.authenticate(UserId::new("second"));
        assert_eq!(adapter.buffered_user(), Some(UserId::new("second")));
        assert_eq!(adapter.connection_status().user_id, None);
        adapter.send_user_activity(&UserId::new("second"));
        adapter.forget_user();
        assert_eq!(adapter.buffered_user(), None);
    }

    #[tokio::test]
    async fn failed_dials_count_reconnect_attempts() {
        let adapter = TransportAdapter::new(fast_config(refused_url().await));
        adapter.connect();
        adapter.connect();
        assert!(adapter.is_running());
        let counted = wait_until(|| adapter.connection_status().reconnect_attempts >= 2).await;
        assert!(counted);
        assert!(!adapter.connection_status().connected);

        adapter.disconnect();
        adapter.disconnect();
        assert_eq!(adapter.connection_status().reconnect_attempts, 0);
        assert!(wait_until(|| !adapter.is_running()).await);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let mut config = fast_config(refused_url().await);
        config.reconnect.max_attempts = Some(2);
        let adapter = TransportAdapter::new(config);
        adapter.connect();
        assert!(wait_until(|| !adapter.is_running()).await);
        assert_eq!(adapter.connection_status().reconnect_attempts, 2);
    }

    #[tokio::test]
    async fn emits_inbound_frames_and_authenticates_on_connect() {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local addr");
        };

        let server = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                panic!("accept failed");
            };
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                panic!("handshake failed");
            };
            let Some(Ok(Message::Text(first))) = ws.next().await else {
                panic!("expected authenticate frame");
            };
            let frame = r#"{"event":"data-updated","data":{"dataType":"photo","timestamp":7}}"#;
            let _ = ws.send(Message::text(frame)).await;
            // keep the socket open until the client goes away
            while let Some(Ok(_)) = ws.next().await {}
            first.as_str().to_string()
        });

        let adapter = TransportAdapter::new(fast_config(format!("ws://{addr}/ws")));
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        adapter.add_event_listener(DATA_UPDATED, move |data| {
            if data.get("timestamp") == Some(&serde_json::json!(7)) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        adapter.authenticate(UserId::new("u-42"));
        adapter.connect();

        assert!(wait_until(|| hits.load(Ordering::SeqCst) == 1).await);
        assert!(wait_until(|| adapter.connection_status().user_id.is_some()).await);
        let status = adapter.connection_status();
        assert!(status.connected);
        assert_eq!(status.user_id, Some(UserId::new("u-42")));

        adapter.disconnect();
        let Ok(first) = server.await else {
            panic!("server task failed");
        };
        let Ok(wire) = WireMessage::parse(&first) else {
            panic!("bad authenticate frame");
        };
        assert_eq!(wire.event, "authenticate");
        assert_eq!(wire.data, serde_json::json!({ "userId": "u-42" }));
        assert!(!adapter.connection_status().connected);
    }
}
