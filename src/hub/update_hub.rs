//! Update distribution hub: one shared view of server-side changes for many
//! independent consumers.
//!
//! [`UpdateHub`] sits on top of a [`TransportAdapter`]. It decodes
//! `data-updated` events, runs them through the [`UpdateLedger`] admission
//! checks and publishes accepted ones on an [`UpdateBus`]. Connection state
//! is mirrored from the adapter by a fixed-interval poller rather than
//! pushed, so consumers never observe adapter internals mid-update.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::CurrentUser;
use crate::clock::{Clock, SystemClock};
use crate::consumer::{DataTypeFilter, DataTypeSubscription};
use crate::domain::update_bus::{BusStats, DEFAULT_BUS_CAPACITY};
use crate::domain::update_ledger::DEFAULT_HISTORY_CAPACITY;
use crate::domain::{
    Admission, CursorScope, HubEvent, ListenerId, Notification, UpdateBus, UpdateEvent,
    UpdateLedger, UserId,
};
use crate::sync::lock;
use crate::transport::messages::{DATA_UPDATED, NOTIFICATION};
use crate::transport::{ConnectionStatus, TransportAdapter};

/// Default recency window for [`UpdateHub::has_recent_update`].
pub const DEFAULT_RECENT_WINDOW_MINUTES: u32 = 5;

/// Default interval between connection status refreshes.
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// Tuning knobs for [`UpdateHub`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Maximum retained history entries across all data types.
    pub history_capacity: usize,
    /// Scope of the duplicate/stale timestamp cursor.
    pub cursor_scope: CursorScope,
    /// Window used by [`UpdateHub::has_recent_update`].
    pub recent_window_minutes: u32,
    /// How often the connection status mirror is refreshed.
    pub status_poll_interval: Duration,
    /// Capacity of the consumer broadcast channel.
    pub bus_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            cursor_scope: CursorScope::Global,
            recent_window_minutes: DEFAULT_RECENT_WINDOW_MINUTES,
            status_poll_interval: DEFAULT_STATUS_POLL_INTERVAL,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct HubState {
    ledger: UpdateLedger,
    status: ConnectionStatus,
    current_user: CurrentUser,
}

/// State reachable from adapter callbacks.
#[derive(Debug)]
struct HubCore {
    state: Mutex<HubState>,
    bus: UpdateBus,
}

impl HubCore {
    fn on_data_update(&self, raw: &serde_json::Value) -> Option<Admission> {
        let event = match UpdateEvent::from_value(raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "discarding malformed update");
                return None;
            }
        };
        let data_type = event.data_type.clone();
        let timestamp = event.timestamp;

        // Admission and publish share one critical section: no other update
        // can interleave between the cursor check and the fan-out.
        let mut state = lock(&self.state);
        let admission = state.ledger.offer(event);
        match admission {
            Admission::Accepted => {
                if let Some(accepted) = state.ledger.last_update().cloned() {
                    let receivers = self.bus.publish_update(accepted);
                    tracing::debug!(%data_type, timestamp, receivers, "update accepted");
                }
            }
            Admission::Duplicate => {
                tracing::debug!(%data_type, timestamp, "duplicate update ignored");
            }
            Admission::Stale => {
                tracing::debug!(
                    %data_type,
                    timestamp,
                    last_processed = ?state.ledger.last_processed_timestamp(),
                    "stale update ignored"
                );
            }
        }
        Some(admission)
    }

    fn on_notification(&self, raw: &serde_json::Value) {
        tracing::info!(payload = %raw, "notification received");
        self.bus
            .publish_notification(Notification::new(raw.clone()));
    }

    fn refresh_status(&self, status: ConnectionStatus) {
        lock(&self.state).status = status;
    }
}

#[derive(Debug)]
struct StatusPoller {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[derive(Debug)]
struct Mounted {
    data_listener: ListenerId,
    notification_listener: ListenerId,
    poller: Option<StatusPoller>,
}

/// Shared real-time state owner.
///
/// Created with [`UpdateHub::mount`], torn down with [`UpdateHub::unmount`]
/// or on drop. Consumers read through `&self` methods and receive accepted
/// updates via [`UpdateHub::subscribe`] or [`UpdateHub::watch`].
#[derive(Debug)]
pub struct UpdateHub {
    adapter: Arc<TransportAdapter>,
    core: Arc<HubCore>,
    clock: Arc<dyn Clock>,
    config: HubConfig,
    mounted: Mutex<Option<Mounted>>,
}

impl UpdateHub {
    /// Mounts a hub on `adapter` using the system clock.
    ///
    /// Registers the hub's listeners, calls [`TransportAdapter::connect`]
    /// once and starts the status poller. Must run inside a Tokio runtime
    /// for the connection and poller to start; outside one the hub still
    /// works on manually delivered events.
    #[must_use]
    pub fn mount(adapter: Arc<TransportAdapter>, config: HubConfig) -> Self {
        Self::mount_with_clock(adapter, config, Arc::new(SystemClock))
    }

    /// Same as [`UpdateHub::mount`] with an explicit clock.
    #[must_use]
    pub fn mount_with_clock(
        adapter: Arc<TransportAdapter>,
        config: HubConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let core = Arc::new(HubCore {
            state: Mutex::new(HubState {
                ledger: UpdateLedger::new(config.history_capacity, config.cursor_scope),
                status: adapter.connection_status(),
                current_user: CurrentUser::Loading,
            }),
            bus: UpdateBus::new(config.bus_capacity),
        });

        let data_core = Arc::clone(&core);
        let data_listener = adapter.add_event_listener(DATA_UPDATED, move |raw| {
            data_core.on_data_update(raw);
        });
        let notification_core = Arc::clone(&core);
        let notification_listener = adapter.add_event_listener(NOTIFICATION, move |raw| {
            notification_core.on_notification(raw);
        });

        adapter.connect();
        let poller = spawn_status_poller(
            Arc::clone(&adapter),
            Arc::clone(&core),
            config.status_poll_interval,
        );

        tracing::info!(
            history_capacity = config.history_capacity,
            cursor_scope = %config.cursor_scope,
            "update hub mounted"
        );

        Self {
            adapter,
            core,
            clock,
            config,
            mounted: Mutex::new(Some(Mounted {
                data_listener,
                notification_listener,
                poller,
            })),
        }
    }

    /// Removes listeners, stops the poller and disconnects the adapter.
    /// Idempotent.
    pub fn unmount(&self) {
        let Some(mounted) = lock(&self.mounted).take() else {
            return;
        };
        self.adapter
            .remove_event_listener(DATA_UPDATED, mounted.data_listener);
        self.adapter
            .remove_event_listener(NOTIFICATION, mounted.notification_listener);
        if let Some(poller) = mounted.poller {
            let _ = poller.shutdown.send(true);
            drop(poller.task);
        }
        self.adapter.disconnect();
        tracing::info!("update hub unmounted");
    }

    /// Returns `true` until [`Self::unmount`] runs.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        lock(&self.mounted).is_some()
    }

    /// The underlying adapter.
    #[must_use]
    pub fn adapter(&self) -> &Arc<TransportAdapter> {
        &self.adapter
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Handles a raw `data-updated` payload.
    ///
    /// Normally invoked by the adapter listener; exposed for replaying
    /// captured traffic. Returns `None` if the payload was malformed.
    pub fn on_data_update(&self, raw: &serde_json::Value) -> Option<Admission> {
        self.core.on_data_update(raw)
    }

    /// Handles a raw `notification` payload.
    pub fn on_notification(&self, raw: &serde_json::Value) {
        self.core.on_notification(raw);
    }

    /// Copies the adapter's status into the mirror now instead of waiting
    /// for the next poll.
    pub fn sync_connection_status(&self) {
        self.core.refresh_status(self.adapter.connection_status());
    }

    /// Mirrored connection status.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        lock(&self.core.state).status.clone()
    }

    /// Mirrored `connected` flag.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.core.state).status.connected
    }

    /// Mirrored user id.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        lock(&self.core.state).status.user_id.clone()
    }

    /// Mirrored reconnect attempt count.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.core.state).status.reconnect_attempts
    }

    /// Most recently accepted update.
    #[must_use]
    pub fn last_update(&self) -> Option<UpdateEvent> {
        lock(&self.core.state).ledger.last_update().cloned()
    }

    /// Timestamp cursor used for duplicate/stale rejection.
    #[must_use]
    pub fn last_processed_timestamp(&self) -> Option<i64> {
        lock(&self.core.state).ledger.last_processed_timestamp()
    }

    /// Retained history, oldest first.
    #[must_use]
    pub fn update_history(&self) -> Vec<UpdateEvent> {
        lock(&self.core.state).ledger.history().cloned().collect()
    }

    /// Retained history entries for `data_type`, oldest first.
    #[must_use]
    pub fn updates_for_data_type(&self, data_type: &str) -> Vec<UpdateEvent> {
        lock(&self.core.state).ledger.updates_for(data_type)
    }

    /// [`Self::has_recent_update_within`] with the configured window.
    #[must_use]
    pub fn has_recent_update(&self, data_type: &str) -> bool {
        self.has_recent_update_within(data_type, self.config.recent_window_minutes)
    }

    /// Returns `true` if a retained entry for `data_type` is newer than
    /// `within_minutes` ago.
    ///
    /// A hint only: history is shared by every data type, so a burst of
    /// unrelated updates can evict a still-recent entry.
    #[must_use]
    pub fn has_recent_update_within(&self, data_type: &str, within_minutes: u32) -> bool {
        let window_ms = i64::from(within_minutes).saturating_mul(60_000);
        let now = self.clock.now_millis();
        lock(&self.core.state)
            .ledger
            .has_recent(data_type, window_ms, now)
    }

    /// Empties the history. The timestamp cursor is kept.
    pub fn clear_update_history(&self) {
        let mut state = lock(&self.core.state);
        state.ledger.clear_history();
        self.core.bus.publish_cleared();
        tracing::debug!("update history cleared");
    }

    /// Authenticates the connection as `user_id` and mirrors it locally.
    pub fn authenticate_user(&self, user_id: UserId) {
        self.adapter.authenticate(user_id.clone());
        lock(&self.core.state).status.user_id = Some(user_id);
    }

    /// Sends an activity heartbeat for `user_id`.
    pub fn send_user_activity(&self, user_id: &UserId) {
        self.adapter.send_user_activity(user_id);
    }

    /// Feeds the authentication layer's view of the user.
    ///
    /// Entering `LoggedIn(id)` authenticates and sends one activity
    /// heartbeat; repeating the same state does nothing. `LoggedOut` clears
    /// the user mirror and the adapter's buffered identity but keeps the
    /// socket open.
    pub fn set_current_user(&self, user: CurrentUser) {
        let previous = std::mem::replace(&mut lock(&self.core.state).current_user, user.clone());
        if previous == user {
            return;
        }
        match user {
            CurrentUser::Loading => {}
            CurrentUser::LoggedIn(user_id) => {
                tracing::info!(%user_id, "user signed in; authenticating real-time connection");
                self.authenticate_user(user_id.clone());
                self.send_user_activity(&user_id);
            }
            CurrentUser::LoggedOut => {
                tracing::info!("user signed out; clearing real-time identity");
                lock(&self.core.state).status.user_id = None;
                self.adapter.forget_user();
            }
        }
    }

    /// Last value passed to [`Self::set_current_user`].
    #[must_use]
    pub fn current_user(&self) -> CurrentUser {
        lock(&self.core.state).current_user.clone()
    }

    /// Receiver for every future [`HubEvent`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.core.bus.subscribe()
    }

    /// Receiver yielding accepted updates for the given data types only.
    /// `"*"` matches every type.
    #[must_use]
    pub fn watch<I, S>(&self, data_types: I) -> DataTypeSubscription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DataTypeSubscription::new(self.subscribe(), DataTypeFilter::from_iter(data_types))
    }

    /// Number of live bus receivers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.bus.receiver_count()
    }

    /// Publish totals of the consumer bus.
    #[must_use]
    pub fn bus_stats(&self) -> BusStats {
        self.core.bus.stats()
    }
}

impl Drop for UpdateHub {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn spawn_status_poller(
    adapter: Arc<TransportAdapter>,
    core: Arc<HubCore>,
    interval: Duration,
) -> Option<StatusPoller> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("no Tokio runtime; connection status will not be polled");
        return None;
    };
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let period = interval.max(Duration::from_millis(1));
    let task = runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => core.refresh_status(adapter.connection_status()),
            }
        }
        tracing::debug!("status poller stopped");
    });
    Some(StatusPoller { shutdown, task })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::{ReconnectPolicy, TransportConfig};
    use serde_json::json;

    fn idle_adapter() -> Arc<TransportAdapter> {
        // Nothing listens on port 1; the adapter keeps failing quietly.
        let mut config = TransportConfig::new("ws://127.0.0.1:1/ws");
        config.reconnect = ReconnectPolicy {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            max_attempts: None,
        };
        Arc::new(TransportAdapter::new(config))
    }

    fn mount_at(now: i64) -> (UpdateHub, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let hub = UpdateHub::mount_with_clock(
            idle_adapter(),
            HubConfig::default(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (hub, clock)
    }

    fn raw(data_type: &str, timestamp: i64) -> serde_json::Value {
        json!({ "dataType": data_type, "timestamp": timestamp, "payload": {} })
    }

    #[tokio::test]
    async fn duplicate_delivery_is_idempotent() {
        let (hub, _) = mount_at(0);
        assert_eq!(hub.on_data_update(&raw("photo", 1000)), Some(Admission::Accepted));
        assert_eq!(hub.on_data_update(&raw("photo", 1000)), Some(Admission::Duplicate));
        assert_eq!(hub.update_history().len(), 1);
        assert_eq!(hub.last_update().map(|e| e.timestamp), Some(1000));
    }

    #[tokio::test]
    async fn only_accepted_updates_reach_the_bus() {
        let (hub, _) = mount_at(0);
        let _rx = hub.subscribe();
        hub.on_data_update(&raw("photo", 1000));
        hub.on_data_update(&raw("photo", 1000));
        hub.on_data_update(&raw("skills", 999));
        hub.on_notification(&json!({ "message": "viewed" }));
        hub.clear_update_history();

        let stats = hub.bus_stats();
        assert_eq!((stats.updates, stats.notifications, stats.clears), (1, 1, 1));
        assert_eq!(stats.unheard, 0);
    }

    #[tokio::test]
    async fn older_event_of_other_type_is_dropped() {
        let (hub, _) = mount_at(0);
        hub.on_data_update(&raw("A", 1000));
        assert_eq!(hub.on_data_update(&raw("B", 900)), Some(Admission::Stale));
        let Some(last) = hub.last_update() else {
            panic!("expected last update");
        };
        assert_eq!((last.data_type.as_str(), last.timestamp), ("A", 1000));
        assert_eq!(hub.update_history().len(), 1);
    }

    #[tokio::test]
    async fn history_holds_last_ten() {
        let (hub, _) = mount_at(0);
        for t in 1..=15 {
            hub.on_data_update(&raw("skills", t));
        }
        let kept: Vec<i64> = hub.update_history().iter().map(|e| e.timestamp).collect();
        assert_eq!(kept, (6..=15).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn malformed_update_is_discarded() {
        let (hub, _) = mount_at(0);
        hub.on_data_update(&raw("photo", 10));
        assert_eq!(hub.on_data_update(&json!({ "dataType": "photo" })), None);
        assert_eq!(hub.on_data_update(&json!("garbage")), None);
        assert_eq!(hub.update_history().len(), 1);
        assert_eq!(hub.on_data_update(&raw("photo", 11)), Some(Admission::Accepted));
    }

    #[tokio::test]
    async fn per_type_filter_keeps_order() {
        let (hub, _) = mount_at(0);
        for (dt, t) in [("skills", 1), ("photo", 2), ("skills", 3), ("education", 4), ("skills", 5)] {
            hub.on_data_update(&raw(dt, t));
        }
        let skills: Vec<i64> = hub
            .updates_for_data_type("skills")
            .iter()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(skills, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn recency_follows_clock() {
        let now = 1_700_000_000_000;
        let (hub, clock) = mount_at(now);
        hub.on_data_update(&raw("photo", now));
        assert!(hub.has_recent_update("photo"));
        assert!(!hub.has_recent_update("skills"));

        clock.advance(5 * 60_000 - 1);
        assert!(hub.has_recent_update("photo"));
        clock.advance(1);
        assert!(!hub.has_recent_update("photo"));
        assert!(hub.has_recent_update_within("photo", 6));
    }

    #[tokio::test]
    async fn clear_keeps_cursor_and_notifies() {
        let (hub, _) = mount_at(0);
        let mut rx = hub.subscribe();
        hub.on_data_update(&raw("photo", 1000));
        hub.clear_update_history();
        assert!(hub.update_history().is_empty());
        assert_eq!(hub.last_processed_timestamp(), Some(1000));
        assert_eq!(hub.on_data_update(&raw("photo", 500)), Some(Admission::Stale));

        let (Ok(first), Ok(second)) = (rx.recv().await, rx.recv().await) else {
            panic!("expected two events");
        };
        assert_eq!(first.kind_str(), "updated");
        assert_eq!(second, HubEvent::HistoryCleared);
    }

    #[tokio::test]
    async fn every_subscriber_sees_the_same_accepted_stream() {
        let (hub, _) = mount_at(0);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        for t in [5, 5, 3, 8] {
            hub.on_data_update(&raw("photo", t));
        }
        for expected in [5, 8] {
            let (Ok(ea), Ok(eb)) = (a.recv().await, b.recv().await) else {
                panic!("receivers failed");
            };
            assert_eq!(ea, eb);
            assert_eq!(ea.as_update().map(|e| e.timestamp), Some(expected));
        }
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn notifications_are_published_not_retained() {
        let (hub, _) = mount_at(0);
        let mut rx = hub.subscribe();
        hub.on_notification(&json!({ "message": "CV shared" }));
        let Ok(HubEvent::Notification(note)) = rx.recv().await else {
            panic!("expected notification");
        };
        assert_eq!(note.payload, json!({ "message": "CV shared" }));
        assert!(hub.update_history().is_empty());
        assert!(hub.last_update().is_none());
    }

    #[tokio::test]
    async fn user_transitions_drive_authentication() {
        let (hub, _) = mount_at(0);
        let alice = UserId::new("alice");

        hub.set_current_user(CurrentUser::Loading);
        assert_eq!(hub.adapter().buffered_user(), None);

        hub.set_current_user(CurrentUser::LoggedIn(alice.clone()));
        assert_eq!(hub.adapter().buffered_user(), Some(alice.clone()));
        assert_eq!(hub.user_id(), Some(alice.clone()));

        // Same state again is not a transition.
        hub.adapter().forget_user();
        hub.set_current_user(CurrentUser::LoggedIn(alice.clone()));
        assert_eq!(hub.adapter().buffered_user(), None);

        hub.set_current_user(CurrentUser::LoggedOut);
        assert_eq!(hub.user_id(), None);
        assert!(hub.adapter().is_running());

        hub.set_current_user(CurrentUser::LoggedIn(alice.clone()));
        assert_eq!(hub.adapter().buffered_user(), Some(alice));
    }

    #[tokio::test]
    async fn status_poller_mirrors_adapter() {
        let mut config = HubConfig::default();
        config.status_poll_interval = Duration::from_millis(5);
        let hub = UpdateHub::mount(idle_adapter(), config);
        hub.authenticate_user(UserId::new("bob"));
        assert_eq!(hub.user_id(), Some(UserId::new("bob")));

        // The adapter is not connected, so the next poll clears the mirror.
        let mut cleared = false;
        for _ in 0..100 {
            if hub.user_id().is_none() {
                cleared = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cleared);
        assert!(!hub.is_connected());
    }

    #[tokio::test]
    async fn unmount_is_idempotent() {
        let (hub, _) = mount_at(0);
        let adapter = Arc::clone(hub.adapter());
        assert_eq!(adapter.listener_count(DATA_UPDATED), 1);
        assert!(adapter.is_running());

        hub.unmount();
        hub.unmount();
        assert!(!hub.is_mounted());
        assert_eq!(adapter.listener_count(DATA_UPDATED), 0);
        assert_eq!(adapter.listener_count(NOTIFICATION), 0);
        drop(hub);
        adapter.disconnect();
    }

    #[test]
    fn mount_outside_runtime_still_processes_events() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let hub = UpdateHub::mount_with_clock(idle_adapter(), HubConfig::default(), clock);
        assert!(!hub.adapter().is_running());
        assert_eq!(hub.on_data_update(&raw("photo", 1)), Some(Admission::Accepted));
        hub.unmount();
    }
}
