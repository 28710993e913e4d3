//! Shared relay state injected into all Axum handlers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::{UpdateEvent, UserId};
use crate::error::RealtimeError;
use crate::sync::lock;
use crate::transport::WireMessage;
use crate::transport::messages::{DATA_UPDATED, NOTIFICATION};

/// Default capacity of the relay's outbound frame channel.
pub const DEFAULT_FRAME_CAPACITY: usize = 1024;

/// Most recent `authenticate` user ids kept by [`RelayStats`].
pub const AUTH_LOG_CAPACITY: usize = 256;

/// A frame queued for delivery to sockets.
#[derive(Debug, Clone)]
pub struct RelayFrame {
    /// Deliver only to sockets authenticated as this user. `None` goes to
    /// every socket.
    pub target: Option<UserId>,
    /// Frame to send.
    pub message: WireMessage,
}

/// Counters exposed on `/health`.
#[derive(Debug, Default)]
pub struct RelayStats {
    sessions: AtomicUsize,
    authentications: AtomicU64,
    activities: AtomicU64,
    authenticated_users: Mutex<VecDeque<UserId>>,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    /// Open sockets.
    pub sessions: usize,
    /// `authenticate` messages received.
    pub authentications: u64,
    /// `user-activity` messages received.
    pub activities: u64,
}

impl RelayStats {
    /// Records an `authenticate` message.
    pub fn record_authentication(&self, user_id: UserId) {
        self.authentications.fetch_add(1, Ordering::SeqCst);
        let mut log = lock(&self.authenticated_users);
        if log.len() == AUTH_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(user_id);
    }

    /// Records a `user-activity` message.
    pub fn record_activity(&self) {
        self.activities.fetch_add(1, Ordering::SeqCst);
    }

    /// The last [`AUTH_LOG_CAPACITY`] user ids received in `authenticate`,
    /// oldest first.
    #[must_use]
    pub fn authentication_log(&self) -> Vec<UserId> {
        lock(&self.authenticated_users).iter().cloned().collect()
    }

    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            sessions: self.sessions.load(Ordering::SeqCst),
            authentications: self.authentications.load(Ordering::SeqCst),
            activities: self.activities.load(Ordering::SeqCst),
        }
    }
}

/// Decrements the session gauge when a socket task ends.
#[derive(Debug)]
pub struct SessionGuard(Arc<RelayStats>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct RelayState {
    frames: broadcast::Sender<RelayFrame>,
    kick: broadcast::Sender<()>,
    stats: Arc<RelayStats>,
    last_timestamp: Arc<AtomicI64>,
}

impl RelayState {
    /// Creates state with the given frame channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity.max(1));
        let (kick, _) = broadcast::channel(1);
        Self {
            frames,
            kick,
            stats: Arc::new(RelayStats::default()),
            last_timestamp: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Registers a new socket; the gauge drops when the guard does.
    #[must_use]
    pub fn open_session(&self) -> SessionGuard {
        self.stats.sessions.fetch_add(1, Ordering::SeqCst);
        SessionGuard(Arc::clone(&self.stats))
    }

    /// Receiver for frames to forward.
    #[must_use]
    pub fn subscribe_frames(&self) -> broadcast::Receiver<RelayFrame> {
        self.frames.subscribe()
    }

    /// Receiver signalled by [`Self::disconnect_all`].
    #[must_use]
    pub fn subscribe_kick(&self) -> broadcast::Receiver<()> {
        self.kick.subscribe()
    }

    /// Next server timestamp: wall clock, bumped so it is strictly greater
    /// than every timestamp issued before.
    pub fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1))
    }

    /// Queues a `data-updated` frame. Returns the number of sockets that
    /// will see it.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Serialization`] if the event cannot be
    /// encoded.
    pub fn publish_update(
        &self,
        target: Option<UserId>,
        event: &UpdateEvent,
    ) -> Result<usize, RealtimeError> {
        let data = serde_json::to_value(event)?;
        Ok(self.publish(target, WireMessage::new(DATA_UPDATED, data)))
    }

    /// Queues a `notification` frame.
    pub fn publish_notification(&self, target: Option<UserId>, payload: serde_json::Value) -> usize {
        self.publish(target, WireMessage::new(NOTIFICATION, payload))
    }

    fn publish(&self, target: Option<UserId>, message: WireMessage) -> usize {
        tracing::debug!(event = %message.event, target = ?target, "relaying frame");
        self.frames
            .send(RelayFrame { target, message })
            .unwrap_or(0)
    }

    /// Closes every open socket. Returns how many were signalled.
    pub fn disconnect_all(&self) -> usize {
        let count = self.kick.send(()).unwrap_or(0);
        tracing::info!(sessions = count, "dropping all relay sessions");
        count
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_strictly_increase() {
        let state = RelayState::default();
        let a = state.next_timestamp();
        let b = state.next_timestamp();
        let c = state.next_timestamp();
        assert!(a < b && b < c);
    }

    #[test]
    fn session_guard_tracks_gauge() {
        let state = RelayState::default();
        let first = state.open_session();
        let _second = state.open_session();
        assert_eq!(state.stats().snapshot().sessions, 2);
        drop(first);
        assert_eq!(state.stats().snapshot().sessions, 1);
    }

    #[test]
    fn publish_without_sessions_reaches_nobody() {
        let state = RelayState::default();
        let delivered = state.publish_update(None, &UpdateEvent::new("photo", 1));
        assert!(matches!(delivered, Ok(0)));
        assert_eq!(state.disconnect_all(), 0);
    }

    #[test]
    fn authentication_log_keeps_order() {
        let stats = RelayStats::default();
        stats.record_authentication(UserId::new("a"));
        stats.record_authentication(UserId::new("b"));
        stats.record_activity();
        assert_eq!(stats.authentication_log(), vec![UserId::new("a"), UserId::new("b")]);
        assert_eq!(stats.snapshot().authentications, 2);
        assert_eq!(stats.snapshot().activities, 1);
    }

    #[test]
    fn authentication_log_drops_oldest_when_full() {
        let stats = RelayStats::default();
        for n in 0..AUTH_LOG_CAPACITY + 3 {
            stats.record_authentication(UserId::new(format!("u-{n}")));
        }
        let log = stats.authentication_log();
        assert_eq!(log.len(), AUTH_LOG_CAPACITY);
        assert_eq!(log.first(), Some(&UserId::new("u-3")));
        assert_eq!(
            log.last(),
            Some(&UserId::new(format!("u-{}", AUTH_LOG_CAPACITY + 2)))
        );
        let total = u64::try_from(AUTH_LOG_CAPACITY + 3).unwrap_or(u64::MAX);
        assert_eq!(stats.snapshot().authentications, total);
    }
}
