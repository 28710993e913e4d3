//! Fan-out of hub events to consumers.
//!
//! Producers go through the typed `publish_*` methods. Each consumer holds
//! its own receiver from [`UpdateBus::subscribe`]. The ring is bounded: a
//! consumer more than `capacity` events behind resumes at the oldest event
//! still buffered. Totals per event kind are kept for diagnostics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

use super::{HubEvent, Notification, UpdateEvent};

/// Default channel capacity.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Counters {
    updates: AtomicU64,
    notifications: AtomicU64,
    clears: AtomicU64,
    unheard: AtomicU64,
}

/// Totals since the bus was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Accepted updates published.
    pub updates: u64,
    /// Notifications published.
    pub notifications: u64,
    /// History-cleared signals published.
    pub clears: u64,
    /// Events published while nobody was subscribed.
    pub unheard: u64,
}

/// Broadcast bus for [`HubEvent`]s. Clones share the channel and counters.
#[derive(Debug, Clone)]
pub struct UpdateBus {
    sender: broadcast::Sender<HubEvent>,
    counters: Arc<Counters>,
}

impl UpdateBus {
    /// Creates a bus buffering up to `capacity` events per receiver
    /// (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Publishes an accepted update. Returns the number of receivers.
    pub fn publish_update(&self, event: UpdateEvent) -> usize {
        self.publish(HubEvent::Updated(event))
    }

    /// Publishes a notification. Returns the number of receivers.
    pub fn publish_notification(&self, notification: Notification) -> usize {
        self.publish(HubEvent::Notification(notification))
    }

    /// Signals that the retained history was cleared.
    pub fn publish_cleared(&self) -> usize {
        self.publish(HubEvent::HistoryCleared)
    }

    /// Publishes any hub event and counts it under its kind.
    pub fn publish(&self, event: HubEvent) -> usize {
        let counter = match &event {
            HubEvent::Updated(_) => &self.counters.updates,
            HubEvent::Notification(_) => &self.counters.notifications,
            HubEvent::HistoryCleared => &self.counters.clears,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let kind = event.kind_str();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::trace!(kind, receivers, "hub event published");
                receivers
            }
            Err(_) => {
                self.counters.unheard.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(kind, "hub event published with no subscribers");
                0
            }
        }
    }

    /// Receiver for every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    /// Live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish totals so far.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            updates: self.counters.updates.load(Ordering::Relaxed),
            notifications: self.counters.notifications.load(Ordering::Relaxed),
            clears: self.counters.clears.load(Ordering::Relaxed),
            unheard: self.counters.unheard.load(Ordering::Relaxed),
        }
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
