//! Per-consumer data type subscriptions.
//!
//! Consumers usually care about one or two categories. A
//! [`DataTypeSubscription`] wraps a hub bus receiver and yields only the
//! accepted updates whose data type matches its [`DataTypeFilter`].

use std::collections::HashSet;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::domain::{HubEvent, UpdateEvent};

/// Wildcard that matches every data type.
pub const ANY_DATA_TYPE: &str = "*";

/// Set of data types a consumer wants to hear about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataTypeFilter {
    /// Subscribed data types. Ignored while `subscribe_all` is set.
    data_types: HashSet<String>,
    /// Whether every data type matches (wildcard `"*"`).
    subscribe_all: bool,
}

impl DataTypeFilter {
    /// Creates an empty filter that matches nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter that matches every data type.
    #[must_use]
    pub fn all() -> Self {
        Self {
            data_types: HashSet::new(),
            subscribe_all: true,
        }
    }

    /// Adds a data type. `"*"` enables the wildcard.
    pub fn subscribe(&mut self, data_type: impl Into<String>) {
        let data_type = data_type.into();
        if data_type == ANY_DATA_TYPE {
            self.subscribe_all = true;
        } else {
            self.data_types.insert(data_type);
        }
    }

    /// Removes a data type. `"*"` disables the wildcard.
    pub fn unsubscribe(&mut self, data_type: &str) {
        if data_type == ANY_DATA_TYPE {
            self.subscribe_all = false;
        } else {
            self.data_types.remove(data_type);
        }
    }

    /// Returns `true` if `data_type` passes the filter.
    #[must_use]
    pub fn matches(&self, data_type: &str) -> bool {
        self.subscribe_all || self.data_types.contains(data_type)
    }

    /// Number of explicitly subscribed data types.
    #[must_use]
    pub fn count(&self) -> usize {
        self.data_types.len()
    }

    /// Returns `true` if the wildcard is active.
    #[must_use]
    pub fn is_subscribed_all(&self) -> bool {
        self.subscribe_all
    }
}

impl<S: Into<String>> FromIterator<S> for DataTypeFilter {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut filter = Self::new();
        for data_type in iter {
            filter.subscribe(data_type);
        }
        filter
    }
}

/// Hub receiver narrowed to a [`DataTypeFilter`].
#[derive(Debug)]
pub struct DataTypeSubscription {
    receiver: broadcast::Receiver<HubEvent>,
    filter: DataTypeFilter,
}

impl DataTypeSubscription {
    /// Wraps `receiver`.
    #[must_use]
    pub fn new(receiver: broadcast::Receiver<HubEvent>, filter: DataTypeFilter) -> Self {
        Self { receiver, filter }
    }

    /// Current filter.
    #[must_use]
    pub fn filter(&self) -> &DataTypeFilter {
        &self.filter
    }

    /// Mutable access to the filter.
    pub fn filter_mut(&mut self) -> &mut DataTypeFilter {
        &mut self.filter
    }

    /// Waits for the next matching update.
    ///
    /// Returns `None` once the hub is gone. If this receiver lagged behind
    /// the bus, the skipped events are logged and lost.
    pub async fn next(&mut self) -> Option<UpdateEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(HubEvent::Updated(event)) if self.filter.matches(&event.data_type) => {
                    return Some(event);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscription lagged behind update bus");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next matching update that is already queued, without
    /// waiting.
    pub fn try_next(&mut self) -> Option<UpdateEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(HubEvent::Updated(event)) if self.filter.matches(&event.data_type) => {
                    return Some(event);
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscription lagged behind update bus");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::UpdateBus;

    fn updated(data_type: &str, timestamp: i64) -> HubEvent {
        HubEvent::Updated(UpdateEvent::new(data_type, timestamp))
    }

    #[test]
    fn empty_matches_nothing() {
        assert!(!DataTypeFilter::new().matches("photo"));
    }

    #[test]
    fn wildcard_matches_everything() {
        let filter: DataTypeFilter = ["*"].into_iter().collect();
        assert!(filter.is_subscribed_all());
        assert!(filter.matches("photo"));
        assert!(filter.matches("skills"));
        assert_eq!(filter.count(), 0);
        assert!(DataTypeFilter::all().matches("anything"));
    }

    #[test]
    fn unsubscribe_removes_type() {
        let mut filter: DataTypeFilter = ["photo", "skills"].into_iter().collect();
        assert_eq!(filter.count(), 2);
        filter.unsubscribe("photo");
        assert!(!filter.matches("photo"));
        assert!(filter.matches("skills"));
    }

    #[tokio::test]
    async fn next_skips_other_types_and_non_updates() {
        let bus = UpdateBus::new(16);
        let mut sub =
            DataTypeSubscription::new(bus.subscribe(), ["personal-info"].into_iter().collect());
        bus.publish(updated("photo", 1));
        bus.publish(HubEvent::HistoryCleared);
        bus.publish(updated("personal-info", 2));
        let Some(event) = sub.next().await else {
            panic!("expected an update");
        };
        assert_eq!(event.timestamp, 2);
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn next_ends_when_bus_dropped() {
        let bus = UpdateBus::new(4);
        let mut sub = DataTypeSubscription::new(bus.subscribe(), DataTypeFilter::all());
        drop(bus);
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn try_next_recovers_from_lag() {
        let bus = UpdateBus::new(2);
        let mut sub = DataTypeSubscription::new(bus.subscribe(), DataTypeFilter::all());
        for t in 0..5 {
            bus.publish(updated("photo", t));
        }
        let got: Vec<i64> = std::iter::from_fn(|| sub.try_next())
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(got, vec![3, 4]);
    }
}
