//! Multi-listener registry keyed by event name.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use crate::domain::ListenerId;
use crate::sync;

/// Callback invoked with the raw payload of an event.
pub type EventHandler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Event name → ordered list of handlers.
///
/// Handlers run outside the registry lock, so a handler may add or remove
/// listeners without deadlocking. A panicking handler is logged and does
/// not prevent the remaining handlers from running.
#[derive(Default)]
pub struct ListenerRegistry {
    handlers: RwLock<HashMap<String, Vec<(ListenerId, EventHandler)>>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event` and returns its handle.
    pub fn add(&self, event: &str, handler: EventHandler) -> ListenerId {
        let id = ListenerId::new();
        sync::write(&self.handlers)
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes the handler registered under `id` for `event`.
    ///
    /// Returns `false` if no such handler exists.
    pub fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut map = sync::write(&self.handlers);
        let Some(list) = map.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(event);
        }
        removed
    }

    /// Invokes every handler registered for `event`, in registration order.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &str, data: &serde_json::Value) -> usize {
        let snapshot: Vec<EventHandler> = sync::read(&self.handlers)
            .get(event)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(data))).is_err() {
                tracing::error!(event, "event listener panicked");
            }
        }
        snapshot.len()
    }

    /// Number of handlers registered for `event`.
    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        sync::read(&self.handlers).get(event).map_or(0, Vec::len)
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = sync::read(&self.handlers);
        let counts: HashMap<&str, usize> = map.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("ListenerRegistry")
            .field("handlers", &counts)
            .finish()
    }
}
