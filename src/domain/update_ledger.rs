//! Deduplication, ordering and bounded history for update events.
//!
//! [`UpdateLedger`] is the synchronous core of the hub. It holds the
//! timestamp cursor, the last accepted update and the retained history,
//! and decides for every incoming event whether it is accepted.
//!
//! # Admission order
//!
//! For an event with timestamp `t` and cursor `c`:
//!
//! 1. `t == c` → [`Admission::Duplicate`]
//! 2. `t < c` → [`Admission::Stale`]
//! 3. otherwise → [`Admission::Accepted`]; the cursor moves to `t`
//!
//! With [`CursorScope::Global`] there is a single cursor for all data types,
//! so a newer update for one category causes an older update for another
//! category to be dropped when it arrives later.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::UpdateEvent;

/// Default number of retained history entries.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Which events share a timestamp cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorScope {
    /// One cursor across every data type.
    #[default]
    Global,
    /// One cursor per data type.
    PerDataType,
}

impl FromStr for CursorScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "per_data_type" | "per-data-type" => Ok(Self::PerDataType),
            other => Err(format!("unknown cursor scope `{other}`")),
        }
    }
}

impl fmt::Display for CursorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::PerDataType => f.write_str("per_data_type"),
        }
    }
}

/// Outcome of [`UpdateLedger::offer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The event became `last_update` and was appended to history.
    Accepted,
    /// Same timestamp as the cursor.
    Duplicate,
    /// Older than the cursor.
    Stale,
}

/// Bounded, ordered record of accepted updates.
#[derive(Debug, Clone)]
pub struct UpdateLedger {
    capacity: usize,
    scope: CursorScope,
    cursor: Option<i64>,
    cursors_by_type: HashMap<String, i64>,
    last_update: Option<UpdateEvent>,
    history: VecDeque<UpdateEvent>,
}

impl UpdateLedger {
    /// Creates an empty ledger. A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize, scope: CursorScope) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            scope,
            cursor: None,
            cursors_by_type: HashMap::new(),
            last_update: None,
            history: VecDeque::with_capacity(capacity),
        }
    }

    /// Applies the admission checks and, if accepted, records the event.
    ///
    /// The comparison and the state change happen in one `&mut self` call,
    /// so callers holding a lock across this method get atomic
    /// read-modify-write semantics.
    pub fn offer(&mut self, event: UpdateEvent) -> Admission {
        let cursor = match self.scope {
            CursorScope::Global => self.cursor,
            CursorScope::PerDataType => self.cursors_by_type.get(&event.data_type).copied(),
        };

        match cursor {
            Some(c) if event.timestamp == c => return Admission::Duplicate,
            Some(c) if event.timestamp < c => return Admission::Stale,
            _ => {}
        }

        // Global cursor always advances so `last_processed_timestamp` stays
        // meaningful in either scope.
        self.cursor = Some(self.cursor.map_or(event.timestamp, |c| c.max(event.timestamp)));
        if self.scope == CursorScope::PerDataType {
            self.cursors_by_type
                .insert(event.data_type.clone(), event.timestamp);
        }

        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(event.clone());
        self.last_update = Some(event);
        Admission::Accepted
    }

    /// Highest accepted timestamp so far.
    #[must_use]
    pub const fn last_processed_timestamp(&self) -> Option<i64> {
        self.cursor
    }

    /// Most recently accepted update.
    #[must_use]
    pub const fn last_update(&self) -> Option<&UpdateEvent> {
        self.last_update.as_ref()
    }

    /// Retained history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &UpdateEvent> {
        self.history.iter()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Returns `true` if no entries are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Maximum number of retained entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cursor scope in effect.
    #[must_use]
    pub const fn scope(&self) -> CursorScope {
        self.scope
    }

    /// Retained entries for `data_type`, oldest first.
    #[must_use]
    pub fn updates_for(&self, data_type: &str) -> Vec<UpdateEvent> {
        self.history
            .iter()
            .filter(|e| e.data_type == data_type)
            .cloned()
            .collect()
    }

    /// Returns `true` if a retained entry for `data_type` has a timestamp
    /// strictly greater than `now_ms - window_ms`.
    #[must_use]
    pub fn has_recent(&self, data_type: &str, window_ms: i64, now_ms: i64) -> bool {
        let threshold = now_ms.saturating_sub(window_ms);
        self.history
            .iter()
            .any(|e| e.data_type == data_type && e.timestamp > threshold)
    }

    /// Drops all retained entries. The cursor and `last_update` are kept,
    /// so late events older than the cursor are still rejected.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

impl Default for UpdateLedger {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, CursorScope::Global)
    }
}
