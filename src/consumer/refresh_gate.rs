//! Consumer-side refetch throttle.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::domain::UpdateEvent;

/// Default minimum spacing between two refetches of the same consumer.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(2_000);

/// Refuses a refetch that would start within `min_interval` of the
/// previous one.
///
/// Each consumer owns its own gate; the hub never sees it.
#[derive(Debug, Clone)]
pub struct RefreshGate {
    min_interval_ms: i64,
    last_refresh: Option<i64>,
    clock: Arc<dyn Clock>,
}

impl RefreshGate {
    /// Gate with the given spacing and clock.
    #[must_use]
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval_ms: i64::try_from(min_interval.as_millis()).unwrap_or(i64::MAX),
            last_refresh: None,
            clock,
        }
    }

    /// Gate with the given spacing on the system clock.
    #[must_use]
    pub fn with_system_clock(min_interval: Duration) -> Self {
        Self::new(min_interval, Arc::new(SystemClock))
    }

    /// Claims the gate. Returns `false` if the previous claim is too
    /// recent; otherwise records now as the last refresh.
    pub fn try_acquire(&mut self) -> bool {
        let now = self.clock.now_millis();
        if let Some(last) = self.last_refresh
            && now.saturating_sub(last) < self.min_interval_ms
        {
            return false;
        }
        self.last_refresh = Some(now);
        true
    }

    /// Decides whether `update` should trigger a refetch for a consumer of
    /// `data_type`: it must exist, belong to that type, and the gate must
    /// be open. Claims the gate on success.
    pub fn should_refresh(&mut self, update: Option<&UpdateEvent>, data_type: &str) -> bool {
        match update {
            Some(event) if event.data_type == data_type => self.try_acquire(),
            _ => false,
        }
    }

    /// Time of the last successful claim.
    #[must_use]
    pub const fn last_refresh(&self) -> Option<i64> {
        self.last_refresh
    }

    /// Forgets the last claim.
    pub fn reset(&mut self) {
        self.last_refresh = None;
    }
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::with_system_clock(DEFAULT_MIN_REFRESH_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn gate_at(now: i64) -> (RefreshGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let gate = RefreshGate::new(
            DEFAULT_MIN_REFRESH_INTERVAL,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (gate, clock)
    }

    #[test]
    fn second_claim_inside_interval_is_refused() {
        let (mut gate, clock) = gate_at(10_000);
        assert!(gate.try_acquire());
        clock.advance(1_999);
        assert!(!gate.try_acquire());
        clock.advance(1);
        assert!(gate.try_acquire());
        assert_eq!(gate.last_refresh(), Some(12_000));
    }

    #[test]
    fn only_matching_updates_refresh() {
        let (mut gate, _) = gate_at(0);
        let photo = UpdateEvent::new("photo", 1);
        assert!(!gate.should_refresh(None, "personal-info"));
        assert!(!gate.should_refresh(Some(&photo), "personal-info"));
        assert_eq!(gate.last_refresh(), None);
        assert!(gate.should_refresh(Some(&photo), "photo"));
        assert!(!gate.should_refresh(Some(&photo), "photo"));
    }

    #[test]
    fn reset_reopens_gate() {
        let (mut gate, _) = gate_at(0);
        assert!(gate.try_acquire());
        gate.reset();
        assert!(gate.try_acquire());
    }
}
