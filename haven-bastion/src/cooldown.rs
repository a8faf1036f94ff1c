//! (site, host, action)-keyed cooldown tracking: refuses to re-fire the same
//! remediation against the same host within a minimum interval, preventing
//! flapping rules from hammering an appliance (spec §4.9). Keyed on the
//! monotonic clock, not wall time, so a system clock adjustment can't reset
//! a cooldown early or late.

use haven_types::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct CooldownTracker {
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    last_fired: Arc<Mutex<HashMap<(String, String, String), Instant>>>,
}

impl CooldownTracker {
    pub fn new(cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cooldown,
            clock,
            last_fired: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_default_cooldown(clock: Arc<dyn Clock>) -> Self {
        Self::new(DEFAULT_COOLDOWN, clock)
    }

    fn key(site_id: &str, host_id: &str, action: &str) -> (String, String, String) {
        (site_id.to_string(), host_id.to_string(), action.to_lowercase())
    }

    /// True if `action` may fire now against `host_id` at `site_id`.
    pub fn is_ready(&self, site_id: &str, host_id: &str, action: &str) -> bool {
        let guard = self.last_fired.lock();
        match guard.get(&Self::key(site_id, host_id, action)) {
            Some(&last) => self.clock.now_monotonic().duration_since(last) >= self.cooldown,
            None => true,
        }
    }

    /// Records that `action` just fired against `host_id` at `site_id`,
    /// starting its cooldown window.
    pub fn record_fired(&self, site_id: &str, host_id: &str, action: &str) {
        let mut guard = self.last_fired.lock();
        guard.insert(Self::key(site_id, host_id, action), self.clock.now_monotonic());
    }

    /// Seconds remaining before `action` is ready again, or `0` if ready now.
    pub fn remaining(&self, site_id: &str, host_id: &str, action: &str) -> Duration {
        let guard = self.last_fired.lock();
        match guard.get(&Self::key(site_id, host_id, action)) {
            Some(&last) => {
                let elapsed = self.clock.now_monotonic().duration_since(last);
                self.cooldown.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_types::FakeClock;

    #[test]
    fn blocks_repeat_action_within_window_then_allows_after_advance() {
        let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
        let tracker = CooldownTracker::new(Duration::from_secs(60), clock.clone());

        assert!(tracker.is_ready("site-a", "host-1", "restart_service"));
        tracker.record_fired("site-a", "host-1", "restart_service");
        assert!(!tracker.is_ready("site-a", "host-1", "restart_service"));

        clock.advance(Duration::from_secs(61));
        assert!(tracker.is_ready("site-a", "host-1", "restart_service"));
    }

    #[test]
    fn different_hosts_have_independent_cooldowns() {
        let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
        let tracker = CooldownTracker::new(Duration::from_secs(60), clock);
        tracker.record_fired("site-a", "host-1", "restart_service");
        assert!(tracker.is_ready("site-a", "host-2", "restart_service"));
    }
}
