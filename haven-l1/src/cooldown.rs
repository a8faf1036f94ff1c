//! Per-(rule, host) cooldown tracking inside the L1 engine. Distinct from
//! [`haven_bastion::CooldownTracker`]'s per-(site, host, action) guardrail
//! cooldown: a rule on cooldown is skipped during matching without being
//! consumed, so the next eligible rule still gets a chance to fire (spec
//! §4.2). Keyed on the monotonic clock, matching the guardrail cooldown's
//! reasoning — a wall-clock adjustment must never reset or extend a window.

use haven_types::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RuleCooldownTracker {
    clock: Arc<dyn Clock>,
    last_fired: Mutex<HashMap<(String, String), Instant>>,
}

impl RuleCooldownTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_ready(&self, rule_id: &str, host_id: &str, cooldown: Duration) -> bool {
        let guard = self.last_fired.lock();
        match guard.get(&(rule_id.to_string(), host_id.to_string())) {
            Some(&last) => self.clock.now_monotonic().duration_since(last) >= cooldown,
            None => true,
        }
    }

    pub fn record_fired(&self, rule_id: &str, host_id: &str) {
        let mut guard = self.last_fired.lock();
        guard.insert(
            (rule_id.to_string(), host_id.to_string()),
            self.clock.now_monotonic(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_types::FakeClock;

    #[test]
    fn blocks_repeat_fire_for_the_same_rule_and_host_then_allows_after_advance() {
        let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
        let tracker = RuleCooldownTracker::new(clock.clone());
        let cooldown = Duration::from_secs(300);

        assert!(tracker.is_ready("rule-1", "host-1", cooldown));
        tracker.record_fired("rule-1", "host-1");
        assert!(!tracker.is_ready("rule-1", "host-1", cooldown));

        clock.advance(Duration::from_secs(301));
        assert!(tracker.is_ready("rule-1", "host-1", cooldown));
    }

    #[test]
    fn cooldown_is_independent_per_host() {
        let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
        let tracker = RuleCooldownTracker::new(clock);
        tracker.record_fired("rule-1", "host-1");
        assert!(tracker.is_ready("rule-1", "host-2", Duration::from_secs(300)));
    }
}
