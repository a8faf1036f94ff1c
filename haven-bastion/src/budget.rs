//! Spend and concurrency budgets (spec §4.9): a daily USD ceiling on LLM
//! planning spend, an hourly call-count ceiling, and a concurrent-execution
//! ceiling. All three are enforced per site so one noisy site can't starve
//! the rest of the fleet.

use haven_types::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct BudgetLimits {
    pub daily_usd: f64,
    pub hourly_calls: u32,
    pub max_concurrent: u32,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            daily_usd: 10.0,
            hourly_calls: 60,
            max_concurrent: 3,
        }
    }
}

#[derive(Default)]
struct SiteLedger {
    day_window_start: Option<chrono::DateTime<chrono::Utc>>,
    spent_today_usd: f64,
    hour_window_start: Option<chrono::DateTime<chrono::Utc>>,
    calls_this_hour: u32,
    in_flight: u32,
}

/// Tracks spend and concurrency per site. Cheap to clone (`Arc` inside) so
/// every guardrail-pipeline invocation can hold its own handle.
#[derive(Clone)]
pub struct BudgetTracker {
    limits: BudgetLimits,
    clock: Arc<dyn Clock>,
    ledgers: Arc<Mutex<HashMap<String, SiteLedger>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDenial {
    DailySpendExhausted,
    HourlyCallsExhausted,
    ConcurrencyExhausted,
}

impl BudgetTracker {
    pub fn new(limits: BudgetLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            ledgers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Checks (but does not reserve) whether `site_id` has room for another
    /// call costing `estimated_cost_usd`.
    pub fn check(&self, site_id: &str, estimated_cost_usd: f64) -> Result<(), BudgetDenial> {
        let now = self.clock.now_utc();
        let mut guard = self.ledgers.lock();
        let ledger = guard.entry(site_id.to_string()).or_default();
        roll_windows(ledger, now);

        if ledger.spent_today_usd + estimated_cost_usd > self.limits.daily_usd {
            return Err(BudgetDenial::DailySpendExhausted);
        }
        if ledger.calls_this_hour >= self.limits.hourly_calls {
            return Err(BudgetDenial::HourlyCallsExhausted);
        }
        if ledger.in_flight >= self.limits.max_concurrent {
            return Err(BudgetDenial::ConcurrencyExhausted);
        }
        Ok(())
    }

    /// Reserves a concurrency slot and records a call. Call [`Self::release`]
    /// when the work completes, with the actual realized cost.
    pub fn reserve(&self, site_id: &str, estimated_cost_usd: f64) -> Result<(), BudgetDenial> {
        let now = self.clock.now_utc();
        let mut guard = self.ledgers.lock();
        let ledger = guard.entry(site_id.to_string()).or_default();
        roll_windows(ledger, now);

        if ledger.spent_today_usd + estimated_cost_usd > self.limits.daily_usd {
            return Err(BudgetDenial::DailySpendExhausted);
        }
        if ledger.calls_this_hour >= self.limits.hourly_calls {
            return Err(BudgetDenial::HourlyCallsExhausted);
        }
        if ledger.in_flight >= self.limits.max_concurrent {
            return Err(BudgetDenial::ConcurrencyExhausted);
        }

        ledger.spent_today_usd += estimated_cost_usd;
        ledger.calls_this_hour += 1;
        ledger.in_flight += 1;
        Ok(())
    }

    pub fn release(&self, site_id: &str, realized_cost_usd: f64, estimated_cost_usd: f64) {
        let mut guard = self.ledgers.lock();
        if let Some(ledger) = guard.get_mut(site_id) {
            ledger.in_flight = ledger.in_flight.saturating_sub(1);
            ledger.spent_today_usd += realized_cost_usd - estimated_cost_usd;
        }
    }
}

fn roll_windows(ledger: &mut SiteLedger, now: chrono::DateTime<chrono::Utc>) {
    let new_day = ledger
        .day_window_start
        .map(|start| now.date_naive() != start.date_naive())
        .unwrap_or(true);
    if new_day {
        ledger.day_window_start = Some(now);
        ledger.spent_today_usd = 0.0;
    }
    let new_hour = ledger
        .hour_window_start
        .map(|start| now.signed_duration_since(start) >= chrono::Duration::hours(1))
        .unwrap_or(true);
    if new_hour {
        ledger.hour_window_start = Some(now);
        ledger.calls_this_hour = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_types::FakeClock;

    #[test]
    fn denies_once_hourly_call_cap_is_reached() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(chrono::Utc::now()));
        let tracker = BudgetTracker::new(
            BudgetLimits {
                daily_usd: 1000.0,
                hourly_calls: 2,
                max_concurrent: 10,
            },
            clock,
        );
        tracker.reserve("site-a", 0.01).unwrap();
        tracker.release("site-a", 0.01, 0.01);
        tracker.reserve("site-a", 0.01).unwrap();
        tracker.release("site-a", 0.01, 0.01);
        assert_eq!(
            tracker.reserve("site-a", 0.01),
            Err(BudgetDenial::HourlyCallsExhausted)
        );
    }

    #[test]
    fn denies_when_concurrency_cap_reached() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(chrono::Utc::now()));
        let tracker = BudgetTracker::new(
            BudgetLimits {
                daily_usd: 1000.0,
                hourly_calls: 1000,
                max_concurrent: 1,
            },
            clock,
        );
        tracker.reserve("site-a", 0.01).unwrap();
        assert_eq!(
            tracker.reserve("site-a", 0.01),
            Err(BudgetDenial::ConcurrencyExhausted)
        );
    }

    #[test]
    fn sites_have_independent_ledgers() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(chrono::Utc::now()));
        let tracker = BudgetTracker::new(
            BudgetLimits {
                daily_usd: 1000.0,
                hourly_calls: 1,
                max_concurrent: 10,
            },
            clock,
        );
        tracker.reserve("site-a", 0.01).unwrap();
        assert!(tracker.reserve("site-b", 0.01).is_ok());
    }
}
