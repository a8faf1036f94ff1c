//! Injectable clock and cooldown jitter.
//!
//! The source this system was distilled from relied implicitly on wall-clock
//! time throughout. Every cooldown, TTL, and backoff in this workspace
//! instead consumes a [`Clock`] trait object so the test suite can advance
//! time deterministically and so that cooldowns are computed from a
//! monotonic source, not wall clock (clock-moves-backwards boundary
//! behavior, spec §8).

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Time source used throughout the agent. `now_utc` feeds timestamps that
/// are embedded in persisted records (evidence, incidents); `now_monotonic`
/// feeds every duration comparison (cooldowns, TTLs, backoff) so that wall
/// clock adjustments never affect rate limiting.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    fn now_monotonic(&self) -> Instant;
}

/// Production clock backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic clock for tests: wall-clock and monotonic time both advance
/// only when explicitly told to.
pub struct FakeClock {
    utc_offset_ms: AtomicU64,
    base_utc: DateTime<Utc>,
    base_monotonic: Instant,
}

impl FakeClock {
    pub fn new(base_utc: DateTime<Utc>) -> Self {
        Self {
            utc_offset_ms: AtomicU64::new(0),
            base_utc,
            base_monotonic: Instant::now(),
        }
    }

    pub fn advance(&self, d: Duration) {
        self.utc_offset_ms
            .fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }

    fn offset(&self) -> Duration {
        Duration::from_millis(self.utc_offset_ms.load(Ordering::SeqCst))
    }
}

impl Clock for FakeClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.base_utc + chrono::Duration::from_std(self.offset()).unwrap_or_default()
    }

    fn now_monotonic(&self) -> Instant {
        self.base_monotonic + self.offset()
    }
}

/// Applies symmetric jitter of `±fraction` to `base` (e.g. `fraction = 0.10`
/// for the ±10% poll-cadence and check-in jitter required by spec §2/§4.11).
pub fn jittered(base: Duration, fraction: f64, rng: &mut impl Rng) -> Duration {
    let factor = 1.0 + rng.random_range(-fraction..=fraction);
    let nanos = (base.as_nanos() as f64 * factor).max(0.0);
    Duration::from_nanos(nanos as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let mut rng = rand::rng();
        let base = Duration::from_secs(60);
        for _ in 0..1000 {
            let d = jittered(base, 0.10, &mut rng);
            assert!(d >= Duration::from_secs_f64(54.0));
            assert!(d <= Duration::from_secs_f64(66.0));
        }
    }

    #[test]
    fn fake_clock_advances_both_sources_together() {
        let clock = FakeClock::new(Utc::now());
        let t0 = clock.now_monotonic();
        let u0 = clock.now_utc();
        clock.advance(Duration::from_secs(30));
        assert!(clock.now_monotonic() >= t0 + Duration::from_secs(30));
        assert!(clock.now_utc() >= u0 + chrono::Duration::seconds(30));
    }
}
