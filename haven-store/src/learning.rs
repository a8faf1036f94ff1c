//! Learning loop: scores [`PatternStats`] promotion candidates with the
//! confidence formula of spec §4.10 and turns eligible ones into promoted
//! L1 [`Rule`]s. Runs on a 24-hour cadence in the supervisor; exposed here
//! as pure functions plus the store-backed driver so the formula itself is
//! unit-testable without a database.

use chrono::{DateTime, Utc};
use haven_types::{Clock, PatternStats, Rule, RuleSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Volume bonus caps at 0.10 once `occurrences` reaches 50 (spec §4.10).
const VOLUME_BONUS_DIVISOR: f64 = 50.0;
const VOLUME_BONUS_CAP: f64 = 0.10;
const ACTION_CONSISTENCY_WEIGHT: f64 = 0.10;
/// Staleness penalty caps at 0.20 once the pattern hasn't been seen in 30
/// days (spec §4.10).
const STALENESS_DIVISOR_DAYS: f64 = 30.0;
const STALENESS_PENALTY_CAP: f64 = 0.20;

/// Implements the exact formula of spec §4.10:
///
/// ```text
/// confidence = success_rate
///            + min(occurrences/50, 0.10)
///            + action_consistency * 0.10
///            - min(days_since_last_seen/30, 0.20)
/// ```
///
/// clamped to `[0, 1]`.
pub fn confidence_score(stats: &PatternStats, now: DateTime<Utc>) -> f64 {
    let volume_bonus = (stats.occurrences as f64 / VOLUME_BONUS_DIVISOR).min(VOLUME_BONUS_CAP);
    let consistency_bonus = stats.action_consistency() * ACTION_CONSISTENCY_WEIGHT;
    let days_since_last_seen = stats
        .last_seen
        .map(|seen| (now - seen).num_seconds().max(0) as f64 / 86_400.0)
        .unwrap_or(f64::MAX);
    let staleness_penalty = (days_since_last_seen / STALENESS_DIVISOR_DAYS).min(STALENESS_PENALTY_CAP);

    (stats.success_rate() + volume_bonus + consistency_bonus - staleness_penalty).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy)]
pub struct PromotionPolicy {
    pub confidence_threshold: f64,
    pub auto_promote: bool,
    /// Number of L1-handled incidents the post-promotion watcher observes
    /// before judging a promoted rule (spec §4.10).
    pub watch_window: u32,
    pub rollback_on_failure_rate: f64,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
            auto_promote: true,
            watch_window: 20,
            rollback_on_failure_rate: 0.5,
        }
    }
}

pub enum PromotionDecision {
    Promote { rule: Rule, confidence: f64 },
    ReviewQueue { confidence: f64 },
    NotEligible,
}

/// Builds the promoted [`Rule`] for a candidate whose confidence clears
/// `policy.confidence_threshold` and for which `policy.auto_promote` is
/// set; patterns below threshold land in the review queue instead (spec
/// §4.10).
pub fn decide_promotion(
    stats: &PatternStats,
    now: DateTime<Utc>,
    policy: &PromotionPolicy,
    rule_id: impl Into<String>,
) -> PromotionDecision {
    if !stats.promotion_eligible {
        return PromotionDecision::NotEligible;
    }
    let confidence = confidence_score(stats, now);
    if confidence < policy.confidence_threshold {
        return PromotionDecision::ReviewQueue { confidence };
    }
    if !policy.auto_promote {
        return PromotionDecision::ReviewQueue { confidence };
    }

    let action = stats
        .dominant_action()
        .unwrap_or("escalate")
        .to_string();

    let rule = Rule {
        id: rule_id.into(),
        name: format!("promoted-{}", stats.pattern_signature),
        description: format!(
            "Auto-promoted from {} resolved occurrences (confidence {:.2})",
            stats.occurrences, confidence
        ),
        enabled: true,
        priority: 50,
        source: RuleSource::Promoted,
        conditions: vec![haven_types::Condition {
            field: "pattern_signature".to_string(),
            operator: haven_types::Operator::Eq,
            value: haven_types::Value::from(stats.pattern_signature.as_str()),
        }],
        action,
        action_params: haven_types::Value::Null,
        hipaa_controls: vec![],
        cooldown_seconds: 300,
        max_retries: 1,
        promotion: Some(haven_types::PromotionMetadata {
            confidence,
            sample_incident_refs: vec![],
            promoted_at: now,
            promoted_by: "learning_loop".to_string(),
        }),
    };

    PromotionDecision::Promote { rule, confidence }
}

/// Observes the first `watch_window` L1-handled incidents of a newly
/// promoted rule; if the running success rate drops below
/// `rollback_on_failure_rate` the rule should be disabled and the pattern
/// returned to L2 (spec §4.10 post-promotion watcher).
#[derive(Default)]
pub struct PromotionWatcher {
    windows: Mutex<HashMap<String, WatchWindow>>,
}

#[derive(Default, Clone)]
struct WatchWindow {
    observed: u32,
    successes: u32,
}

pub enum WatchOutcome {
    StillWatching,
    WindowComplete { success_rate: f64, should_rollback: bool },
}

impl PromotionWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, rule_id: &str, success: bool, policy: &PromotionPolicy) -> WatchOutcome {
        let mut windows = self.windows.lock();
        let window = windows.entry(rule_id.to_string()).or_default();
        window.observed += 1;
        if success {
            window.successes += 1;
        }

        if window.observed < policy.watch_window {
            return WatchOutcome::StillWatching;
        }

        let success_rate = window.successes as f64 / window.observed as f64;
        let should_rollback = success_rate < policy.rollback_on_failure_rate;
        windows.remove(rule_id);
        WatchOutcome::WindowComplete { success_rate, should_rollback }
    }
}

/// Convenience wrapper binding a [`PromotionWatcher`] to an injectable
/// [`Clock`] for components that need `now()` alongside watch state.
pub struct LearningLoopClock {
    pub clock: Arc<dyn Clock>,
}

impl LearningLoopClock {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn stats_with(occurrences: u64, successes: u64, l2: u64, avg_ms: f64, last_seen: DateTime<Utc>) -> PatternStats {
        let mut action_frequencies = BTreeMap::new();
        action_frequencies.insert("restart_logging_service".to_string(), successes);
        PatternStats {
            pattern_signature: "sig-1".to_string(),
            occurrences,
            l1_resolutions: 0,
            l2_resolutions: l2,
            l3_resolutions: 0,
            successes,
            failures: occurrences - successes,
            avg_resolution_time_ms: avg_ms,
            last_seen: Some(last_seen),
            promotion_eligible: true,
            action_frequencies,
        }
    }

    #[test]
    fn flywheel_scenario_yields_a_high_confidence_promotion() {
        let now = Utc::now();
        let stats = stats_with(10, 9, 10, 2_500.0, now);
        let confidence = confidence_score(&stats, now);
        assert!(confidence >= 0.9, "expected high confidence, got {confidence}");

        let policy = PromotionPolicy::default();
        match decide_promotion(&stats, now, &policy, "promoted-sig-1") {
            PromotionDecision::Promote { rule, .. } => {
                assert_eq!(rule.priority, 50);
                assert_eq!(rule.action, "restart_logging_service");
                assert_eq!(rule.source, RuleSource::Promoted);
            }
            _ => panic!("expected a promotion"),
        }
    }

    #[test]
    fn stale_patterns_are_penalized() {
        let now = Utc::now();
        let fresh = stats_with(10, 9, 10, 2_500.0, now);
        let stale = stats_with(10, 9, 10, 2_500.0, now - Duration::days(60));
        assert!(confidence_score(&fresh, now) > confidence_score(&stale, now));
    }

    #[test]
    fn below_threshold_candidates_land_in_review_queue() {
        let now = Utc::now();
        let mut stats = stats_with(5, 5, 3, 2_500.0, now - Duration::days(25));
        stats.successes = 5;
        stats.occurrences = 5;
        let policy = PromotionPolicy { confidence_threshold: 0.999, ..PromotionPolicy::default() };
        match decide_promotion(&stats, now, &policy, "r") {
            PromotionDecision::ReviewQueue { .. } => {}
            _ => panic!("expected review queue"),
        }
    }

    #[test]
    fn watcher_rolls_back_when_success_rate_drops() {
        let watcher = PromotionWatcher::new();
        let policy = PromotionPolicy { watch_window: 4, rollback_on_failure_rate: 0.75, ..PromotionPolicy::default() };
        watcher.record_outcome("rule-1", true, &policy);
        watcher.record_outcome("rule-1", false, &policy);
        watcher.record_outcome("rule-1", false, &policy);
        let outcome = watcher.record_outcome("rule-1", true, &policy);
        match outcome {
            WatchOutcome::WindowComplete { should_rollback, success_rate } => {
                assert!(should_rollback);
                assert!((success_rate - 0.5).abs() < 1e-9);
            }
            _ => panic!("expected window completion"),
        }
    }
}
