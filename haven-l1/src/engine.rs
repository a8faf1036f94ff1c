//! [`L1Engine`]: matches an incident against the loaded rule set in
//! priority/id order, skipping rules on cooldown without consuming them
//! (spec §4.2).

use crate::condition::{evaluate, incident_value};
use crate::cooldown::RuleCooldownTracker;
use haven_types::rule::rule_ordering_key;
use haven_types::{Clock, Incident, Rule, Value};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

/// A rule plus its precompiled regex conditions, in condition order.
/// `regexes[i]` is `Some` only when `rule.conditions[i].operator` is `regex`.
pub struct CompiledRule {
    pub rule: Rule,
    pub regexes: Vec<Option<Regex>>,
}

pub struct L1Engine {
    rules: Vec<CompiledRule>,
    cooldowns: RuleCooldownTracker,
}

impl L1Engine {
    /// `rules` need not be pre-sorted; construction sorts by
    /// [`rule_ordering_key`] (descending priority, then ascending id) once.
    pub fn new(mut rules: Vec<CompiledRule>, clock: Arc<dyn Clock>) -> Self {
        rules.sort_by(|a, b| rule_ordering_key(&a.rule).cmp(&rule_ordering_key(&b.rule)));
        Self {
            rules,
            cooldowns: RuleCooldownTracker::new(clock),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Finds the highest-priority enabled rule whose conditions all match
    /// `incident` and which isn't in cooldown for `incident.host_id`,
    /// returning the rule and its resolved `action_params`. A rule skipped
    /// for cooldown is not consumed: the next eligible rule still gets to
    /// match, and the skipped rule remains eligible once its own cooldown
    /// elapses.
    pub fn match_incident(&self, incident: &Incident) -> Option<(&Rule, Value)> {
        let value = incident_value(incident);
        for compiled in &self.rules {
            if !compiled.rule.enabled {
                continue;
            }
            let all_match = compiled
                .rule
                .conditions
                .iter()
                .zip(compiled.regexes.iter())
                .all(|(cond, re)| evaluate(cond, re.as_ref(), &value));
            if !all_match {
                continue;
            }
            if !self.cooldowns.is_ready(
                &compiled.rule.id,
                &incident.host_id,
                Duration::from_secs(compiled.rule.cooldown_seconds),
            ) {
                continue;
            }
            return Some((&compiled.rule, compiled.rule.action_params.clone()));
        }
        None
    }

    /// Call once the matched rule's action has actually been dispatched, to
    /// start its cooldown window. Kept separate from [`Self::match_incident`]
    /// so a caller that decides not to dispatch (e.g. the guardrail pipeline
    /// blocks it) doesn't spuriously start the rule's cooldown.
    pub fn record_fired(&self, rule_id: &str, host_id: &str) {
        self.cooldowns.record_fired(rule_id, host_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use haven_types::{Condition, FakeClock, Operator, Rule, RuleSource, Severity, Value};
    use std::collections::BTreeMap;

    fn rule(id: &str, priority: i64, incident_type: &str, action: &str) -> CompiledRule {
        CompiledRule {
            rule: Rule {
                id: id.to_string(),
                name: id.to_string(),
                description: String::new(),
                enabled: true,
                priority,
                source: RuleSource::Builtin,
                conditions: vec![Condition {
                    field: "incident_type".to_string(),
                    operator: Operator::Eq,
                    value: Value::from(incident_type),
                }],
                action: action.to_string(),
                action_params: Value::Null,
                hipaa_controls: vec![],
                cooldown_seconds: 300,
                max_retries: 1,
                promotion: None,
            },
            regexes: vec![None],
        }
    }

    fn incident(incident_type: &str) -> Incident {
        Incident::new(
            "inc-1",
            "site-a",
            "host-1",
            incident_type,
            Severity::High,
            Utc::now(),
            Value::Map(BTreeMap::new()),
        )
    }

    #[test]
    fn higher_priority_rule_wins_over_lower_priority_rule() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let engine = L1Engine::new(
            vec![rule("low", 100, "firewall", "a"), rule("high", 200, "firewall", "b")],
            clock,
        );
        let (matched, _) = engine.match_incident(&incident("firewall")).unwrap();
        assert_eq!(matched.id, "high");
    }

    #[test]
    fn tie_break_is_ascending_id_when_priority_is_equal() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let engine = L1Engine::new(
            vec![rule("zzz", 100, "firewall", "a"), rule("aaa", 100, "firewall", "b")],
            clock,
        );
        let (matched, _) = engine.match_incident(&incident("firewall")).unwrap();
        assert_eq!(matched.id, "aaa");
    }

    #[test]
    fn rule_in_cooldown_is_skipped_without_being_consumed() {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let engine = L1Engine::new(
            vec![rule("only", 100, "firewall", "a")],
            clock.clone() as Arc<dyn Clock>,
        );
        let (matched, _) = engine.match_incident(&incident("firewall")).unwrap();
        engine.record_fired(&matched.id, "host-1");
        assert!(engine.match_incident(&incident("firewall")).is_none());

        clock.advance(Duration::from_secs(301));
        assert!(engine.match_incident(&incident("firewall")).is_some());
    }

    #[test]
    fn disabled_rule_never_matches() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let mut r = rule("off", 100, "firewall", "a");
        r.rule.enabled = false;
        let engine = L1Engine::new(vec![r], clock);
        assert!(engine.match_incident(&incident("firewall")).is_none());
    }
}
