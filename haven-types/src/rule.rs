//! [`Rule`] — a declarative L1 entry (spec §3, §4.2). Parsed eagerly at load
//! time from data files; invalid rules are rejected with actionable
//! diagnostics and never loaded (spec §9 design note on the rule DSL).

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    Builtin,
    Custom,
    Promoted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Contains,
    Regex,
    Gt,
    Lt,
    In,
    NotIn,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromotionMetadata {
    pub confidence: f64,
    pub sample_incident_refs: Vec<String>,
    pub promoted_at: DateTime<Utc>,
    pub promoted_by: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub priority: i64,
    pub source: RuleSource,
    pub conditions: Vec<Condition>,
    pub action: String,
    pub action_params: Value,
    #[serde(default)]
    pub hipaa_controls: Vec<String>,
    pub cooldown_seconds: u64,
    pub max_retries: u32,
    #[serde(default)]
    pub promotion: Option<PromotionMetadata>,
}

impl Rule {
    /// Builtin rules default to priority ≥ 100, promoted rules default to
    /// 50 (spec §4.2). Returns `true` when `priority` respects that floor
    /// for the rule's declared `source`.
    pub fn has_canonical_priority(&self) -> bool {
        match self.source {
            RuleSource::Builtin => self.priority >= 100,
            RuleSource::Promoted => self.priority == 50,
            RuleSource::Custom => true,
        }
    }
}

/// Ordering used by `load_rules`: descending priority, then ascending `id`
/// (spec §4.2 tie-break).
pub fn rule_ordering_key(rule: &Rule) -> (std::cmp::Reverse<i64>, String) {
    (std::cmp::Reverse(rule.priority), rule.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, priority: i64) -> Rule {
        Rule {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            enabled: true,
            priority,
            source: RuleSource::Custom,
            conditions: vec![],
            action: "restart_service".to_string(),
            action_params: Value::Null,
            hipaa_controls: vec![],
            cooldown_seconds: 300,
            max_retries: 1,
            promotion: None,
        }
    }

    #[test]
    fn sort_order_is_priority_desc_then_id_asc() {
        let mut rules = vec![rule("b", 50), rule("a", 50), rule("z", 100)];
        rules.sort_by_key(rule_ordering_key);
        let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "b"]);
    }

    #[test]
    fn builtin_rule_below_priority_floor_is_flagged() {
        let mut r = rule("builtin-1", 50);
        r.source = RuleSource::Builtin;
        assert!(!r.has_canonical_priority());
        r.priority = 100;
        assert!(r.has_canonical_priority());
    }
}
