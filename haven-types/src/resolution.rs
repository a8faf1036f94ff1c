//! [`Resolution`] — the outcome of running an incident through the
//! three-tier pipeline (spec §3).

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionLevel {
    L1,
    L2,
    L3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
    Escalated,
    Blocked,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resolution {
    pub incident_id: String,
    pub resolution_level: ResolutionLevel,
    pub action: String,
    pub action_params: Value,
    pub outcome: Outcome,
    pub resolution_time_ms: u64,
    pub resolved_at: DateTime<Utc>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub llm_tokens_in: Option<u64>,
    #[serde(default)]
    pub llm_tokens_out: Option<u64>,
}

impl Resolution {
    /// Builder-style constructor for the common case (no LLM cost fields);
    /// the L2 planner path fills those in separately via `with_llm_usage`.
    pub fn new(
        incident_id: impl Into<String>,
        resolution_level: ResolutionLevel,
        action: impl Into<String>,
        action_params: Value,
        outcome: Outcome,
        resolution_time_ms: u64,
        resolved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            incident_id: incident_id.into(),
            resolution_level,
            action: action.into(),
            action_params,
            outcome,
            resolution_time_ms,
            resolved_at,
            error_message: None,
            reasoning: None,
            cost_usd: None,
            llm_tokens_in: None,
            llm_tokens_out: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_llm_usage(mut self, cost_usd: f64, tokens_in: u64, tokens_out: u64) -> Self {
        self.cost_usd = Some(cost_usd);
        self.llm_tokens_in = Some(tokens_in);
        self.llm_tokens_out = Some(tokens_out);
        self
    }
}

/// Derived, eventually-consistent per-pattern statistics (spec §3, §4.10).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PatternStats {
    pub pattern_signature: String,
    pub occurrences: u64,
    pub l1_resolutions: u64,
    pub l2_resolutions: u64,
    pub l3_resolutions: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_resolution_time_ms: f64,
    pub last_seen: Option<DateTime<Utc>>,
    pub promotion_eligible: bool,
    /// Frequency of each action among successful resolutions, used for the
    /// learning loop's `action_consistency` term (spec §4.10).
    #[serde(default)]
    pub action_frequencies: std::collections::BTreeMap<String, u64>,
}

impl PatternStats {
    pub fn success_rate(&self) -> f64 {
        if self.occurrences == 0 {
            0.0
        } else {
            self.successes as f64 / self.occurrences as f64
        }
    }

    /// Σ p_i² over action frequencies (spec §4.10 `action_consistency`).
    pub fn action_consistency(&self) -> f64 {
        let total: u64 = self.action_frequencies.values().sum();
        if total == 0 {
            return 0.0;
        }
        self.action_frequencies
            .values()
            .map(|&n| {
                let p = n as f64 / total as f64;
                p * p
            })
            .sum()
    }

    pub fn dominant_action(&self) -> Option<&str> {
        self.action_frequencies
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(action, _)| action.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_consistency_is_one_when_a_single_action_dominates() {
        let mut stats = PatternStats::default();
        stats
            .action_frequencies
            .insert("restart_logging_service".to_string(), 9);
        assert!((stats.action_consistency() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn action_consistency_is_lower_when_actions_are_split() {
        let mut stats = PatternStats::default();
        stats.action_frequencies.insert("a".to_string(), 5);
        stats.action_frequencies.insert("b".to_string(), 5);
        assert!((stats.action_consistency() - 0.5).abs() < 1e-9);
    }
}
