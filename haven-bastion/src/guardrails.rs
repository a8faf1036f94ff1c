//! The guardrail pipeline: the sequence every proposed remediation — from
//! any tier — passes through before it reaches the executor. Stages run in
//! a fixed order and the first non-`Allow` outcome short-circuits the rest
//! (spec §4.9): allowlist, dangerous-pattern blocklist, budget, maintenance
//! window, cooldown.

use crate::allowlist::Allowlist;
use crate::budget::{BudgetDenial, BudgetLimits, BudgetTracker};
use crate::cooldown::CooldownTracker;
use crate::dangerous;
use crate::maintenance_window::{MaintenanceWindow, MaintenanceWindowPolicy, WindowDecision};
use chrono::{DateTime, Utc};
use haven_types::Clock;
use std::sync::Arc;

/// A proposed remediation, as seen by the guardrail pipeline. Deliberately
/// flat — the pipeline doesn't need to know which tier produced it.
#[derive(Debug, Clone)]
pub struct ProposedAction {
    pub site_id: String,
    pub host_id: String,
    pub action: String,
    pub command_text: String,
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Allow,
    Block { stage: &'static str, reason: String },
    Escalate { stage: &'static str, reason: String },
    WaitAndRetry { stage: &'static str, retry_after: std::time::Duration },
}

impl StageOutcome {
    pub fn is_allow(&self) -> bool {
        matches!(self, StageOutcome::Allow)
    }
}

pub struct GuardrailPipeline {
    allowlist: Allowlist,
    budget: BudgetTracker,
    cooldown: CooldownTracker,
    maintenance: MaintenanceWindowPolicy,
    clock: Arc<dyn Clock>,
}

impl GuardrailPipeline {
    pub fn new(
        allowlist: Allowlist,
        budget_limits: BudgetLimits,
        cooldown_window: std::time::Duration,
        maintenance: MaintenanceWindowPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            allowlist,
            budget: BudgetTracker::new(budget_limits, clock.clone()),
            cooldown: CooldownTracker::new(cooldown_window, clock.clone()),
            maintenance,
            clock,
        }
    }

    /// Evaluates `proposal` against every stage in order, stopping at the
    /// first non-`Allow` outcome. Does not reserve budget or start a
    /// cooldown — call [`Self::commit`] once the caller is actually about to
    /// execute.
    pub fn evaluate(
        &self,
        proposal: &ProposedAction,
        maintenance_windows: &[MaintenanceWindow],
    ) -> StageOutcome {
        if !self.allowlist.allows(&proposal.action) {
            return StageOutcome::Block {
                stage: "allowlist",
                reason: format!("action '{}' is not on the allowlist", proposal.action),
            };
        }

        let findings = dangerous::scan(&proposal.command_text);
        if let Some(finding) = findings.first() {
            return StageOutcome::Escalate {
                stage: "dangerous_pattern",
                reason: format!(
                    "matched {} pattern: {}",
                    finding.category, finding.matched_text
                ),
            };
        }

        let now: DateTime<Utc> = self.clock.now_utc();
        match self
            .maintenance
            .decide(&proposal.action, &proposal.site_id, now, maintenance_windows)
        {
            WindowDecision::Proceed => {}
            WindowDecision::WaitForWindow => {
                return StageOutcome::WaitAndRetry {
                    stage: "maintenance_window",
                    retry_after: std::time::Duration::from_secs(15 * 60),
                }
            }
            WindowDecision::Escalate => {
                return StageOutcome::Escalate {
                    stage: "maintenance_window",
                    reason: "disruptive action with no maintenance window inside 24h".into(),
                }
            }
        }

        if !self
            .cooldown
            .is_ready(&proposal.site_id, &proposal.host_id, &proposal.action)
        {
            let remaining = self
                .cooldown
                .remaining(&proposal.site_id, &proposal.host_id, &proposal.action);
            return StageOutcome::WaitAndRetry {
                stage: "cooldown",
                retry_after: remaining,
            };
        }

        if let Err(denial) = self
            .budget
            .check(&proposal.site_id, proposal.estimated_cost_usd)
        {
            return StageOutcome::Escalate {
                stage: "budget",
                reason: budget_denial_reason(denial),
            };
        }

        StageOutcome::Allow
    }

    /// Call once the caller has decided to actually execute `proposal`:
    /// reserves the budget slot and starts its cooldown. Returns `Err` if
    /// the budget was exhausted between `evaluate` and `commit` (e.g. by a
    /// concurrent proposal for the same site).
    pub fn commit(&self, proposal: &ProposedAction) -> Result<(), BudgetDenial> {
        self.budget
            .reserve(&proposal.site_id, proposal.estimated_cost_usd)?;
        self.cooldown
            .record_fired(&proposal.site_id, &proposal.host_id, &proposal.action);
        Ok(())
    }

    pub fn release(&self, proposal: &ProposedAction, realized_cost_usd: f64) {
        self.budget.release(
            &proposal.site_id,
            realized_cost_usd,
            proposal.estimated_cost_usd,
        );
    }
}

fn budget_denial_reason(denial: BudgetDenial) -> String {
    match denial {
        BudgetDenial::DailySpendExhausted => "daily spend budget exhausted".to_string(),
        BudgetDenial::HourlyCallsExhausted => "hourly call budget exhausted".to_string(),
        BudgetDenial::ConcurrencyExhausted => "concurrency budget exhausted".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_types::FakeClock;

    fn pipeline() -> GuardrailPipeline {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(chrono::Utc::now()));
        GuardrailPipeline::new(
            Allowlist::default_fleet(),
            BudgetLimits::default(),
            std::time::Duration::from_secs(300),
            MaintenanceWindowPolicy::default_disruptive(),
            clock,
        )
    }

    fn proposal(action: &str, command_text: &str) -> ProposedAction {
        ProposedAction {
            site_id: "site-a".into(),
            host_id: "host-1".into(),
            action: action.into(),
            command_text: command_text.into(),
            estimated_cost_usd: 0.02,
        }
    }

    #[test]
    fn blocks_action_not_on_allowlist() {
        let p = pipeline();
        let outcome = p.evaluate(&proposal("format_hard_drive", "echo hi"), &[]);
        assert!(matches!(outcome, StageOutcome::Block { stage: "allowlist", .. }));
    }

    #[test]
    fn escalates_on_dangerous_command_even_if_action_is_allowlisted() {
        let p = pipeline();
        let outcome = p.evaluate(
            &proposal("restart_service", "rm -rf / && systemctl restart nginx"),
            &[],
        );
        assert!(matches!(outcome, StageOutcome::Escalate { stage: "dangerous_pattern", .. }));
    }

    #[test]
    fn allows_clean_allowlisted_action() {
        let p = pipeline();
        let outcome = p.evaluate(&proposal("restart_service", "systemctl restart nginx"), &[]);
        assert_eq!(outcome, StageOutcome::Allow);
    }

    #[test]
    fn cooldown_blocks_repeat_fire_after_commit() {
        let p = pipeline();
        let prop = proposal("restart_service", "systemctl restart nginx");
        assert_eq!(p.evaluate(&prop, &[]), StageOutcome::Allow);
        p.commit(&prop).unwrap();
        assert!(matches!(
            p.evaluate(&prop, &[]),
            StageOutcome::WaitAndRetry { stage: "cooldown", .. }
        ));
    }
}
