//! [`L2Planner`] — the Level-2 pipeline (spec §4.3): budget gate,
//! concurrency gate, PHI scrub, control-plane plan call, response parsing,
//! then the guardrail stage that can override the model's own answer and
//! force an escalation. The concurrency gate is a process-wide semaphore
//! distinct from [`haven_bastion::BudgetTracker`]'s per-site `in_flight`
//! counter: the budget tracks spend and call volume per site, while the
//! semaphore caps how many plan calls are in flight against the LLM
//! provider at once, fleet-wide.

use crate::backend::PlanBackend;
use crate::decision::{Decision, PlanRequest};
use crate::parse::parse_decision;
use haven_bastion::{scrub_value, Allowlist, BudgetDenial, BudgetTracker};
use haven_types::{AgentError, Incident, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A decision with confidence below this floor is never trusted to execute
/// unattended, regardless of what the model claims about the action itself.
pub const CONFIDENCE_ESCALATION_THRESHOLD: f64 = 0.6;
pub const DEFAULT_CONCURRENCY: usize = 3;
/// Conservative per-call cost ceiling reserved against the site's budget
/// before the call is made; released back once the call completes.
pub const DEFAULT_ESTIMATED_COST_USD: f64 = 0.05;

pub struct L2Planner {
    backend: Arc<dyn PlanBackend>,
    budget: BudgetTracker,
    concurrency: Arc<Semaphore>,
    allowlist: Allowlist,
}

impl L2Planner {
    pub fn new(backend: Arc<dyn PlanBackend>, budget: BudgetTracker, allowlist: Allowlist) -> Self {
        Self::with_concurrency(backend, budget, allowlist, DEFAULT_CONCURRENCY)
    }

    pub fn with_concurrency(
        backend: Arc<dyn PlanBackend>,
        budget: BudgetTracker,
        allowlist: Allowlist,
        concurrency: usize,
    ) -> Self {
        Self {
            backend,
            budget,
            concurrency: Arc::new(Semaphore::new(concurrency)),
            allowlist,
        }
    }

    /// Runs the full L2 pipeline for `incident`, returning a [`Decision`]
    /// that has already passed the guardrail stage — callers never need to
    /// re-check `confidence`/`action`/`action_params` themselves, only read
    /// `escalate_to_l3`.
    pub async fn plan(
        &self,
        site_id: &str,
        incident: &Incident,
        pattern_context: Option<Value>,
    ) -> Result<Decision, AgentError> {
        self.budget
            .reserve(site_id, DEFAULT_ESTIMATED_COST_USD)
            .map_err(|denial| AgentError::BudgetExhausted {
                reason: budget_denial_reason(denial),
            })?;

        let permit = match self.concurrency.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.budget
                    .release(site_id, DEFAULT_ESTIMATED_COST_USD, DEFAULT_ESTIMATED_COST_USD);
                return Err(AgentError::BudgetExhausted {
                    reason: "L2 planning concurrency exhausted".to_string(),
                });
            }
        };

        let result = self.plan_inner(site_id, incident, pattern_context).await;

        self.budget
            .release(site_id, DEFAULT_ESTIMATED_COST_USD, DEFAULT_ESTIMATED_COST_USD);
        drop(permit);
        result
    }

    async fn plan_inner(
        &self,
        site_id: &str,
        incident: &Incident,
        pattern_context: Option<Value>,
    ) -> Result<Decision, AgentError> {
        let (scrubbed_incident, _report) = scrub_value(&incident_to_value(incident));

        let request = PlanRequest {
            site_id: site_id.to_string(),
            host_id: incident.host_id.clone(),
            incident: scrubbed_incident,
            pattern_context,
            requested_at: chrono::Utc::now(),
        };

        let raw = self.backend.plan(&request).await?;
        let decision = parse_decision(&raw)?;
        Ok(self.apply_guardrails(decision))
    }

    /// Forces `escalate_to_l3` when confidence is too low, the action isn't
    /// allowlisted, or the proposed script matches a dangerous pattern
    /// (spec §4.3). A decision that already escalates itself passes through
    /// unchanged.
    fn apply_guardrails(&self, decision: Decision) -> Decision {
        if decision.escalate_to_l3 {
            return decision;
        }

        if decision.confidence < CONFIDENCE_ESCALATION_THRESHOLD {
            return Decision::forced_escalation(
                decision.clone(),
                format!(
                    "confidence {:.2} below the {:.2} floor",
                    decision.confidence, CONFIDENCE_ESCALATION_THRESHOLD
                ),
            );
        }

        if !self.allowlist.allows(&decision.action) {
            return Decision::forced_escalation(
                decision.clone(),
                format!("action '{}' is not on the allowlist", decision.action),
            );
        }

        if let Some(script) = decision.action_params.get_path("script").and_then(|v| v.as_str()) {
            if haven_bastion::is_dangerous(script) {
                return Decision::forced_escalation(
                    decision.clone(),
                    "proposed script matched a dangerous_pattern command blocklist entry".to_string(),
                );
            }
        }

        decision
    }
}

fn budget_denial_reason(denial: BudgetDenial) -> String {
    match denial {
        BudgetDenial::DailySpendExhausted => "daily LLM spend budget exhausted".to_string(),
        BudgetDenial::HourlyCallsExhausted => "hourly LLM call budget exhausted".to_string(),
        BudgetDenial::ConcurrencyExhausted => "LLM concurrency budget exhausted".to_string(),
    }
}

/// Flattens an [`Incident`] into the [`Value`] tree sent to the control
/// plane, before PHI scrubbing is applied.
fn incident_to_value(incident: &Incident) -> Value {
    let mut map = BTreeMap::new();
    map.insert("id".to_string(), Value::from(incident.id.as_str()));
    map.insert("site_id".to_string(), Value::from(incident.site_id.as_str()));
    map.insert("host_id".to_string(), Value::from(incident.host_id.as_str()));
    map.insert(
        "incident_type".to_string(),
        Value::from(incident.incident_type.as_str()),
    );
    map.insert("severity".to_string(), Value::from(incident.severity.to_string()));
    map.insert(
        "pattern_signature".to_string(),
        Value::from(incident.pattern_signature.as_str()),
    );
    map.insert("raw_data".to_string(), incident.raw_data.clone());
    Value::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use haven_types::{Clock, FakeClock, Severity};
    use std::sync::Arc as StdArc;

    struct ScriptedBackend {
        response: String,
    }

    #[async_trait]
    impl PlanBackend for ScriptedBackend {
        async fn plan(&self, _request: &PlanRequest) -> Result<String, AgentError> {
            Ok(self.response.clone())
        }
    }

    fn incident() -> Incident {
        Incident::new(
            "inc-1",
            "site-a",
            "host-1",
            "unknown_drift",
            Severity::Medium,
            Utc::now(),
            Value::Map(BTreeMap::new()),
        )
    }

    fn budget() -> BudgetTracker {
        let clock: StdArc<dyn Clock> = StdArc::new(FakeClock::new(Utc::now()));
        BudgetTracker::new(haven_bastion::BudgetLimits::default(), clock)
    }

    #[tokio::test]
    async fn high_confidence_allowlisted_action_passes_through() {
        let backend = StdArc::new(ScriptedBackend {
            response: r#"{"action":"restart_service","confidence":0.95,"reasoning":"stale service"}"#.to_string(),
        });
        let planner = L2Planner::new(backend, budget(), Allowlist::default_fleet());
        let decision = planner.plan("site-a", &incident(), None).await.unwrap();
        assert!(!decision.escalate_to_l3);
        assert_eq!(decision.action, "restart_service");
    }

    #[tokio::test]
    async fn low_confidence_forces_escalation() {
        let backend = StdArc::new(ScriptedBackend {
            response: r#"{"action":"restart_service","confidence":0.3}"#.to_string(),
        });
        let planner = L2Planner::new(backend, budget(), Allowlist::default_fleet());
        let decision = planner.plan("site-a", &incident(), None).await.unwrap();
        assert!(decision.escalate_to_l3);
    }

    #[tokio::test]
    async fn action_outside_allowlist_forces_escalation() {
        let backend = StdArc::new(ScriptedBackend {
            response: r#"{"action":"format_hard_drive","confidence":0.99}"#.to_string(),
        });
        let planner = L2Planner::new(backend, budget(), Allowlist::default_fleet());
        let decision = planner.plan("site-a", &incident(), None).await.unwrap();
        assert!(decision.escalate_to_l3);
    }

    #[tokio::test]
    async fn dangerous_script_forces_escalation_even_with_high_confidence() {
        let backend = StdArc::new(ScriptedBackend {
            response: r#"{"action":"restart_service","confidence":0.99,"action_params":{"script":"rm -rf / --no-preserve-root"}}"#.to_string(),
        });
        let planner = L2Planner::new(backend, budget(), Allowlist::default_fleet());
        let decision = planner.plan("site-a", &incident(), None).await.unwrap();
        assert!(decision.escalate_to_l3);
    }

    #[tokio::test]
    async fn concurrency_gate_rejects_fast_when_pool_is_saturated() {
        let backend = StdArc::new(ScriptedBackend {
            response: r#"{"action":"escalate","confidence":0.1}"#.to_string(),
        });
        let planner = StdArc::new(L2Planner::with_concurrency(
            backend,
            budget(),
            Allowlist::default_fleet(),
            1,
        ));

        let permit = planner.concurrency.clone().try_acquire_owned().unwrap();
        let err = planner.plan("site-a", &incident(), None).await.unwrap_err();
        assert!(matches!(err, AgentError::BudgetExhausted { .. }));
        drop(permit);
    }
}
