//! The [`Decision`] the control plane's `/api/agent/l2/plan` endpoint
//! returns, and the request envelope that asks for one (spec §4.3).

use chrono::{DateTime, Utc};
use haven_types::Value;
use serde::{Deserialize, Serialize};

/// What the L2 planner sends the control plane: the PHI-scrubbed incident
/// plus whatever pattern history the caller chose to attach. `#[serde(default)]`
/// is deliberately absent here — this is the outbound shape, not a response
/// the planner must tolerate drifting.
#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest {
    pub site_id: String,
    pub host_id: String,
    pub incident: Value,
    pub pattern_context: Option<Value>,
    pub requested_at: DateTime<Utc>,
}

/// A proposed remediation from Level 2. Every field past `action` is
/// `#[serde(default)]` so a control-plane response that omits a field (or
/// adds one the planner doesn't know about yet) never fails to parse — the
/// guardrail stage below treats an absent `confidence` as `0.0`, which
/// forces escalation rather than silently trusting an ambiguous response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: String,
    #[serde(default)]
    pub action_params: Value,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub runbook_id: Option<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub escalate_to_l3: bool,
    #[serde(default)]
    pub context_used: Value,
}

impl Decision {
    /// The `escalate_to_l3` decision the guardrail stage produces when it
    /// overrides the model's own answer. `reasoning` records why.
    pub fn forced_escalation(original: Decision, reasoning: impl Into<String>) -> Decision {
        Decision {
            escalate_to_l3: true,
            reasoning: reasoning.into(),
            ..original
        }
    }
}
