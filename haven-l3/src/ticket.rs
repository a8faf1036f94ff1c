//! [`EscalationTicket`] — the human-facing record an escalation produces
//! (spec §4.4). Built once per escalation and handed unchanged to every
//! channel; channels decide how much of it to render.

use chrono::{DateTime, Utc};
use haven_types::{Incident, Severity, Value};
use serde::{Deserialize, Serialize};

/// Why Level 3 is being asked to look at this, distinct from the incident's
/// own severity: a low-severity incident can still escalate because L1 had
/// no rule and L2 refused, while a critical one can skip straight here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EscalationReason {
    NoMatchingRule,
    L2LowConfidence { confidence: f64 },
    L2ActionNotAllowlisted { action: String },
    L2DangerousAction,
    L2BudgetExhausted,
    L2TransportFailure { detail: String },
    ExplicitEscalateAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorAttempt {
    pub resolution_level: String,
    pub action: Option<String>,
    pub reasoning: Option<String>,
}

/// Everything a human needs to act on an incident without re-deriving it
/// from the agent's internal state (spec §4.4): a PHI-scrubbed summary,
/// the reason escalation happened, what was tried already, the HIPAA
/// controls in play, and recent pattern history if the caller has any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationTicket {
    pub incident_id: String,
    pub site_id: String,
    pub host_id: String,
    pub incident_type: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub escalated_at: DateTime<Utc>,
    pub raw_data: Value,
    pub reason: EscalationReason,
    pub prior_attempts: Vec<PriorAttempt>,
    pub hipaa_controls: Vec<String>,
    pub pattern_occurrences: Option<u64>,
    pub recommended_action: Option<String>,
}

impl EscalationTicket {
    /// `raw_data` must already be PHI-scrubbed by the caller — the ticket
    /// builder does not re-scrub, matching the rest of the pipeline where
    /// scrubbing happens once, at the boundary that needs it.
    pub fn new(
        incident: &Incident,
        scrubbed_raw_data: Value,
        reason: EscalationReason,
        hipaa_controls: Vec<String>,
    ) -> Self {
        Self {
            incident_id: incident.id.clone(),
            site_id: incident.site_id.clone(),
            host_id: incident.host_id.clone(),
            incident_type: incident.incident_type.as_str().to_string(),
            severity: incident.severity,
            created_at: incident.created_at,
            escalated_at: Utc::now(),
            raw_data: scrubbed_raw_data,
            reason,
            prior_attempts: Vec::new(),
            hipaa_controls,
            pattern_occurrences: None,
            recommended_action: None,
        }
    }

    pub fn with_prior_attempt(mut self, attempt: PriorAttempt) -> Self {
        self.prior_attempts.push(attempt);
        self
    }

    pub fn with_pattern_occurrences(mut self, count: u64) -> Self {
        self.pattern_occurrences = Some(count);
        self
    }

    pub fn with_recommended_action(mut self, action: impl Into<String>) -> Self {
        self.recommended_action = Some(action.into());
        self
    }

    /// One-line summary suitable for a pager/chat notification title;
    /// `render()` below produces the fuller body.
    pub fn headline(&self) -> String {
        format!(
            "[{}] {} on {}/{} requires human review",
            self.severity, self.incident_type, self.site_id, self.host_id
        )
    }

    pub fn render(&self) -> String {
        let mut body = format!(
            "{}\nincident: {}\ncreated: {}\nreason: {:?}\n",
            self.headline(),
            self.incident_id,
            self.created_at.to_rfc3339(),
            self.reason
        );
        if !self.prior_attempts.is_empty() {
            body.push_str("prior attempts:\n");
            for attempt in &self.prior_attempts {
                body.push_str(&format!(
                    "  - {}: {} ({})\n",
                    attempt.resolution_level,
                    attempt.action.as_deref().unwrap_or("none"),
                    attempt.reasoning.as_deref().unwrap_or("no reasoning recorded")
                ));
            }
        }
        if !self.hipaa_controls.is_empty() {
            body.push_str(&format!("hipaa controls: {}\n", self.hipaa_controls.join(", ")));
        }
        if let Some(count) = self.pattern_occurrences {
            body.push_str(&format!("seen {count} times before\n"));
        }
        if let Some(action) = &self.recommended_action {
            body.push_str(&format!("recommended action: {action}\n"));
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_types::IncidentType;
    use std::collections::BTreeMap;

    fn incident() -> Incident {
        Incident::new(
            "inc-1",
            "site-a",
            "host-1",
            IncidentType::from("backup_missing"),
            Severity::High,
            Utc::now(),
            Value::Map(BTreeMap::new()),
        )
    }

    #[test]
    fn render_includes_prior_attempts_and_controls() {
        let ticket = EscalationTicket::new(
            &incident(),
            Value::Null,
            EscalationReason::L2LowConfidence { confidence: 0.4 },
            vec!["164.308(a)(7)".to_string()],
        )
        .with_prior_attempt(PriorAttempt {
            resolution_level: "l2".to_string(),
            action: Some("restart_service".to_string()),
            reasoning: Some("stale unit".to_string()),
        })
        .with_pattern_occurrences(3)
        .with_recommended_action("restart_service");

        let rendered = ticket.render();
        assert!(rendered.contains("restart_service"));
        assert!(rendered.contains("164.308(a)(7)"));
        assert!(rendered.contains("seen 3 times before"));
    }

    #[test]
    fn headline_names_site_host_and_severity() {
        let ticket = EscalationTicket::new(&incident(), Value::Null, EscalationReason::NoMatchingRule, vec![]);
        assert!(ticket.headline().contains("site-a/host-1"));
        assert!(ticket.headline().contains("high"));
    }
}
