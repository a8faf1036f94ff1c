//! [`Escalator`] — builds an [`EscalationTicket`] and fans it out to every
//! sink registered for the incident's severity (spec §4.4). Grounded on
//! `haven_telemetry::EventBus`'s fan-out shape, generalized from a
//! synchronous `Vec<Arc<dyn EventSink>>` to an async, per-channel routed
//! one: a sink that fails is logged and skipped, it never aborts delivery
//! to the remaining channels, and it never fails the escalation itself —
//! an incident that can't page anyone still needs a ticket on record.

use crate::routing::{channels_for, Channel};
use crate::sink::EscalationSink;
use crate::ticket::EscalationTicket;
use haven_bastion::scrub_value;
use haven_types::Incident;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EscalationOutcome {
    pub ticket_incident_id: String,
    pub notified: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct Escalator {
    sinks: HashMap<Channel, Vec<Arc<dyn EscalationSink>>>,
}

impl Default for Escalator {
    fn default() -> Self {
        Self::new()
    }
}

impl Escalator {
    pub fn new() -> Self {
        Self { sinks: HashMap::new() }
    }

    pub fn with_sink(mut self, channel: Channel, sink: Arc<dyn EscalationSink>) -> Self {
        self.sinks.entry(channel).or_default().push(sink);
        self
    }

    /// PHI-scrubs `incident.raw_data`, builds the ticket, and notifies
    /// every sink registered for the incident's severity tier. Always
    /// returns `Ok` — individual channel failures are recorded in
    /// [`EscalationOutcome::failed`], never surfaced as an error, since an
    /// escalation that can't reach a human is still an escalation that
    /// happened and must be on record.
    pub async fn escalate(&self, incident: &Incident, mut ticket: EscalationTicket) -> EscalationOutcome {
        let (scrubbed, _report) = scrub_value(&incident.raw_data);
        ticket.raw_data = scrubbed;

        let mut notified = Vec::new();
        let mut failed = Vec::new();

        for channel in channels_for(incident.severity) {
            let Some(sinks) = self.sinks.get(channel) else {
                continue;
            };
            for sink in sinks {
                match sink.notify(&ticket).await {
                    Ok(()) => notified.push(sink.name().to_string()),
                    Err(e) => {
                        tracing::warn!(channel = ?channel, sink = sink.name(), error = %e, "escalation channel failed");
                        failed.push((sink.name().to_string(), e.to_string()));
                    }
                }
            }
        }

        EscalationOutcome {
            ticket_incident_id: ticket.incident_id,
            notified,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use crate::ticket::EscalationReason;
    use chrono::Utc;
    use haven_types::{IncidentType, Severity, Value};
    use std::collections::BTreeMap;

    fn incident(severity: Severity) -> Incident {
        Incident::new(
            "inc-1",
            "site-a",
            "host-1",
            IncidentType::from("backup_missing"),
            severity,
            Utc::now(),
            Value::Map(BTreeMap::new()),
        )
    }

    #[tokio::test]
    async fn low_severity_only_reaches_the_email_channel() {
        let pager = Arc::new(RecordingSink::new("pager"));
        let email = Arc::new(RecordingSink::new("email"));
        let escalator = Escalator::new()
            .with_sink(Channel::Pager, pager.clone())
            .with_sink(Channel::Email, email.clone());

        let incident = incident(Severity::Low);
        let ticket = EscalationTicket::new(&incident, Value::Null, EscalationReason::NoMatchingRule, vec![]);
        let outcome = escalator.escalate(&incident, ticket).await;

        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.notified, vec!["email".to_string()]);
        assert!(pager.received_incident_ids().is_empty());
        assert_eq!(email.received_incident_ids(), vec!["inc-1".to_string()]);
    }

    #[tokio::test]
    async fn critical_severity_reaches_every_channel() {
        let pager = Arc::new(RecordingSink::new("pager"));
        let chat = Arc::new(RecordingSink::new("chat"));
        let email = Arc::new(RecordingSink::new("email"));
        let escalator = Escalator::new()
            .with_sink(Channel::Pager, pager.clone())
            .with_sink(Channel::Chat, chat.clone())
            .with_sink(Channel::Email, email.clone());

        let incident = incident(Severity::Critical);
        let ticket = EscalationTicket::new(&incident, Value::Null, EscalationReason::NoMatchingRule, vec![]);
        let outcome = escalator.escalate(&incident, ticket).await;

        assert_eq!(outcome.notified.len(), 3);
        assert_eq!(pager.received_incident_ids(), vec!["inc-1".to_string()]);
        assert_eq!(chat.received_incident_ids(), vec!["inc-1".to_string()]);
        assert_eq!(email.received_incident_ids(), vec!["inc-1".to_string()]);
    }

    #[tokio::test]
    async fn a_missing_channel_is_skipped_without_failing_the_escalation() {
        let email = Arc::new(RecordingSink::new("email"));
        let escalator = Escalator::new().with_sink(Channel::Email, email);

        let incident = incident(Severity::Critical);
        let ticket = EscalationTicket::new(&incident, Value::Null, EscalationReason::NoMatchingRule, vec![]);
        let outcome = escalator.escalate(&incident, ticket).await;

        assert_eq!(outcome.notified, vec!["email".to_string()]);
        assert!(outcome.failed.is_empty());
    }
}
