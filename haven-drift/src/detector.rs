//! Translates check results into [`Incident`]s, tracking which `(host,
//! check)` pairs currently have an open incident so a subsequent pass
//! closes it (spec §4.5).

use crate::check::{Check, CheckResult, CheckStatus};
use crate::snapshot::HostSnapshot;
use haven_bastion::scrub_value;
use haven_types::{Incident, Severity, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

fn severity_from_status(status: CheckStatus, check_severity: Severity) -> Severity {
    match status {
        CheckStatus::Pass => Severity::Low,
        CheckStatus::Warn => check_severity.min(Severity::Medium),
        CheckStatus::Fail | CheckStatus::Error => check_severity,
    }
}

/// Tracks open incidents per `(host_id, check_name)` so closing transitions
/// (fail → pass) can be detected without re-reading the incident store on
/// every cycle.
#[derive(Default)]
pub struct DriftDetector {
    open_incidents: Arc<Mutex<HashMap<(String, &'static str), String>>>,
}

pub enum DetectionOutcome {
    /// Check passed and there was no open incident, or it just closed one.
    NoIncident { closed_incident_id: Option<String> },
    /// Check failed/warned/errored; a new incident was opened.
    Opened(Incident),
    /// Check failed/warned/errored again for the same open incident; no
    /// new incident is created.
    StillOpen,
}

impl DriftDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every check in `catalog` against `snapshot`, returning one
    /// [`DetectionOutcome`] per check, in catalog order. PHI scrubbing is
    /// applied to `details`/`error` before anything is stored (spec §4.5).
    pub fn run_checks(
        &self,
        site_id: &str,
        catalog: &[Box<dyn Check>],
        snapshot: &HostSnapshot,
    ) -> Vec<(CheckResult, DetectionOutcome)> {
        catalog
            .iter()
            .map(|check| {
                let raw = check.evaluate(snapshot);
                let (scrubbed_details, _) = scrub_value(&raw.details);
                let scrubbed_error = raw.error.as_deref().map(|e| {
                    let mut report = haven_bastion::phi::ScrubReport::default();
                    haven_bastion::phi::scrub_str(e, &mut report)
                });
                let result = CheckResult {
                    details: scrubbed_details,
                    error: scrubbed_error,
                    ..raw
                };
                let outcome = self.classify(site_id, &snapshot.host_id, &result);
                (result, outcome)
            })
            .collect()
    }

    fn classify(&self, site_id: &str, host_id: &str, result: &CheckResult) -> DetectionOutcome {
        let key = (host_id.to_string(), result.name);
        let mut open = self.open_incidents.lock();

        if result.status == CheckStatus::Pass {
            return match open.remove(&key) {
                Some(incident_id) => DetectionOutcome::NoIncident { closed_incident_id: Some(incident_id) },
                None => DetectionOutcome::NoIncident { closed_incident_id: None },
            };
        }

        if open.contains_key(&key) {
            return DetectionOutcome::StillOpen;
        }

        let raw_data = Value::Map(
            [
                ("check_type".to_string(), Value::from(result.name)),
                ("drift_detected".to_string(), Value::Bool(true)),
                ("status".to_string(), Value::from(format!("{:?}", result.status).to_lowercase())),
                ("details".to_string(), result.details.clone()),
            ]
            .into_iter()
            .collect(),
        );

        let incident = Incident::new(
            Uuid::new_v4().to_string(),
            site_id,
            host_id,
            result.name,
            severity_from_status(result.status, result.severity),
            chrono::Utc::now(),
            raw_data,
        );
        open.insert(key, incident.id.clone());
        DetectionOutcome::Opened(incident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::builtin_checks;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn snapshot(facts: Value) -> HostSnapshot {
        HostSnapshot {
            host_id: "host-1".into(),
            site_id: "site-a".into(),
            collected_at: Utc::now(),
            facts,
        }
    }

    fn failing_firewall_facts() -> Value {
        Value::Map(
            [(
                "firewall".to_string(),
                Value::Map(
                    [
                        ("active_profile".to_string(), Value::from("disabled")),
                        ("baseline_profile".to_string(), Value::from("enabled")),
                    ]
                    .into_iter()
                    .collect::<BTreeMap<_, _>>(),
                ),
            )]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn first_failure_opens_one_incident_then_stays_open() {
        let detector = DriftDetector::new();
        let catalog = builtin_checks();
        let snap = snapshot(failing_firewall_facts());

        let first_pass = detector.run_checks("site-a", &catalog, &snap);
        let firewall_first = first_pass.iter().find(|(r, _)| r.name == "firewall").unwrap();
        assert!(matches!(firewall_first.1, DetectionOutcome::Opened(_)));

        let second_pass = detector.run_checks("site-a", &catalog, &snap);
        let firewall_second = second_pass.iter().find(|(r, _)| r.name == "firewall").unwrap();
        assert!(matches!(firewall_second.1, DetectionOutcome::StillOpen));
    }

    #[test]
    fn recovery_closes_the_open_incident() {
        let detector = DriftDetector::new();
        let catalog = builtin_checks();
        let failing = snapshot(failing_firewall_facts());
        detector.run_checks("site-a", &catalog, &failing);

        let healthy = snapshot(Value::Map(
            [(
                "firewall".to_string(),
                Value::Map(
                    [
                        ("active_profile".to_string(), Value::from("enabled")),
                        ("baseline_profile".to_string(), Value::from("enabled")),
                    ]
                    .into_iter()
                    .collect::<BTreeMap<_, _>>(),
                ),
            )]
            .into_iter()
            .collect(),
        ));
        let pass = detector.run_checks("site-a", &catalog, &healthy);
        let firewall = pass.iter().find(|(r, _)| r.name == "firewall").unwrap();
        assert!(matches!(
            firewall.1,
            DetectionOutcome::NoIncident { closed_incident_id: Some(_) }
        ));
    }
}
