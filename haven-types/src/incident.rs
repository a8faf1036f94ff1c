//! [`Incident`] — a drift-detection or externally-reported event requiring
//! resolution (spec §3).

use crate::value::Value;
use chrono::{DateTime, Utc};
use ring::digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Fixed catalog of incident types (spec §3); modeled as a string newtype
/// rather than a closed enum so custom/future check types don't require a
/// crate release, matching the rule-DSL's data-not-code philosophy (§9).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentType(pub String);

impl IncidentType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for IncidentType {
    fn from(s: S) -> Self {
        IncidentType(s.into())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub site_id: String,
    pub host_id: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub raw_data: Value,
    pub pattern_signature: String,
}

/// Keys pulled from `raw_data` into the pattern-signature projection. Kept
/// small and explicit per spec §4.8 ("a small whitelist of `raw_data` keys
/// (e.g. `check_type`)").
const SIGNATURE_RAW_DATA_KEYS: &[&str] = &["check_type", "drift_detected", "expected", "actual"];

/// Computes the 16-hex-char `pattern_signature` from `incident_type`,
/// `severity`, and a stable projection of `raw_data` (spec §3 invariant,
/// §4.8). Distinct from PHI scrubbing: this hashes a whitelisted,
/// non-PHI-bearing projection, not the raw incident content.
pub fn compute_pattern_signature(
    incident_type: &IncidentType,
    severity: Severity,
    raw_data: &Value,
) -> String {
    let mut projection: BTreeMap<&str, Value> = BTreeMap::new();
    if let Some(map) = raw_data.as_map() {
        for key in SIGNATURE_RAW_DATA_KEYS {
            if let Some(v) = map.get(*key) {
                projection.insert(key, v.clone());
            }
        }
    }

    let canonical = format!(
        "{}|{}|{}",
        incident_type.as_str(),
        severity,
        serde_json::to_string(&projection).unwrap_or_default()
    );
    let digest = digest::digest(&digest::SHA256, canonical.as_bytes());
    hex::encode(digest.as_ref())[..16].to_string()
}

impl Incident {
    pub fn new(
        id: impl Into<String>,
        site_id: impl Into<String>,
        host_id: impl Into<String>,
        incident_type: impl Into<IncidentType>,
        severity: Severity,
        created_at: DateTime<Utc>,
        raw_data: Value,
    ) -> Self {
        let incident_type = incident_type.into();
        let pattern_signature = compute_pattern_signature(&incident_type, severity, &raw_data);
        Self {
            id: id.into(),
            site_id: site_id.into(),
            host_id: host_id.into(),
            incident_type,
            severity,
            created_at,
            raw_data,
            pattern_signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(check_type: &str, drift: bool) -> Value {
        let mut m = BTreeMap::new();
        m.insert("check_type".to_string(), Value::from(check_type));
        m.insert("drift_detected".to_string(), Value::Bool(drift));
        m.insert("unrelated_noise".to_string(), Value::from("ignored"));
        Value::Map(m)
    }

    #[test]
    fn identical_logical_incidents_produce_identical_signatures() {
        let a = compute_pattern_signature(
            &IncidentType::from("firewall"),
            Severity::High,
            &raw("firewall_status", true),
        );
        let b = compute_pattern_signature(
            &IncidentType::from("firewall"),
            Severity::High,
            &raw("firewall_status", true),
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn differing_whitelisted_fields_change_the_signature() {
        let a = compute_pattern_signature(
            &IncidentType::from("firewall"),
            Severity::High,
            &raw("firewall_status", true),
        );
        let b = compute_pattern_signature(
            &IncidentType::from("firewall"),
            Severity::High,
            &raw("firewall_status", false),
        );
        assert_ne!(a, b);
    }

    #[test]
    fn noise_outside_the_whitelist_does_not_affect_the_signature() {
        let mut m1 = BTreeMap::new();
        m1.insert("check_type".to_string(), Value::from("backup"));
        m1.insert("noise_a".to_string(), Value::from("x"));
        let mut m2 = BTreeMap::new();
        m2.insert("check_type".to_string(), Value::from("backup"));
        m2.insert("noise_b".to_string(), Value::from("y"));

        let a = compute_pattern_signature(
            &IncidentType::from("backup"),
            Severity::Medium,
            &Value::Map(m1),
        );
        let b = compute_pattern_signature(
            &IncidentType::from("backup"),
            Severity::Medium,
            &Value::Map(m2),
        );
        assert_eq!(a, b);
    }
}
