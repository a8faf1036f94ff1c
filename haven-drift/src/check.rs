//! The [`Check`] trait and fixed catalog of six compliance checks (spec
//! §4.5). Each check is a pure function from [`HostSnapshot`] to
//! [`CheckResult`] — registered in a data-driven catalog map rather than a
//! hardcoded `match`, so each check can be unit-tested in isolation with a
//! synthetic snapshot.

use crate::snapshot::HostSnapshot;
use chrono::{DateTime, Utc};
use haven_types::{Severity, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub severity: Severity,
    pub details: Value,
    pub error: Option<String>,
}

pub trait Check: Send + Sync {
    fn name(&self) -> &'static str;
    fn default_interval_secs(&self) -> u64 {
        300
    }
    fn evaluate(&self, snapshot: &HostSnapshot) -> CheckResult;
}

fn fact_bool(snapshot: &HostSnapshot, path: &str) -> Option<bool> {
    snapshot.fact(path).and_then(|v| v.as_bool())
}

fn fact_str<'a>(snapshot: &'a HostSnapshot, path: &str) -> Option<&'a str> {
    snapshot.fact(path).and_then(|v| v.as_str())
}

fn fact_num(snapshot: &HostSnapshot, path: &str) -> Option<f64> {
    snapshot.fact(path).and_then(|v| v.as_f64())
}

pub struct PatchingCheck;
impl Check for PatchingCheck {
    fn name(&self) -> &'static str {
        "patching"
    }
    fn evaluate(&self, snapshot: &HostSnapshot) -> CheckResult {
        let critical_patch_age_days = fact_num(snapshot, "critical_patch_age_days").unwrap_or(0.0);
        let (status, severity) = if critical_patch_age_days > 7.0 {
            (CheckStatus::Fail, Severity::High)
        } else {
            (CheckStatus::Pass, Severity::Low)
        };
        CheckResult {
            name: self.name(),
            status,
            severity,
            details: snapshot.facts.get_path("patching").cloned().unwrap_or(Value::Null),
            error: None,
        }
    }
}

pub struct AvEdrCheck;
impl Check for AvEdrCheck {
    fn name(&self) -> &'static str {
        "av_edr"
    }
    fn evaluate(&self, snapshot: &HostSnapshot) -> CheckResult {
        let present = fact_bool(snapshot, "av_edr.present").unwrap_or(false);
        let running = fact_bool(snapshot, "av_edr.running").unwrap_or(false);
        let definitions_fresh = fact_bool(snapshot, "av_edr.definitions_fresh").unwrap_or(false);
        let status = if present && running && definitions_fresh {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        };
        CheckResult {
            name: self.name(),
            status,
            severity: if status == CheckStatus::Pass { Severity::Low } else { Severity::High },
            details: snapshot.facts.get_path("av_edr").cloned().unwrap_or(Value::Null),
            error: None,
        }
    }
}

pub struct BackupCheck;
impl Check for BackupCheck {
    fn name(&self) -> &'static str {
        "backup"
    }
    fn evaluate(&self, snapshot: &HostSnapshot) -> CheckResult {
        let hours_since_backup = fact_num(snapshot, "backup.hours_since_last").unwrap_or(f64::MAX);
        let days_since_restore_test = fact_num(snapshot, "backup.days_since_restore_test").unwrap_or(f64::MAX);
        let status = if hours_since_backup <= 24.0 && days_since_restore_test <= 30.0 {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        };
        CheckResult {
            name: self.name(),
            status,
            severity: if status == CheckStatus::Pass { Severity::Low } else { Severity::High },
            details: snapshot.facts.get_path("backup").cloned().unwrap_or(Value::Null),
            error: None,
        }
    }
}

pub struct LoggingCheck;
impl Check for LoggingCheck {
    fn name(&self) -> &'static str {
        "logging"
    }
    fn evaluate(&self, snapshot: &HostSnapshot) -> CheckResult {
        let running = fact_bool(snapshot, "logging.service_running").unwrap_or(false);
        let forwarding = fact_bool(snapshot, "logging.forwarding_active").unwrap_or(false);
        let status = if running && forwarding { CheckStatus::Pass } else { CheckStatus::Fail };
        CheckResult {
            name: self.name(),
            status,
            severity: if status == CheckStatus::Pass { Severity::Low } else { Severity::Medium },
            details: snapshot.facts.get_path("logging").cloned().unwrap_or(Value::Null),
            error: None,
        }
    }
}

pub struct FirewallCheck;
impl Check for FirewallCheck {
    fn name(&self) -> &'static str {
        "firewall"
    }
    fn evaluate(&self, snapshot: &HostSnapshot) -> CheckResult {
        let active = fact_str(snapshot, "firewall.active_profile").unwrap_or("unknown");
        let expected = fact_str(snapshot, "firewall.baseline_profile").unwrap_or("enabled");
        let status = if active == expected { CheckStatus::Pass } else { CheckStatus::Fail };
        CheckResult {
            name: self.name(),
            status,
            severity: if status == CheckStatus::Pass { Severity::Low } else { Severity::High },
            details: snapshot.facts.get_path("firewall").cloned().unwrap_or(Value::Null),
            error: None,
        }
    }
}

pub struct EncryptionCheck;
impl Check for EncryptionCheck {
    fn name(&self) -> &'static str {
        "encryption"
    }
    fn evaluate(&self, snapshot: &HostSnapshot) -> CheckResult {
        let enabled = fact_bool(snapshot, "encryption.full_disk_enabled").unwrap_or(false);
        let recovery_key_backed_up = fact_bool(snapshot, "encryption.recovery_key_verified").unwrap_or(false);
        let status = if enabled && recovery_key_backed_up { CheckStatus::Pass } else { CheckStatus::Fail };
        CheckResult {
            name: self.name(),
            status,
            severity: if status == CheckStatus::Pass { Severity::Low } else { Severity::Critical },
            details: snapshot.facts.get_path("encryption").cloned().unwrap_or(Value::Null),
            error: None,
        }
    }
}

/// The fixed catalog of six named checks (spec §4.5). Data, not a
/// hardcoded `match` — new checks register here.
pub fn builtin_checks() -> Vec<Box<dyn Check>> {
    vec![
        Box::new(PatchingCheck),
        Box::new(AvEdrCheck),
        Box::new(BackupCheck),
        Box::new(LoggingCheck),
        Box::new(FirewallCheck),
        Box::new(EncryptionCheck),
    ]
}

#[allow(dead_code)]
fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot_with(facts: Value) -> HostSnapshot {
        HostSnapshot {
            host_id: "host-1".into(),
            site_id: "site-a".into(),
            collected_at: Utc::now(),
            facts,
        }
    }

    fn map(pairs: Vec<(&str, Value)>) -> Value {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<BTreeMap<_, _>>())
    }

    #[test]
    fn patching_fails_when_critical_patch_is_stale() {
        let snapshot = snapshot_with(map(vec![("critical_patch_age_days", Value::Number(9.0))]));
        let result = PatchingCheck.evaluate(&snapshot);
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.severity, Severity::High);
    }

    #[test]
    fn firewall_passes_when_profile_matches_baseline() {
        let snapshot = snapshot_with(map(vec![(
            "firewall",
            map(vec![
                ("active_profile", Value::from("enabled")),
                ("baseline_profile", Value::from("enabled")),
            ]),
        )]));
        let result = FirewallCheck.evaluate(&snapshot);
        assert_eq!(result.status, CheckStatus::Pass);
    }

    #[test]
    fn firewall_fails_when_profile_diverges() {
        let snapshot = snapshot_with(map(vec![(
            "firewall",
            map(vec![
                ("active_profile", Value::from("disabled")),
                ("baseline_profile", Value::from("enabled")),
            ]),
        )]));
        let result = FirewallCheck.evaluate(&snapshot);
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.severity, Severity::High);
    }

    #[test]
    fn backup_requires_both_recency_and_restore_test() {
        let snapshot = snapshot_with(map(vec![(
            "backup",
            map(vec![
                ("hours_since_last", Value::Number(2.0)),
                ("days_since_restore_test", Value::Number(45.0)),
            ]),
        )]));
        let result = BackupCheck.evaluate(&snapshot);
        assert_eq!(result.status, CheckStatus::Fail);
    }

    #[test]
    fn builtin_checks_registers_all_six() {
        assert_eq!(builtin_checks().len(), 6);
    }
}
