//! Action allowlist: the first guardrail stage. An action not on this list
//! never executes, no matter what tier proposed it — `escalate` is always
//! implicitly allowed since it requests a human rather than performing a
//! remediation.

use std::collections::HashSet;

pub const ALWAYS_ALLOWED: &str = "escalate";

#[derive(Debug, Clone)]
pub struct Allowlist {
    actions: HashSet<String>,
}

impl Allowlist {
    pub fn new(actions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            actions: actions.into_iter().map(|a| a.into().to_lowercase()).collect(),
        }
    }

    /// The default fleet-wide allowlist: the canonical HIPAA remediation
    /// actions plus the per-check-catalog actions the builtin L1 rules
    /// dispatch to. Nothing destructive; `escalate` is covered implicitly.
    pub fn default_fleet() -> Self {
        Self::new([
            "restart_service",
            "enable_service",
            "configure_firewall",
            "restore_firewall_baseline",
            "apply_gpo",
            "enable_bitlocker",
            "fix_audit_policy",
            "apply_ssh_hardening",
            "fix_ntp",
            "fix_permissions",
            "enable_defender",
            "fix_password_policy",
            "restart_logging_service",
            "apply_patches",
            "restart_av_service",
            "trigger_backup_job",
        ])
    }

    pub fn allows(&self, action: &str) -> bool {
        let lower = action.to_lowercase();
        lower == ALWAYS_ALLOWED || self.actions.contains(&lower)
    }

    pub fn insert(&mut self, action: impl Into<String>) {
        self.actions.insert(action.into().to_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalate_is_always_allowed_even_on_empty_list() {
        let allowlist = Allowlist::new(Vec::<String>::new());
        assert!(allowlist.allows("Escalate"));
        assert!(!allowlist.allows("restart_service"));
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let allowlist = Allowlist::default_fleet();
        assert!(allowlist.allows("RESTART_SERVICE"));
    }
}
