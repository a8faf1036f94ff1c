//! Maintenance windows: sites declare time ranges in which disruptive
//! actions (a reboot, a service restart with real downtime) are permitted to
//! execute unattended. Outside a declared window, a disruptive action is
//! only allowed if the next window opens within 24 hours — otherwise the
//! guardrail pipeline escalates to L3 rather than let the incident sit
//! unresolved for longer than a day (spec §4.9).

use chrono::{DateTime, Duration as ChronoDuration, Utc};

pub const ESCALATE_IF_NEXT_WINDOW_BEYOND: ChronoDuration = ChronoDuration::hours(24);

#[derive(Debug, Clone)]
pub struct MaintenanceWindow {
    pub site_id: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl MaintenanceWindow {
    pub fn contains(&self, when: DateTime<Utc>) -> bool {
        when >= self.starts_at && when < self.ends_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    /// Action may run now, either because it isn't disruptive or a window is open.
    Proceed,
    /// Action is disruptive, no window is open now, but one opens soon enough
    /// to simply wait rather than escalate.
    WaitForWindow,
    /// Action is disruptive and the next window is too far out (or none is
    /// declared); escalate to a human instead of waiting.
    Escalate,
}

pub struct MaintenanceWindowPolicy {
    disruptive_actions: Vec<String>,
}

impl MaintenanceWindowPolicy {
    pub fn new(disruptive_actions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            disruptive_actions: disruptive_actions
                .into_iter()
                .map(|a| a.into().to_lowercase())
                .collect(),
        }
    }

    pub fn default_disruptive() -> Self {
        Self::new(["reboot_host", "stop_service_extended", "apply_os_patch"])
    }

    pub fn is_disruptive(&self, action: &str) -> bool {
        self.disruptive_actions.contains(&action.to_lowercase())
    }

    /// `windows` need not be sorted or filtered to `site_id` — this filters
    /// and scans internally.
    pub fn decide(
        &self,
        action: &str,
        site_id: &str,
        now: DateTime<Utc>,
        windows: &[MaintenanceWindow],
    ) -> WindowDecision {
        if !self.is_disruptive(action) {
            return WindowDecision::Proceed;
        }

        let mut site_windows: Vec<&MaintenanceWindow> =
            windows.iter().filter(|w| w.site_id == site_id).collect();

        if site_windows.iter().any(|w| w.contains(now)) {
            return WindowDecision::Proceed;
        }

        site_windows.sort_by_key(|w| w.starts_at);
        match site_windows.iter().find(|w| w.starts_at > now) {
            Some(next) if next.starts_at - now <= ESCALATE_IF_NEXT_WINDOW_BEYOND => {
                WindowDecision::WaitForWindow
            }
            _ => WindowDecision::Escalate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(site: &str, start_hours: i64, end_hours: i64, now: DateTime<Utc>) -> MaintenanceWindow {
        MaintenanceWindow {
            site_id: site.to_string(),
            starts_at: now + ChronoDuration::hours(start_hours),
            ends_at: now + ChronoDuration::hours(end_hours),
        }
    }

    #[test]
    fn non_disruptive_actions_always_proceed() {
        let policy = MaintenanceWindowPolicy::default_disruptive();
        let now = Utc::now();
        assert_eq!(
            policy.decide("restart_service", "site-a", now, &[]),
            WindowDecision::Proceed
        );
    }

    #[test]
    fn disruptive_action_proceeds_inside_open_window() {
        let policy = MaintenanceWindowPolicy::default_disruptive();
        let now = Utc::now();
        let windows = vec![window("site-a", -1, 1, now)];
        assert_eq!(
            policy.decide("reboot_host", "site-a", now, &windows),
            WindowDecision::Proceed
        );
    }

    #[test]
    fn disruptive_action_waits_for_window_within_24h() {
        let policy = MaintenanceWindowPolicy::default_disruptive();
        let now = Utc::now();
        let windows = vec![window("site-a", 5, 6, now)];
        assert_eq!(
            policy.decide("reboot_host", "site-a", now, &windows),
            WindowDecision::WaitForWindow
        );
    }

    #[test]
    fn disruptive_action_escalates_when_window_too_far_or_absent() {
        let policy = MaintenanceWindowPolicy::default_disruptive();
        let now = Utc::now();
        let windows = vec![window("site-a", 30, 31, now)];
        assert_eq!(
            policy.decide("reboot_host", "site-a", now, &windows),
            WindowDecision::Escalate
        );
        assert_eq!(
            policy.decide("reboot_host", "site-a", now, &[]),
            WindowDecision::Escalate
        );
    }
}
