//! Severity-to-channel routing (spec §4.4): which notification channels
//! fire for a given incident severity. A channel with no sink configured
//! for the current deployment is simply absent from [`Escalator`]'s sink
//! list — routing only decides which of the *configured* sinks are
//! addressed, it never requires every channel to exist.

use haven_types::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Pager,
    Chat,
    Email,
}

/// Channels addressed for `severity`. Critical pages, high pages and chats,
/// medium chats and emails, low emails only — escalating severity never
/// drops a channel a lower tier already had.
pub fn channels_for(severity: Severity) -> &'static [Channel] {
    match severity {
        Severity::Critical => &[Channel::Pager, Channel::Chat, Channel::Email],
        Severity::High => &[Channel::Pager, Channel::Chat],
        Severity::Medium => &[Channel::Chat, Channel::Email],
        Severity::Low => &[Channel::Email],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_pages_chats_and_emails() {
        assert_eq!(
            channels_for(Severity::Critical),
            &[Channel::Pager, Channel::Chat, Channel::Email]
        );
    }

    #[test]
    fn low_only_emails() {
        assert_eq!(channels_for(Severity::Low), &[Channel::Email]);
    }

    #[test]
    fn escalating_severity_never_drops_a_lower_tiers_channel() {
        let low: std::collections::HashSet<_> = channels_for(Severity::Low).iter().copied().collect();
        let medium: std::collections::HashSet<_> = channels_for(Severity::Medium).iter().copied().collect();
        assert!(low.is_subset(&medium));
    }
}
