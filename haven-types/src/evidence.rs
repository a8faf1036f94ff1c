//! [`EvidenceBundle`] and [`HashChainLink`] — the immutable forensic record
//! of a single check or remediation, and its chain-linkage metadata (spec
//! §3, §4.7).

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The genesis link's `prev_hash`: 64 zero nibbles, the hex width of a
/// SHA-256 digest (spec §3, §4.7).
pub fn genesis_hash() -> String {
    "0".repeat(64)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub params: Value,
    /// SHA-256 hex digest of the script/command that was actually run.
    pub script_hash: String,
    pub outcome: String,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrubberStats {
    pub categories_triggered: Vec<String>,
    pub redaction_count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub bundle_id: String,
    pub site_id: String,
    pub host_id: String,
    pub check_or_runbook_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: String,
    #[serde(default)]
    pub hipaa_controls: Vec<String>,
    pub pre_state: Value,
    pub post_state: Value,
    pub actions: Vec<ActionRecord>,
    pub phi_scrubbed: bool,
    #[serde(default)]
    pub scrubber_stats: Option<ScrubberStats>,
    pub prev_hash: String,
    /// SHA-256 of the canonical serialization of this bundle with
    /// `signature` omitted. Populated by `haven_evidence::seal`.
    #[serde(default)]
    pub content_hash: String,
    /// Base64-encoded Ed25519 signature over `content_hash`. Populated by
    /// `haven_evidence::seal`.
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub worm_uri: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HashChainLink {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub bundle_id: String,
    pub content_hash: String,
    pub prev_hash: String,
    /// Set only on the first link of a segment started after a break was
    /// detected; names the frozen segment and the last-known-good
    /// `content_hash` it ended on, so the restart is visible in the chain
    /// itself rather than only in a log line (spec §7 "never silently
    /// repaired").
    #[serde(default)]
    pub recovery_note: Option<String>,
}

/// Formats a bundle id as `EB-YYYYMMDD-NNNN` (spec §3).
pub fn format_bundle_id(date: DateTime<Utc>, sequence: u32) -> String {
    format!("EB-{}-{:04}", date.format("%Y%m%d"), sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_hash_is_sixty_four_zero_nibbles() {
        let h = genesis_hash();
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c == '0'));
    }

    #[test]
    fn bundle_id_format_matches_spec() {
        let date = DateTime::parse_from_rfc3339("2026-07-27T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_bundle_id(date, 7), "EB-20260727-0007");
    }
}
