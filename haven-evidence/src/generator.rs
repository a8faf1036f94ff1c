//! Builds, seals, and locally persists [`EvidenceBundle`]s: the
//! exclusive owner of the local hash chain and the upload registry
//! (spec §3 "Ownership summary").

use crate::canonical::canonical_bytes_excluding;
use crate::hashchain::HashChain;
use crate::registry::UploadRegistry;
use chrono::Utc;
use haven_bastion::signer::{content_hash, Signer};
use haven_telemetry::{EventBus, EventSeverity, TelemetryEvent};
use haven_types::evidence::format_bundle_id;
use haven_types::{ActionRecord, AgentError, EvidenceBundle, HashChainLink, ScrubberStats, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub struct EvidenceGenerator {
    state_dir: PathBuf,
    signer: Signer,
    chain: HashChain,
    registry: UploadRegistry,
    daily_sequence: AtomicU32,
    events: Arc<EventBus>,
}

pub struct SealInput {
    pub site_id: String,
    pub host_id: String,
    pub check_or_runbook_id: String,
    pub outcome: String,
    pub hipaa_controls: Vec<String>,
    pub pre_state: Value,
    pub post_state: Value,
    pub actions: Vec<ActionRecord>,
    pub phi_scrubbed: bool,
    pub scrubber_stats: Option<ScrubberStats>,
}

impl EvidenceGenerator {
    pub fn open(state_dir: &Path, signer: Signer, events: Arc<EventBus>) -> Result<Self, AgentError> {
        let chain = HashChain::open(&state_dir.join("hash-chain").join("chain.jsonl"))?;
        let registry = UploadRegistry::open(&state_dir.join("evidence").join(".upload_registry.json"))?;
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            signer,
            chain,
            registry,
            daily_sequence: AtomicU32::new(0),
            events,
        })
    }

    /// Builds a bundle from `input`, computes its content hash over the
    /// canonical encoding with `signature` excluded, signs it, chains it,
    /// writes `{bundle_id}.json`/`.sig` to
    /// `evidence/YYYY/MM/DD/`, and registers it as `pending` upload.
    pub fn seal(&self, input: SealInput) -> Result<EvidenceBundle, AgentError> {
        let now = Utc::now();
        let sequence = self.daily_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let bundle_id = format_bundle_id(now, sequence);

        let mut bundle = EvidenceBundle {
            bundle_id: bundle_id.clone(),
            site_id: input.site_id,
            host_id: input.host_id,
            check_or_runbook_id: input.check_or_runbook_id,
            timestamp: now,
            outcome: input.outcome,
            hipaa_controls: input.hipaa_controls,
            pre_state: input.pre_state,
            post_state: input.post_state,
            actions: input.actions,
            phi_scrubbed: input.phi_scrubbed,
            scrubber_stats: input.scrubber_stats,
            prev_hash: String::new(),
            content_hash: String::new(),
            signature: String::new(),
            worm_uri: None,
        };

        let canonical = canonical_bytes_excluding(&bundle, &["signature"])
            .map_err(|e| AgentError::StoreCorruption {
                message: format!("cannot canonicalize evidence bundle: {e}"),
            })?;
        let hash = content_hash(&canonical);
        bundle.content_hash = hash.clone();
        bundle.signature = self.signer.sign(hash.as_bytes());

        let link = self.chain.append(&bundle_id, &hash)?;
        bundle.prev_hash = link.prev_hash.clone();

        self.write_to_disk(&bundle, now)?;
        self.registry.record_pending(&bundle_id)?;

        Ok(bundle)
    }

    fn write_to_disk(&self, bundle: &EvidenceBundle, when: chrono::DateTime<Utc>) -> Result<(), AgentError> {
        let dir = self
            .state_dir
            .join("evidence")
            .join(when.format("%Y").to_string())
            .join(when.format("%m").to_string())
            .join(when.format("%d").to_string());
        std::fs::create_dir_all(&dir).map_err(|e| AgentError::StoreCorruption {
            message: format!("cannot create evidence dir: {e}"),
        })?;

        let json_path = dir.join(format!("{}.json", bundle.bundle_id));
        let sig_path = dir.join(format!("{}.sig", bundle.bundle_id));

        let json_bytes = serde_json::to_vec_pretty(bundle).map_err(|e| AgentError::StoreCorruption {
            message: format!("cannot serialize evidence bundle: {e}"),
        })?;
        std::fs::write(&json_path, &json_bytes).map_err(|e| AgentError::StoreCorruption {
            message: format!("cannot write evidence bundle: {e}"),
        })?;
        std::fs::write(&sig_path, &bundle.signature).map_err(|e| AgentError::StoreCorruption {
            message: format!("cannot write evidence signature: {e}"),
        })?;
        Ok(())
    }

    /// Verifies the chain's structural linkage and, for every link, rehashes
    /// the bundle it names straight off disk so an externally mutated
    /// bundle is caught even though `chain.jsonl` itself was never touched
    /// (spec §7, scenario S5). A detected break is never silently repaired:
    /// the broken segment is frozen, a fresh segment is started from the
    /// genesis hash, and a high-severity self-incident is emitted on the
    /// event bus before the error is returned to the caller.
    pub fn verify_chain(&self) -> Result<(), AgentError> {
        match self.chain.verify_with_bundles(|link| self.rehash_bundle(link)) {
            Ok(_) => Ok(()),
            Err(AgentError::HashChainBroken { index, reason }) => {
                let last_known_good = self.last_known_good_before(index);
                match self.chain.freeze_and_start_new_segment(&last_known_good) {
                    Ok(frozen_path) => {
                        tracing::error!(
                            index,
                            reason = %reason,
                            last_known_good = %last_known_good,
                            frozen_path = %frozen_path.display(),
                            "hash chain integrity broken; chain frozen and a new segment started"
                        );
                    }
                    Err(freeze_err) => {
                        tracing::error!(index, reason = %reason, "hash chain integrity broken and freeze itself failed: {freeze_err}");
                    }
                }
                self.events.emit(
                    TelemetryEvent::new(
                        "evidence_pipeline",
                        EventSeverity::Alert,
                        format!(
                            "hash chain broken at index {index}: {reason}. Chain frozen; new segment started from genesis (last-known-good {last_known_good})."
                        ),
                    )
                    .with_context(Value::String(format!("index={index} reason={reason}"))),
                );
                Err(AgentError::HashChainBroken { index, reason })
            }
            Err(e) => Err(e),
        }
    }

    /// Recomputes the canonical content hash of the bundle a link names by
    /// reloading it from disk, the same `EB-YYYYMMDD-NNNN` → path mapping
    /// `seal`/`write_to_disk` use. `Ok(None)` skips synthetic segment-marker
    /// links that have no bundle on disk.
    fn rehash_bundle(&self, link: &HashChainLink) -> Result<Option<String>, AgentError> {
        if link.bundle_id == "SEGMENT-RESTART" {
            return Ok(None);
        }
        let bundle = self.load_bundle_from_disk(&link.bundle_id)?;
        let canonical = canonical_bytes_excluding(&bundle, &["signature"]).map_err(|e| AgentError::StoreCorruption {
            message: format!("cannot canonicalize evidence bundle {}: {e}", link.bundle_id),
        })?;
        Ok(Some(content_hash(&canonical)))
    }

    fn load_bundle_from_disk(&self, bundle_id: &str) -> Result<EvidenceBundle, AgentError> {
        let malformed = || AgentError::StoreCorruption {
            message: format!("malformed evidence bundle id: {bundle_id}"),
        };
        let date_part = bundle_id
            .strip_prefix("EB-")
            .and_then(|rest| rest.split('-').next())
            .ok_or_else(malformed)?;
        if date_part.len() != 8 {
            return Err(malformed());
        }
        let (year, rest) = date_part.split_at(4);
        let (month, day) = rest.split_at(2);

        let path = self
            .state_dir
            .join("evidence")
            .join(year)
            .join(month)
            .join(day)
            .join(format!("{bundle_id}.json"));
        let json_bytes = std::fs::read(&path).map_err(|e| AgentError::StoreCorruption {
            message: format!("cannot read evidence bundle {bundle_id} for chain verification: {e}"),
        })?;
        serde_json::from_slice(&json_bytes).map_err(|e| AgentError::StoreCorruption {
            message: format!("corrupt evidence bundle {bundle_id}: {e}"),
        })
    }

    /// Content hash of the link immediately preceding `broken_index` (or
    /// the genesis hash if the very first link is the one that broke) —
    /// the "last-known-good" value recorded on the new segment's genesis.
    fn last_known_good_before(&self, broken_index: u64) -> String {
        self.chain
            .links()
            .ok()
            .and_then(|links| links.into_iter().find(|l| l.index + 1 == broken_index).map(|l| l.content_hash))
            .unwrap_or_else(haven_types::evidence::genesis_hash)
    }

    pub fn registry(&self) -> &UploadRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_bastion::signer::{verify as verify_signature, Signer};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample_input() -> SealInput {
        SealInput {
            site_id: "site-a".into(),
            host_id: "host-1".into(),
            check_or_runbook_id: "firewall".into(),
            outcome: "success".into(),
            hipaa_controls: vec!["164.312(a)(1)".into()],
            pre_state: Value::Map(BTreeMap::new()),
            post_state: Value::Map(BTreeMap::new()),
            actions: Vec::new(),
            phi_scrubbed: true,
            scrubber_stats: None,
        }
    }

    #[test]
    fn seal_produces_a_verifiable_signature_and_chains_correctly() {
        let dir = tempdir().unwrap();
        let (signer, _pkcs8) = Signer::generate().unwrap();
        let public_key = signer.public_key_bytes();
        let generator = EvidenceGenerator::open(dir.path(), signer, Arc::new(EventBus::new())).unwrap();

        let first = generator.seal(sample_input()).unwrap();
        assert_eq!(first.prev_hash, haven_types::evidence::genesis_hash());
        assert!(verify_signature(&public_key, first.content_hash.as_bytes(), &first.signature));

        let second = generator.seal(sample_input()).unwrap();
        assert_eq!(second.prev_hash, first.content_hash);

        generator.verify_chain().unwrap();
    }

    #[test]
    fn verify_chain_freezes_and_restarts_after_an_externally_mutated_bundle() {
        use haven_telemetry::RingBufferSink;

        let dir = tempdir().unwrap();
        let (signer, _pkcs8) = Signer::generate().unwrap();
        let ring = Arc::new(RingBufferSink::new(16));
        let events = Arc::new(EventBus::new().with_sink(ring.clone()));
        let generator = EvidenceGenerator::open(dir.path(), signer, events).unwrap();

        let first = generator.seal(sample_input()).unwrap();
        let second = generator.seal(sample_input()).unwrap();
        let _third = generator.seal(sample_input()).unwrap();

        // Externally mutate the middle (second) bundle's actions, leaving
        // chain.jsonl completely untouched.
        let bundle_path = dir
            .path()
            .join("evidence")
            .join(second.timestamp.format("%Y").to_string())
            .join(second.timestamp.format("%m").to_string())
            .join(second.timestamp.format("%d").to_string())
            .join(format!("{}.json", second.bundle_id));
        let mut on_disk: EvidenceBundle = serde_json::from_slice(&std::fs::read(&bundle_path).unwrap()).unwrap();
        on_disk.actions.push(ActionRecord {
            action: "inject".into(),
            params: Value::Null,
            script_hash: "deadbeef".into(),
            outcome: "success".into(),
            stdout_truncated: false,
            stderr_truncated: false,
        });
        std::fs::write(&bundle_path, serde_json::to_vec_pretty(&on_disk).unwrap()).unwrap();

        match generator.verify_chain() {
            Err(AgentError::HashChainBroken { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected break at index 1, got {other:?}"),
        }

        // Never silently repaired: the old chain is frozen...
        assert!(std::fs::read_dir(dir.path().join("hash-chain"))
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("chain-frozen-")));

        // ...a high-severity self-incident is raised...
        assert!(ring
            .recent(16)
            .iter()
            .any(|e| matches!(e.severity, haven_telemetry::EventSeverity::Alert) && e.message.contains("hash chain broken")));

        // ...and a new bundle starts a fresh, clean segment.
        let restarted = generator.seal(sample_input()).unwrap();
        assert_eq!(restarted.prev_hash, haven_types::evidence::genesis_hash());
        generator.verify_chain().unwrap();
        let _ = first;
    }
}
