//! Local hash-chain: appends [`HashChainLink`]s to `<state_dir>/hash-chain/chain.jsonl`
//! and verifies the chain end-to-end. The tip is protected by a mutex held
//! only for the duration of a single append (spec §5).

use chrono::Utc;
use haven_types::{AgentError, HashChainLink};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct HashChain {
    path: PathBuf,
    tip: Arc<Mutex<Option<String>>>,
    pending_recovery_note: Arc<Mutex<Option<String>>>,
}

impl HashChain {
    /// Opens (or creates) the chain file at `path`, reading the last link's
    /// `content_hash` into the in-memory tip so appends continue correctly
    /// across restarts.
    pub fn open(path: &Path) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AgentError::StoreCorruption {
                message: format!("cannot create hash-chain dir: {e}"),
            })?;
        }
        let tip = last_link(path)?.map(|link| link.content_hash);
        Ok(Self {
            path: path.to_path_buf(),
            tip: Arc::new(Mutex::new(tip)),
            pending_recovery_note: Arc::new(Mutex::new(None)),
        })
    }

    /// Appends a new link whose `prev_hash` is the current tip (or the
    /// genesis hash if this is the first link), sets the new tip, and
    /// fsyncs the write before returning. If a segment restart is pending
    /// (see [`Self::freeze_and_start_new_segment`]) this link carries the
    /// `recovery_note` and becomes the new segment's genesis link.
    pub fn append(&self, bundle_id: &str, content_hash: &str) -> Result<HashChainLink, AgentError> {
        let mut tip = self.tip.lock();
        let prev_hash = tip.clone().unwrap_or_else(haven_types::evidence::genesis_hash);

        let index = line_count(&self.path)? as u64;
        let recovery_note = self.pending_recovery_note.lock().take();
        let link = HashChainLink {
            index,
            timestamp: Utc::now(),
            bundle_id: bundle_id.to_string(),
            content_hash: content_hash.to_string(),
            prev_hash,
            recovery_note,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AgentError::StoreCorruption {
                message: format!("cannot open hash-chain file: {e}"),
            })?;
        let line = serde_json::to_string(&link).map_err(|e| AgentError::StoreCorruption {
            message: format!("cannot serialize hash-chain link: {e}"),
        })?;
        writeln!(file, "{line}").map_err(|e| AgentError::StoreCorruption {
            message: format!("cannot append hash-chain link: {e}"),
        })?;
        file.sync_all().map_err(|e| AgentError::StoreCorruption {
            message: format!("fsync of hash-chain file failed: {e}"),
        })?;

        *tip = Some(content_hash.to_string());
        Ok(link)
    }

    /// Walks the chain end-to-end, returning `Ok(links)` if every link's
    /// `prev_hash` matches its predecessor's `content_hash` (and the first
    /// link's `prev_hash` is the genesis hash), or `Err` naming the first
    /// offending index. Checks only the chain file's own internal linkage;
    /// use [`Self::verify_with_bundles`] to also catch a bundle mutated on
    /// disk without touching the chain.
    pub fn verify(&self) -> Result<Vec<HashChainLink>, AgentError> {
        self.verify_with_bundles(|_| Ok(None))
    }

    /// Same structural walk as [`Self::verify`], plus, for every link,
    /// `rehash_bundle(link)` is asked to recompute the bundle's canonical
    /// content hash from its on-disk JSON. `Ok(None)` skips the bundle
    /// check for that link (e.g. a synthetic segment-restart marker);
    /// `Ok(Some(hash))` that disagrees with the link's stored
    /// `content_hash` is reported as a break at that link's own index, even
    /// though `chain.jsonl` itself was never touched.
    pub fn verify_with_bundles(
        &self,
        mut rehash_bundle: impl FnMut(&HashChainLink) -> Result<Option<String>, AgentError>,
    ) -> Result<Vec<HashChainLink>, AgentError> {
        let links = read_all(&self.path)?;
        let mut expected_prev = haven_types::evidence::genesis_hash();
        for link in &links {
            if link.prev_hash != expected_prev {
                return Err(AgentError::HashChainBroken {
                    index: link.index,
                    reason: format!(
                        "expected prev_hash {} but found {}",
                        expected_prev, link.prev_hash
                    ),
                });
            }
            if let Some(actual) = rehash_bundle(link)? {
                if actual != link.content_hash {
                    return Err(AgentError::HashChainBroken {
                        index: link.index,
                        reason: format!(
                            "bundle {} rehashes to {actual} but chain link records {}",
                            link.bundle_id, link.content_hash
                        ),
                    });
                }
            }
            expected_prev = link.content_hash.clone();
        }
        Ok(links)
    }

    /// Returns every link currently on disk, oldest first.
    pub fn links(&self) -> Result<Vec<HashChainLink>, AgentError> {
        read_all(&self.path)
    }

    /// Recovery path for a detected break (spec §7, scenario S5): renames
    /// the broken chain file aside so it is preserved for forensics, then
    /// resets the in-memory tip so the next appended link becomes a fresh
    /// segment's genesis (`prev_hash` = the genesis hash, never a silent
    /// continuation of the broken segment). That genesis link carries
    /// `last_known_good` as its `recovery_note`.
    pub fn freeze_and_start_new_segment(&self, last_known_good: &str) -> Result<PathBuf, AgentError> {
        let mut tip = self.tip.lock();

        let frozen_path = self
            .path
            .with_file_name(format!("chain-frozen-{}.jsonl", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        if self.path.exists() {
            std::fs::rename(&self.path, &frozen_path).map_err(|e| AgentError::StoreCorruption {
                message: format!("cannot freeze broken hash-chain file: {e}"),
            })?;
        }

        *tip = None;
        *self.pending_recovery_note.lock() = Some(format!(
            "previous segment frozen at {}; last-known-good content_hash {last_known_good}",
            frozen_path.display()
        ));
        Ok(frozen_path)
    }
}

fn read_all(path: &Path) -> Result<Vec<HashChainLink>, AgentError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| AgentError::StoreCorruption {
        message: format!("cannot open hash-chain file: {e}"),
    })?;
    BufReader::new(file)
        .lines()
        .map(|line| {
            let line = line.map_err(|e| AgentError::StoreCorruption {
                message: format!("cannot read hash-chain line: {e}"),
            })?;
            serde_json::from_str(&line).map_err(|e| AgentError::StoreCorruption {
                message: format!("corrupt hash-chain line: {e}"),
            })
        })
        .collect()
}

fn last_link(path: &Path) -> Result<Option<HashChainLink>, AgentError> {
    Ok(read_all(path)?.into_iter().last())
}

fn line_count(path: &Path) -> Result<usize, AgentError> {
    Ok(read_all(path)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_link_chains_to_genesis() {
        let dir = tempdir().unwrap();
        let chain = HashChain::open(&dir.path().join("chain.jsonl")).unwrap();
        let link = chain.append("EB-1", "aaaa").unwrap();
        assert_eq!(link.prev_hash, haven_types::evidence::genesis_hash());
        assert_eq!(link.index, 0);
    }

    #[test]
    fn subsequent_links_chain_to_predecessor() {
        let dir = tempdir().unwrap();
        let chain = HashChain::open(&dir.path().join("chain.jsonl")).unwrap();
        chain.append("EB-1", "hash1").unwrap();
        let second = chain.append("EB-2", "hash2").unwrap();
        assert_eq!(second.prev_hash, "hash1");
        assert_eq!(second.index, 1);
    }

    #[test]
    fn verify_detects_mutated_middle_link() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        let chain = HashChain::open(&path).unwrap();
        chain.append("EB-1", "hash1").unwrap();
        chain.append("EB-2", "hash2").unwrap();
        chain.append("EB-3", "hash3").unwrap();

        // Simulate external mutation of the middle link's content_hash.
        let contents = std::fs::read_to_string(&path).unwrap();
        let mutated: Vec<String> = contents
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 1 {
                    line.replace("hash2", "tampered")
                } else {
                    line.to_string()
                }
            })
            .collect();
        std::fs::write(&path, mutated.join("\n") + "\n").unwrap();

        let reopened = HashChain::open(&path).unwrap();
        match reopened.verify() {
            Err(AgentError::HashChainBroken { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected break at index 2, got {other:?}"),
        }
    }

    #[test]
    fn reopening_continues_the_chain_from_the_last_tip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        {
            let chain = HashChain::open(&path).unwrap();
            chain.append("EB-1", "hash1").unwrap();
        }
        let reopened = HashChain::open(&path).unwrap();
        let link = reopened.append("EB-2", "hash2").unwrap();
        assert_eq!(link.prev_hash, "hash1");
        assert_eq!(link.index, 1);
    }

    #[test]
    fn verify_with_bundles_detects_a_bundle_mutated_without_touching_the_chain() {
        let dir = tempdir().unwrap();
        let chain = HashChain::open(&dir.path().join("chain.jsonl")).unwrap();
        chain.append("EB-1", "hash1").unwrap();
        chain.append("EB-2", "hash2").unwrap();
        chain.append("EB-3", "hash3").unwrap();

        // chain.jsonl is untouched; only the bundle behind EB-2 "changed".
        let rehash = |link: &HashChainLink| -> Result<Option<String>, AgentError> {
            if link.bundle_id == "EB-2" {
                Ok(Some("tampered-content".to_string()))
            } else {
                Ok(Some(link.content_hash.clone()))
            }
        };

        match chain.verify_with_bundles(rehash) {
            Err(AgentError::HashChainBroken { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected break at index 1, got {other:?}"),
        }
    }

    #[test]
    fn freeze_and_start_new_segment_restarts_from_genesis_with_a_recovery_note() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        let chain = HashChain::open(&path).unwrap();
        chain.append("EB-1", "hash1").unwrap();
        let broken = chain.append("EB-2", "hash2").unwrap();

        let frozen_path = chain.freeze_and_start_new_segment(&broken.content_hash).unwrap();
        assert!(frozen_path.exists());
        assert!(!path.exists());

        let restarted = chain.append("EB-3", "hash3").unwrap();
        assert_eq!(restarted.index, 0);
        assert_eq!(restarted.prev_hash, haven_types::evidence::genesis_hash());
        assert!(restarted.recovery_note.as_ref().unwrap().contains(&broken.content_hash));

        // The new segment verifies clean on its own.
        chain.verify().unwrap();
    }
}
