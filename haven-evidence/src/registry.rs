//! The upload registry: `<state_dir>/evidence/.upload_registry.json`,
//! tracking each sealed bundle's delivery state. Exclusively owned by the
//! Evidence Generator (spec §3 "Ownership summary").

use chrono::{DateTime, Utc};
use haven_types::AgentError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    Pending,
    Uploaded { worm_uri: String },
    Failed { reason: String, n_attempts: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub state: UploadState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    bundles: BTreeMap<String, RegistryEntry>,
}

pub struct UploadRegistry {
    path: PathBuf,
    inner: Mutex<RegistryFile>,
}

impl UploadRegistry {
    pub fn open(path: &Path) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AgentError::StoreCorruption {
                message: format!("cannot create evidence dir: {e}"),
            })?;
        }
        let inner = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| AgentError::StoreCorruption {
                message: format!("cannot read upload registry: {e}"),
            })?;
            serde_json::from_str(&raw).map_err(|e| AgentError::StoreCorruption {
                message: format!("corrupt upload registry: {e}"),
            })?
        } else {
            RegistryFile::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(inner),
        })
    }

    pub fn record_pending(&self, bundle_id: &str) -> Result<(), AgentError> {
        self.update(bundle_id, UploadState::Pending)
    }

    pub fn record_uploaded(&self, bundle_id: &str, worm_uri: &str) -> Result<(), AgentError> {
        self.update(bundle_id, UploadState::Uploaded { worm_uri: worm_uri.to_string() })
    }

    pub fn record_failed(&self, bundle_id: &str, reason: &str) -> Result<(), AgentError> {
        let attempts = self.attempts_so_far(bundle_id) + 1;
        self.update(
            bundle_id,
            UploadState::Failed {
                reason: reason.to_string(),
                n_attempts: attempts,
            },
        )
    }

    pub fn entry(&self, bundle_id: &str) -> Option<RegistryEntry> {
        self.inner.lock().bundles.get(bundle_id).cloned()
    }

    pub fn pending_bundle_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .bundles
            .iter()
            .filter(|(_, e)| matches!(e.state, UploadState::Pending))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn attempts_so_far(&self, bundle_id: &str) -> u32 {
        match self.entry(bundle_id).map(|e| e.state) {
            Some(UploadState::Failed { n_attempts, .. }) => n_attempts,
            _ => 0,
        }
    }

    fn update(&self, bundle_id: &str, state: UploadState) -> Result<(), AgentError> {
        let mut guard = self.inner.lock();
        guard.bundles.insert(
            bundle_id.to_string(),
            RegistryEntry {
                state,
                updated_at: Utc::now(),
            },
        );
        let bytes = serde_json::to_vec_pretty(&*guard).map_err(|e| AgentError::StoreCorruption {
            message: format!("cannot serialize upload registry: {e}"),
        })?;
        std::fs::write(&self.path, bytes).map_err(|e| AgentError::StoreCorruption {
            message: format!("cannot write upload registry: {e}"),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pending_then_uploaded_transitions_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".upload_registry.json");
        let registry = UploadRegistry::open(&path).unwrap();

        registry.record_pending("EB-20260727-0001").unwrap();
        assert_eq!(registry.pending_bundle_ids(), vec!["EB-20260727-0001".to_string()]);

        registry
            .record_uploaded("EB-20260727-0001", "s3://bucket/key")
            .unwrap();
        assert!(registry.pending_bundle_ids().is_empty());

        let reopened = UploadRegistry::open(&path).unwrap();
        match reopened.entry("EB-20260727-0001").unwrap().state {
            UploadState::Uploaded { worm_uri } => assert_eq!(worm_uri, "s3://bucket/key"),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn failed_attempts_increment() {
        let dir = tempdir().unwrap();
        let registry = UploadRegistry::open(&dir.path().join(".upload_registry.json")).unwrap();
        registry.record_pending("EB-1").unwrap();
        registry.record_failed("EB-1", "timeout").unwrap();
        registry.record_failed("EB-1", "timeout again").unwrap();
        match registry.entry("EB-1").unwrap().state {
            UploadState::Failed { n_attempts, .. } => assert_eq!(n_attempts, 2),
            other => panic!("unexpected state: {other:?}"),
        }
    }
}
