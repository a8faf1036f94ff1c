//! [`AgentContext`]: the shared state every worker pool and the
//! incident-processing state machine operate against. Built once at
//! startup by `haven-agent` and handed around behind an `Arc`.

use haven_bastion::{Allowlist, GuardrailPipeline, MaintenanceWindow};
use haven_control_plane::ControlPlaneClient;
use haven_evidence::EvidenceGenerator;
use haven_executor::RemoteTransport;
use haven_l1::L1Engine;
use haven_l2::L2Planner;
use haven_l3::Escalator;
use haven_queue::OfflineQueue;
use haven_store::{IncidentStore, PromotionPolicy, PromotionWatcher};
use haven_telemetry::EventBus;
use haven_types::{AgentError, Clock, RemoteTarget};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::catalog::RunbookCatalog;

/// Ephemeral per-host credentials pulled on each check-in cycle, kept only
/// in memory and replaced wholesale whenever a fresher set arrives.
pub struct CredentialStore {
    targets: RwLock<HashMap<String, RemoteTarget>>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, host_id: &str) -> Option<RemoteTarget> {
        self.targets.read().await.get(host_id).cloned()
    }

    /// Every host currently holding a credential — the drift worker's set
    /// of managed hosts for this cycle.
    pub async fn host_ids(&self) -> Vec<String> {
        self.targets.read().await.keys().cloned().collect()
    }

    /// Replaces the whole credential set. The control plane always sends
    /// the full set it wants the agent holding for this cycle, never a
    /// delta, so there is nothing to merge.
    pub async fn replace_all(&self, credentials: Vec<(String, RemoteTarget)>) {
        let mut guard = self.targets.write().await;
        guard.clear();
        guard.extend(credentials);
    }
}

/// All shared, long-lived state the agent's workers and the incident state
/// machine read or mutate. `l1` is behind its own lock because the
/// learning-loop worker hot-swaps it for a freshly loaded engine whenever a
/// rule is promoted, while every other field is either immutable for the
/// process lifetime or internally synchronized by its own crate.
pub struct AgentContext {
    pub site_id: String,
    pub rules_dir: PathBuf,
    pub state_dir: PathBuf,
    /// When true, the executor stage is skipped and every action is recorded
    /// as if it had succeeded with no side effect — spec §6's `--dry-run`.
    pub dry_run: bool,

    pub l1: RwLock<Arc<L1Engine>>,
    pub l2: L2Planner,
    pub escalator: Escalator,
    pub guardrails: GuardrailPipeline,
    pub runbooks: RunbookCatalog,
    pub allowlist: Allowlist,

    pub store: IncidentStore,
    pub evidence: EvidenceGenerator,
    pub queue: OfflineQueue,
    pub control_plane: Option<Arc<ControlPlaneClient>>,
    pub events: Arc<EventBus>,

    pub credentials: CredentialStore,
    pub maintenance_windows: RwLock<Vec<MaintenanceWindow>>,
    pub transport: Arc<dyn RemoteTransport>,
    pub clock: Arc<dyn Clock>,

    pub promotion_policy: PromotionPolicy,
    pub promotion_watcher: PromotionWatcher,
}

impl AgentContext {
    /// Swaps in a freshly constructed L1 engine, e.g. after the learning
    /// loop writes a newly promoted rule to `rules_dir/promoted/`.
    pub async fn swap_l1_engine(&self, engine: L1Engine) {
        let mut guard = self.l1.write().await;
        *guard = Arc::new(engine);
    }

    pub async fn l1_engine(&self) -> Arc<L1Engine> {
        self.l1.read().await.clone()
    }

    pub async fn maintenance_windows_snapshot(&self) -> Vec<MaintenanceWindow> {
        self.maintenance_windows.read().await.clone()
    }

    /// Loads `rules_dir` from disk fresh, compiling and sorting every rule —
    /// the same path taken at startup, reused by the learning loop after it
    /// writes a newly promoted rule and by a rollback that disables one.
    pub fn rebuild_l1_engine(&self) -> Result<L1Engine, AgentError> {
        let rules = haven_l1::load_rules(&self.rules_dir, &self.allowlist)?;
        Ok(L1Engine::new(rules, self.clock.clone()))
    }

    pub async fn reload_l1_engine(&self) -> Result<(), AgentError> {
        let engine = self.rebuild_l1_engine()?;
        self.swap_l1_engine(engine).await;
        Ok(())
    }
}
