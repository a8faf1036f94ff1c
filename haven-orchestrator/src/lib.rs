//! The auto-healer state machine and the worker pools that drive it: drift
//! workers, the healer pool, the evidence-upload worker, the learning-loop
//! worker, and the check-in worker (spec §4, §5).

pub mod catalog;
pub mod context;
pub mod orchestrator;
pub mod snapshot_collector;
pub mod workers;

pub use catalog::RunbookCatalog;
pub use context::{AgentContext, CredentialStore};
pub use orchestrator::AutoHealer;
pub use workers::{spawn_workers, WorkerConfig, WorkerHandles, DEFAULT_CHECKIN_INTERVAL, DEFAULT_DRIFT_POLL_INTERVAL, DEFAULT_EVIDENCE_POLL_INTERVAL, DEFAULT_HEALER_POOL_SIZE, DEFAULT_LEARNING_LOOP_INTERVAL};
