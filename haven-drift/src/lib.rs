//! Drift detector: evaluates the fixed catalog of compliance checks against
//! managed-host snapshots and materializes [`haven_types::Incident`]s for
//! every non-pass result (spec §4.5).

pub mod check;
pub mod detector;
pub mod snapshot;

pub use check::{
    builtin_checks, AvEdrCheck, BackupCheck, Check, CheckResult, CheckStatus, EncryptionCheck,
    FirewallCheck, LoggingCheck, PatchingCheck,
};
pub use detector::{DetectionOutcome, DriftDetector};
pub use snapshot::HostSnapshot;
