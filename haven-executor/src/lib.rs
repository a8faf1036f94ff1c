//! Remote remediation executor: typed steps and runbooks driven over
//! WinRM (Windows) or SSH (Linux/local) with bounded timeouts, retries,
//! and truncated output capture (spec §4.6).

pub mod executor;
pub mod ssh;
pub mod step;
pub mod transport;
pub mod winrm;

pub use executor::{run_runbook, RunbookExecution};
pub use ssh::SshTransport;
pub use step::{
    truncate_output, OnFailure, Runbook, RunbookOutcome, Step, StepOutcome, StepResult,
    DEFAULT_MAX_RETRIES, DEFAULT_STEP_TIMEOUT, MAX_STEP_TIMEOUT, OUTPUT_TRUNCATE_BYTES,
};
pub use transport::{run_with_retry, RemoteTransport};
pub use winrm::WinrmTransport;
