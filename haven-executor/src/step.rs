//! Typed remediation steps and runbooks (spec §4.6).

use haven_types::Value;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);
pub const MAX_STEP_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);
pub const OUTPUT_TRUNCATE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Abort,
    Continue,
}

impl Default for OnFailure {
    fn default() -> Self {
        OnFailure::Abort
    }
}

/// One command/script to run against a [`crate::transport::RemoteTransport`]
/// target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub command_text: String,
    pub params: Value,
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub on_failure: OnFailure,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Step {
    pub fn effective_timeout(&self) -> Duration {
        self.timeout
            .unwrap_or(DEFAULT_STEP_TIMEOUT)
            .min(MAX_STEP_TIMEOUT)
    }
}

/// An ordered, named remediation procedure (spec §4.6, glossary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runbook {
    pub id: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub rollback: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure,
    Timeout,
}

/// Result of running one [`Step`]. `stdout`/`stderr` are already truncated
/// to [`OUTPUT_TRUNCATE_BYTES`] by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub outcome: StepOutcome,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

/// Truncates `text` to at most [`OUTPUT_TRUNCATE_BYTES`] (on a UTF-8
/// boundary), returning whether truncation occurred.
pub fn truncate_output(text: &str) -> (String, bool) {
    if text.len() <= OUTPUT_TRUNCATE_BYTES {
        return (text.to_string(), false);
    }
    let mut end = OUTPUT_TRUNCATE_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunbookOutcome {
    Success,
    Partial,
    Failure,
}
