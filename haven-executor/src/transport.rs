//! The [`RemoteTransport`] trait both concrete transports implement, and
//! the retry/backoff wrapper shared by both (spec §4.6).

use crate::step::{truncate_output, Step, StepOutcome, StepResult};
use async_trait::async_trait;
use haven_types::{AgentError, RemoteTarget};
use std::time::{Duration, Instant};

/// A single bounded execution of `step` against `target`, with no retry —
/// retry is the caller's concern ([`run_with_retry`]).
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn run_step(&self, target: &RemoteTarget, step: &Step) -> Result<StepResult, AgentError>;

    /// Drops the cached session for `target`, forcing re-establishment on
    /// the next call. Invoked by [`run_with_retry`] when a transport error
    /// suggests the cached session has gone stale.
    fn invalidate_session(&self, target: &RemoteTarget);
}

/// Runs `step` against `target` through `transport`, retrying up to
/// `step.max_retries` times with exponential backoff (1s, 2s, 4s, capped at
/// 30s) only on transport-layer errors — script-level failures never
/// retry (spec §4.6).
pub async fn run_with_retry(
    transport: &dyn RemoteTransport,
    target: &RemoteTarget,
    step: &Step,
) -> Result<StepResult, AgentError> {
    let mut attempt = 0u32;
    let mut backoff = crate::step::BACKOFF_BASE;

    loop {
        let started = Instant::now();
        match transport.run_step(target, step).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempt < step.max_retries => {
                transport.invalidate_session(target);
                tracing::warn!(
                    step = %step.name,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "transient transport error, retrying: {e}"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(crate::step::BACKOFF_CAP);
                attempt += 1;
            }
            Err(AgentError::Timeout { operation, elapsed_ms }) => {
                return Ok(StepResult {
                    outcome: StepOutcome::Timeout,
                    stdout: String::new(),
                    stderr: format!("step '{operation}' exceeded its deadline"),
                    exit_code: None,
                    duration_ms: elapsed_ms,
                    stdout_truncated: false,
                    stderr_truncated: false,
                });
            }
            Err(e) => {
                let (stderr, stderr_truncated) = truncate_output(&e.to_string());
                return Ok(StepResult {
                    outcome: StepOutcome::Failure,
                    stdout: String::new(),
                    stderr,
                    exit_code: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                    stdout_truncated: false,
                    stderr_truncated,
                });
            }
        }
    }
}
