//! Gathers a [`HostSnapshot`] from a managed host by running a fixed
//! fact-collection step over the host's [`RemoteTransport`] and parsing its
//! stdout as JSON (spec §4.5, §4.6).

use chrono::Utc;
use haven_executor::{run_with_retry, RemoteTransport, Step};
use haven_drift::HostSnapshot;
use haven_types::{AgentError, RemoteTarget, Value};
use std::sync::Arc;

/// The command text run against every managed host to gather the facts the
/// drift checks evaluate. It is expected to print a single JSON object to
/// stdout; the keys it contains are whatever the checks in
/// `haven_drift::check` read by path (`patching.critical_patch_age_days`,
/// `av_edr.present`, and so on).
const COLLECT_FACTS_COMMAND: &str = "haven-facts --json";

fn collect_facts_step() -> Step {
    Step {
        name: "collect_facts".to_string(),
        command_text: COLLECT_FACTS_COMMAND.to_string(),
        params: Value::Null,
        timeout: None,
        max_retries: 2,
        on_failure: haven_executor::OnFailure::Abort,
    }
}

/// Runs the fact-collection step against a host and returns its snapshot.
pub async fn collect_snapshot(
    transport: &Arc<dyn RemoteTransport>,
    target: &RemoteTarget,
    site_id: &str,
    host_id: &str,
) -> Result<HostSnapshot, AgentError> {
    let step = collect_facts_step();
    let result = run_with_retry(transport.as_ref(), target, &step).await?;

    if !matches!(result.outcome, haven_executor::StepOutcome::Success) {
        return Err(AgentError::TransportTransient {
            message: format!(
                "fact collection on host {host_id} did not succeed: {:?} ({})",
                result.outcome, result.stderr
            ),
        });
    }

    let parsed: serde_json::Value = serde_json::from_str(result.stdout.trim()).map_err(|e| {
        AgentError::ValidationFailed {
            reason: format!("host {host_id} returned non-JSON facts: {e}"),
        }
    })?;

    Ok(HostSnapshot {
        host_id: host_id.to_string(),
        site_id: site_id.to_string(),
        collected_at: Utc::now(),
        facts: Value::from_json(parsed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use haven_executor::{StepOutcome, StepResult};
    use haven_types::RemoteTransport as TargetTransport;

    struct StubTransport {
        stdout: String,
    }

    #[async_trait]
    impl RemoteTransport for StubTransport {
        async fn run_step(&self, _target: &RemoteTarget, _step: &Step) -> Result<StepResult, AgentError> {
            Ok(StepResult {
                outcome: StepOutcome::Success,
                stdout: self.stdout.clone(),
                stderr: String::new(),
                exit_code: Some(0),
                duration_ms: 5,
                stdout_truncated: false,
                stderr_truncated: false,
            })
        }

        fn invalidate_session(&self, _target: &RemoteTarget) {}
    }

    fn target() -> RemoteTarget {
        RemoteTarget {
            host: "10.0.0.5".to_string(),
            port: 22,
            username: "svc".to_string(),
            secret: "x".to_string().into(),
            transport: TargetTransport::Ssh,
            domain: None,
            use_ssl: false,
        }
    }

    #[tokio::test]
    async fn parses_stdout_json_into_a_snapshot() {
        let transport: Arc<dyn RemoteTransport> = Arc::new(StubTransport {
            stdout: r#"{"patching":{"critical_patch_age_days":1.0}}"#.to_string(),
        });
        let snapshot = collect_snapshot(&transport, &target(), "site-a", "host-1")
            .await
            .unwrap();
        assert_eq!(snapshot.host_id, "host-1");
        assert!(snapshot.fact("patching.critical_patch_age_days").is_some());
    }

    #[tokio::test]
    async fn rejects_non_json_stdout() {
        let transport: Arc<dyn RemoteTransport> = Arc::new(StubTransport {
            stdout: "not json".to_string(),
        });
        let err = collect_snapshot(&transport, &target(), "site-a", "host-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ValidationFailed { .. }));
    }
}
