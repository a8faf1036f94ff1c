//! Runs a [`Runbook`]'s steps in order against a target, honoring
//! per-step `on_failure` and running `rollback` when a step aborts the
//! runbook (spec §4.6).

use crate::step::{OnFailure, Runbook, RunbookOutcome, Step, StepOutcome, StepResult};
use crate::transport::{run_with_retry, RemoteTransport};
use haven_types::RemoteTarget;

pub struct RunbookExecution {
    pub outcome: RunbookOutcome,
    pub step_results: Vec<(Step, StepResult)>,
    pub rollback_results: Vec<(Step, StepResult)>,
}

pub async fn run_runbook(
    transport: &dyn RemoteTransport,
    target: &RemoteTarget,
    runbook: &Runbook,
) -> Result<RunbookExecution, haven_types::AgentError> {
    let mut step_results = Vec::new();
    let mut any_failure = false;
    let mut aborted = false;

    for step in &runbook.steps {
        let result = run_with_retry(transport, target, step).await?;
        let failed = !matches!(result.outcome, StepOutcome::Success);
        if failed {
            any_failure = true;
        }
        step_results.push((step.clone(), result));

        if failed && step.on_failure == OnFailure::Abort {
            aborted = true;
            break;
        }
    }

    let mut rollback_results = Vec::new();
    if aborted && !runbook.rollback.is_empty() {
        for step in &runbook.rollback {
            let result = run_with_retry(transport, target, step).await?;
            rollback_results.push((step.clone(), result));
        }
    }

    let outcome = if !any_failure {
        RunbookOutcome::Success
    } else if aborted && !rollback_results.is_empty() {
        RunbookOutcome::Partial
    } else if any_failure {
        RunbookOutcome::Partial
    } else {
        RunbookOutcome::Failure
    };

    Ok(RunbookExecution {
        outcome,
        step_results,
        rollback_results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::truncate_output;
    use async_trait::async_trait;
    use haven_types::{AgentError, RemoteTransport as TargetTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedTransport {
        outcomes: Vec<StepOutcome>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteTransport for ScriptedTransport {
        async fn run_step(&self, _target: &RemoteTarget, _step: &Step) -> Result<StepResult, AgentError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.outcomes[idx.min(self.outcomes.len() - 1)];
            let (stdout, t1) = truncate_output("ok");
            Ok(StepResult {
                outcome,
                stdout,
                stderr: String::new(),
                exit_code: Some(if matches!(outcome, StepOutcome::Success) { 0 } else { 1 }),
                duration_ms: 5,
                stdout_truncated: t1,
                stderr_truncated: false,
            })
        }

        fn invalidate_session(&self, _target: &RemoteTarget) {}
    }

    fn target() -> RemoteTarget {
        RemoteTarget {
            host: "host-1".into(),
            port: 22,
            username: "svc".into(),
            secret: "key".into(),
            transport: TargetTransport::Ssh,
            domain: None,
            use_ssl: false,
        }
    }

    fn step(name: &str) -> Step {
        Step {
            name: name.into(),
            command_text: "true".into(),
            params: haven_types::Value::Null,
            timeout: None,
            max_retries: 0,
            on_failure: OnFailure::Abort,
        }
    }

    #[tokio::test]
    async fn all_steps_succeed() {
        let transport = ScriptedTransport {
            outcomes: vec![StepOutcome::Success, StepOutcome::Success],
            calls: AtomicUsize::new(0),
        };
        let runbook = Runbook {
            id: "r1".into(),
            steps: vec![step("a"), step("b")],
            rollback: Vec::new(),
        };
        let execution = run_runbook(&transport, &target(), &runbook).await.unwrap();
        assert_eq!(execution.outcome, RunbookOutcome::Success);
        assert_eq!(execution.step_results.len(), 2);
    }

    #[tokio::test]
    async fn failure_triggers_rollback_and_partial_outcome() {
        let transport = ScriptedTransport {
            outcomes: vec![StepOutcome::Success, StepOutcome::Failure, StepOutcome::Success],
            calls: AtomicUsize::new(0),
        };
        let runbook = Runbook {
            id: "r1".into(),
            steps: vec![step("a"), step("b")],
            rollback: vec![step("undo-a")],
        };
        let execution = run_runbook(&transport, &target(), &runbook).await.unwrap();
        assert_eq!(execution.outcome, RunbookOutcome::Partial);
        assert_eq!(execution.step_results.len(), 2);
        assert_eq!(execution.rollback_results.len(), 1);
    }
}
