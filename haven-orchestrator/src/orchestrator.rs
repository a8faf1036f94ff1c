//! The auto-healer state machine (spec §4.1): `l1_eval -> guard -> execute
//! -> verify -> record`, falling through to `l2_plan` on an L1 miss and to
//! `escalate` whenever a guardrail blocks the action, a tier's own budget is
//! exhausted, or L2 asks for a human. Every path ends in a persisted
//! [`Resolution`] and a best-effort telemetry report; nothing here ever
//! panics on a downstream failure — the incident still needs a recorded
//! outcome even if a sink along the way misbehaves.

use crate::context::AgentContext;
use chrono::Utc;
use haven_bastion::{scrub_value, ProposedAction, StageOutcome};
use haven_control_plane::{ExecutionReport, ExecutionTelemetry};
use haven_evidence::SealInput;
use haven_executor::{run_runbook, OnFailure, Runbook, RunbookOutcome, Step};
use haven_l3::{EscalationReason, EscalationTicket, PriorAttempt};
use haven_queue::QueueItemKind;
use haven_store::WatchOutcome;
use haven_types::{
    ActionRecord, AgentError, Incident, Order, Outcome, Resolution, ResolutionLevel, Rule, RuleSource,
    ScrubberStats, Severity, Value,
};
use std::sync::Arc;
use std::time::Instant;

/// Drives a single incident to resolution against a shared [`AgentContext`].
/// Cheap to construct per incident — it's a thin wrapper around the `Arc`
/// the healer worker pool already holds.
pub struct AutoHealer {
    ctx: Arc<AgentContext>,
}

impl AutoHealer {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }

    /// Runs the full pipeline for `incident` and returns its resolution.
    /// Persists the incident and its resolution to the store, and reports
    /// execution telemetry to the control plane (or queues it for later if
    /// that report fails or no control plane is configured). Never returns
    /// an error: every failure mode along the way resolves to a recorded
    /// `Resolution`, escalating to a human when the pipeline itself can't
    /// decide what to do.
    pub async fn heal(&self, incident: Incident) -> Resolution {
        if let Err(e) = self.ctx.store.record_incident(&incident).await {
            tracing::error!(incident_id = %incident.id, "failed to persist incident: {e}");
        }

        let started = Instant::now();
        let resolution = self.run(&incident, started).await;

        if let Err(e) = self.ctx.store.update_resolution(&incident.id, &resolution).await {
            tracing::error!(incident_id = %incident.id, "failed to persist resolution: {e}");
        }
        self.report_telemetry(&incident, &resolution).await;
        resolution
    }

    async fn run(&self, incident: &Incident, started: Instant) -> Resolution {
        let l1 = self.ctx.l1_engine().await;
        if let Some((rule, _matched_value)) = l1.match_incident(incident) {
            let rule = rule.clone();
            let resolution = self
                .guard_and_execute(
                    incident,
                    ResolutionLevel::L1,
                    &rule.action,
                    rule.action_params.clone(),
                    None,
                    rule.hipaa_controls.clone(),
                    None,
                    started,
                )
                .await;
            if !matches!(resolution.outcome, Outcome::Escalated) {
                l1.record_fired(&rule.id, &incident.host_id);
                if rule.source == RuleSource::Promoted {
                    self.watch_promoted_rule(&rule, &resolution).await;
                }
            }
            return resolution;
        }

        self.plan_and_execute(incident, started).await
    }

    /// Feeds a promoted rule's outcome into its post-promotion watch window
    /// and, if the window just closed below `rollback_on_failure_rate`,
    /// disables the rule on disk and reloads the engine so the pattern falls
    /// back to L2 (spec §4.10).
    async fn watch_promoted_rule(&self, rule: &Rule, resolution: &Resolution) {
        let success = matches!(resolution.outcome, Outcome::Success);
        let outcome = self
            .ctx
            .promotion_watcher
            .record_outcome(&rule.id, success, &self.ctx.promotion_policy);
        let WatchOutcome::WindowComplete { should_rollback, success_rate } = outcome else {
            return;
        };
        if !should_rollback {
            return;
        }

        tracing::warn!(rule_id = %rule.id, success_rate, "post-promotion watch window failed, disabling rule");
        let mut disabled = rule.clone();
        disabled.enabled = false;
        if let Err(e) = haven_l1::write_promoted_rule(&self.ctx.rules_dir, &disabled) {
            tracing::error!(rule_id = %rule.id, "failed to disable rolled-back rule: {e}");
            return;
        }
        if let Err(e) = self.ctx.reload_l1_engine().await {
            tracing::error!(rule_id = %rule.id, "failed to reload L1 engine after rollback: {e}");
        }
    }

    /// Executes a signed, TTL-verified operator [`Order`] directly, bypassing
    /// L1/L2 selection — the control plane has already decided the action,
    /// so the pipeline's only job is to guard, run, and record it (spec §3,
    /// §4.11). Runs at [`ResolutionLevel::L3`] since an order is, by
    /// construction, a human- or control-plane-directed decision rather than
    /// one the agent made itself.
    pub async fn execute_order(&self, order: &Order) -> Resolution {
        let started = Instant::now();
        let host_id = order
            .params
            .get_path("host_id")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.ctx.site_id)
            .to_string();
        let incident = Incident::new(
            format!("order-{}", order.order_id),
            self.ctx.site_id.clone(),
            host_id,
            "operator_order",
            Severity::Medium,
            chrono::Utc::now(),
            order.params.clone(),
        );

        if let Err(e) = self.ctx.store.record_incident(&incident).await {
            tracing::error!(order_id = %order.order_id, "failed to persist operator-order incident: {e}");
        }

        let resolution = self
            .guard_and_execute(
                &incident,
                ResolutionLevel::L3,
                &order.action,
                order.params.clone(),
                None,
                Vec::new(),
                Some(format!("operator order {}", order.order_id)),
                started,
            )
            .await;

        if let Err(e) = self.ctx.store.update_resolution(&incident.id, &resolution).await {
            tracing::error!(order_id = %order.order_id, "failed to persist operator-order resolution: {e}");
        }
        self.report_telemetry(&incident, &resolution).await;
        resolution
    }

    async fn plan_and_execute(&self, incident: &Incident, started: Instant) -> Resolution {
        let pattern_context = match self.ctx.store.get_pattern_context(&incident.pattern_signature).await {
            Ok(pc) => serde_json::to_value(&pc).ok().map(Value::from_json),
            Err(e) => {
                tracing::warn!(incident_id = %incident.id, "pattern context lookup failed, planning without it: {e}");
                None
            }
        };

        let decision = match self.ctx.l2.plan(&incident.site_id, incident, pattern_context).await {
            Ok(decision) => decision,
            Err(AgentError::BudgetExhausted { reason }) => {
                return self
                    .escalate(incident, ResolutionLevel::L2, EscalationReason::L2BudgetExhausted, vec![], Some(reason), started)
                    .await;
            }
            Err(e) => {
                return self
                    .escalate(
                        incident,
                        ResolutionLevel::L2,
                        EscalationReason::L2TransportFailure { detail: e.to_string() },
                        vec![],
                        Some(e.to_string()),
                        started,
                    )
                    .await;
            }
        };

        if decision.escalate_to_l3 || decision.requires_approval {
            let reason = l2_escalation_reason(&decision, &self.ctx);
            return self
                .escalate(incident, ResolutionLevel::L2, reason, vec![], Some(decision.reasoning.clone()), started)
                .await;
        }

        self.guard_and_execute(
            incident,
            ResolutionLevel::L2,
            &decision.action,
            decision.action_params.clone(),
            decision.runbook_id.as_deref(),
            Vec::new(),
            Some(decision.reasoning.clone()),
            started,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn guard_and_execute(
        &self,
        incident: &Incident,
        level: ResolutionLevel,
        action: &str,
        action_params: Value,
        runbook_id: Option<&str>,
        hipaa_controls: Vec<String>,
        reasoning: Option<String>,
        started: Instant,
    ) -> Resolution {
        let runbook = match resolve_runbook(&self.ctx, action, &action_params, runbook_id) {
            Ok(rb) => rb,
            Err(e) => {
                return self
                    .escalate(
                        incident,
                        level,
                        EscalationReason::L2TransportFailure { detail: e.to_string() },
                        hipaa_controls,
                        reasoning,
                        started,
                    )
                    .await;
            }
        };

        let command_text = runbook
            .steps
            .iter()
            .map(|s| s.command_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let proposal = ProposedAction {
            site_id: incident.site_id.clone(),
            host_id: incident.host_id.clone(),
            action: action.to_string(),
            command_text,
            estimated_cost_usd: 0.0,
        };

        let maintenance_windows = self.ctx.maintenance_windows_snapshot().await;
        match self.ctx.guardrails.evaluate(&proposal, &maintenance_windows) {
            StageOutcome::Allow => {}
            StageOutcome::Block { stage, reason } | StageOutcome::Escalate { stage, reason } => {
                let escalation_reason = guardrail_escalation_reason(stage, &reason, action);
                return self
                    .escalate(incident, level, escalation_reason, hipaa_controls, reasoning, started)
                    .await;
            }
            StageOutcome::WaitAndRetry { stage, retry_after } => {
                let resolution = Resolution::new(
                    incident.id.clone(),
                    level,
                    action.to_string(),
                    action_params,
                    Outcome::Blocked,
                    started.elapsed().as_millis() as u64,
                    Utc::now(),
                )
                .with_error(format!("blocked at guardrail stage '{stage}', retry after {retry_after:?}"));
                self.seal_evidence_with_actions(incident, action, &resolution, hipaa_controls, Vec::new());
                return resolution;
            }
        }

        if let Err(denial) = self.ctx.guardrails.commit(&proposal) {
            return self
                .escalate(
                    incident,
                    level,
                    EscalationReason::L2BudgetExhausted,
                    hipaa_controls,
                    Some(format!("{denial:?}")),
                    started,
                )
                .await;
        }

        let (outcome, action_record) = if self.ctx.dry_run {
            tracing::info!(incident_id = %incident.id, action, "dry run: skipping execution");
            (
                RunbookOutcome::Success,
                ActionRecord {
                    action: action.to_string(),
                    params: action_params.clone(),
                    script_hash: haven_bastion::content_hash(proposal.command_text.as_bytes()),
                    outcome: "dry_run".to_string(),
                    stdout_truncated: false,
                    stderr_truncated: false,
                },
            )
        } else {
            let target = match self.ctx.credentials.get(&incident.host_id).await {
                Some(t) => t,
                None => {
                    self.ctx.guardrails.release(&proposal, 0.0);
                    return self
                        .escalate(
                            incident,
                            level,
                            EscalationReason::L2TransportFailure {
                                detail: format!("no credentials available for host '{}'", incident.host_id),
                            },
                            hipaa_controls,
                            reasoning,
                            started,
                        )
                        .await;
                }
            };

            match run_runbook(self.ctx.transport.as_ref(), &target, &runbook).await {
                Ok(execution) => {
                    self.ctx.guardrails.release(&proposal, proposal.estimated_cost_usd);
                    let record = ActionRecord {
                        action: action.to_string(),
                        params: action_params.clone(),
                        script_hash: haven_bastion::content_hash(proposal.command_text.as_bytes()),
                        outcome: format!("{:?}", execution.outcome),
                        stdout_truncated: execution.step_results.iter().any(|(_, r)| r.stdout_truncated),
                        stderr_truncated: execution.step_results.iter().any(|(_, r)| r.stderr_truncated),
                    };
                    (execution.outcome, record)
                }
                Err(e) => {
                    self.ctx.guardrails.release(&proposal, 0.0);
                    return self
                        .escalate(
                            incident,
                            level,
                            EscalationReason::L2TransportFailure { detail: e.to_string() },
                            hipaa_controls,
                            reasoning,
                            started,
                        )
                        .await;
                }
            }
        };

        let resolution = Resolution::new(
            incident.id.clone(),
            level,
            action.to_string(),
            action_params,
            map_outcome(outcome),
            started.elapsed().as_millis() as u64,
            Utc::now(),
        );
        let resolution = match &reasoning {
            Some(r) => resolution.with_reasoning(r.clone()),
            None => resolution,
        };

        self.seal_evidence(incident, &runbook.id, &resolution, hipaa_controls, action_record);
        resolution
    }

    fn seal_evidence(
        &self,
        incident: &Incident,
        check_or_runbook_id: &str,
        resolution: &Resolution,
        hipaa_controls: Vec<String>,
        action_record: ActionRecord,
    ) {
        self.seal_evidence_with_actions(incident, check_or_runbook_id, resolution, hipaa_controls, vec![action_record]);
    }

    /// Seals an evidence bundle for `resolution` regardless of how the
    /// incident was resolved (spec §4.7: "evidence for every check and
    /// remediation" — escalations and blocks are remediations too, not just
    /// successful runbook executions).
    fn seal_evidence_with_actions(
        &self,
        incident: &Incident,
        check_or_runbook_id: &str,
        resolution: &Resolution,
        hipaa_controls: Vec<String>,
        actions: Vec<ActionRecord>,
    ) {
        let (scrubbed_raw, report) = scrub_value(&incident.raw_data);
        let input = SealInput {
            site_id: incident.site_id.clone(),
            host_id: incident.host_id.clone(),
            check_or_runbook_id: check_or_runbook_id.to_string(),
            outcome: format!("{:?}", resolution.outcome),
            hipaa_controls,
            pre_state: scrubbed_raw,
            post_state: Value::Null,
            actions,
            phi_scrubbed: true,
            scrubber_stats: Some(ScrubberStats {
                categories_triggered: report.categories_triggered,
                redaction_count: report.redaction_count as u64,
            }),
        };
        if let Err(e) = self.ctx.evidence.seal(input) {
            tracing::error!(incident_id = %incident.id, "failed to seal evidence bundle: {e}");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn escalate(
        &self,
        incident: &Incident,
        level: ResolutionLevel,
        reason: EscalationReason,
        hipaa_controls: Vec<String>,
        reasoning: Option<String>,
        started: Instant,
    ) -> Resolution {
        let (scrubbed_raw, _report) = scrub_value(&incident.raw_data);
        let occurrences = self
            .ctx
            .store
            .pattern_stats(&incident.pattern_signature)
            .await
            .ok()
            .flatten()
            .map(|s| s.occurrences);

        let mut ticket = EscalationTicket::new(incident, scrubbed_raw, reason, hipaa_controls.clone());
        if reasoning.is_some() {
            ticket = ticket.with_prior_attempt(PriorAttempt {
                resolution_level: resolution_level_label(level).to_string(),
                action: None,
                reasoning: reasoning.clone(),
            });
        }
        if let Some(occurrences) = occurrences {
            ticket = ticket.with_pattern_occurrences(occurrences);
        }

        let outcome = self.ctx.escalator.escalate(incident, ticket).await;
        if !outcome.failed.is_empty() {
            tracing::warn!(incident_id = %incident.id, failed = ?outcome.failed, "some escalation channels failed");
        }

        let resolution = Resolution::new(
            incident.id.clone(),
            level,
            "escalate".to_string(),
            Value::Null,
            Outcome::Escalated,
            started.elapsed().as_millis() as u64,
            Utc::now(),
        );
        let resolution = match &reasoning {
            Some(r) => resolution.with_reasoning(r.clone()),
            None => resolution,
        };

        self.seal_evidence_with_actions(incident, "escalate", &resolution, hipaa_controls, Vec::new());
        resolution
    }

    async fn report_telemetry(&self, incident: &Incident, resolution: &Resolution) {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let mut telemetry = ExecutionTelemetry::from_resolution(execution_id, incident.host_id.clone(), resolution);
        telemetry.incident_type = incident.incident_type.as_str().to_string();
        telemetry.pattern_signature = Some(incident.pattern_signature.clone());

        let report = ExecutionReport {
            site_id: self.ctx.site_id.clone(),
            execution: telemetry,
            reported_at: Utc::now(),
        };

        let delivered = match &self.ctx.control_plane {
            Some(cp) => match cp.report_execution(&report).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(incident_id = %incident.id, "execution telemetry report failed: {e}");
                    false
                }
            },
            None => false,
        };

        if !delivered {
            match serde_json::to_string(&report) {
                Ok(payload) => {
                    if let Err(e) = self.ctx.queue.enqueue(QueueItemKind::Telemetry, &payload).await {
                        tracing::error!(incident_id = %incident.id, "failed to queue execution telemetry: {e}");
                    }
                }
                Err(e) => tracing::error!(incident_id = %incident.id, "failed to serialize execution telemetry: {e}"),
            }
        }
    }
}

fn resolution_level_label(level: ResolutionLevel) -> &'static str {
    match level {
        ResolutionLevel::L1 => "l1",
        ResolutionLevel::L2 => "l2",
        ResolutionLevel::L3 => "l3",
    }
}

fn map_outcome(outcome: RunbookOutcome) -> Outcome {
    match outcome {
        RunbookOutcome::Success => Outcome::Success,
        RunbookOutcome::Partial => Outcome::Partial,
        RunbookOutcome::Failure => Outcome::Failure,
    }
}

/// Maps a decision the L2 planner already flagged for escalation onto the
/// most specific [`EscalationReason`] the available fields support.
fn l2_escalation_reason(decision: &haven_l2::Decision, ctx: &AgentContext) -> EscalationReason {
    if decision.action.eq_ignore_ascii_case("escalate") {
        EscalationReason::ExplicitEscalateAction
    } else if decision.confidence < haven_l2::CONFIDENCE_ESCALATION_THRESHOLD {
        EscalationReason::L2LowConfidence { confidence: decision.confidence }
    } else if !ctx.allowlist.allows(&decision.action) {
        EscalationReason::L2ActionNotAllowlisted { action: decision.action.clone() }
    } else {
        EscalationReason::L2DangerousAction
    }
}

/// Maps a guardrail stage's block/escalate outcome onto the closest
/// [`EscalationReason`] variant. The reason enum predates this pipeline's
/// use by L1 actions and is labeled for L2 call sites; stages with no
/// closer match (maintenance window, cooldown-as-escalate) fall back to
/// `L2TransportFailure`'s free-form detail string rather than growing the
/// enum for a single extra case.
fn guardrail_escalation_reason(stage: &'static str, reason: &str, action: &str) -> EscalationReason {
    match stage {
        "allowlist" => EscalationReason::L2ActionNotAllowlisted { action: action.to_string() },
        "dangerous_pattern" => EscalationReason::L2DangerousAction,
        "budget" => EscalationReason::L2BudgetExhausted,
        _ => EscalationReason::L2TransportFailure { detail: reason.to_string() },
    }
}

fn resolve_runbook(
    ctx: &AgentContext,
    action: &str,
    action_params: &Value,
    runbook_id: Option<&str>,
) -> Result<Runbook, AgentError> {
    if let Some(rb) = ctx.runbooks.get(action) {
        return Ok(rb.clone());
    }
    if let Some(id) = runbook_id {
        if let Some(rb) = ctx.runbooks.get(id) {
            return Ok(rb.clone());
        }
    }
    if let Some(script) = action_params.get_path("script").and_then(|v| v.as_str()) {
        return Ok(Runbook {
            id: format!("adhoc-{action}"),
            steps: vec![Step {
                name: action.to_string(),
                command_text: script.to_string(),
                params: action_params.clone(),
                timeout: None,
                max_retries: haven_executor::DEFAULT_MAX_RETRIES,
                on_failure: OnFailure::Abort,
            }],
            rollback: Vec::new(),
        });
    }
    Err(AgentError::ValidationFailed {
        reason: format!("no runbook, explicit runbook_id, or inline script available for action '{action}'"),
    })
}
