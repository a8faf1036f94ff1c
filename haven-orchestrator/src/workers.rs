//! The worker pools that drive an [`AgentContext`] once it's built (spec
//! §5): a drift-sweep loop, the healer pool draining detected incidents, the
//! evidence-upload worker, the 24h learning-loop worker, and the
//! control-plane check-in worker. Every loop observes a shared
//! [`CancellationToken`] at the top of each iteration; [`WorkerHandles::join`]
//! gives every worker [`SHUTDOWN_GRACE`] to finish its in-flight work before
//! the caller gives up waiting.

use crate::context::AgentContext;
use crate::orchestrator::AutoHealer;
use chrono::Utc;
use haven_bastion::scrub_value;
use haven_control_plane::CheckinState;
use haven_drift::{builtin_checks, Check, CheckResult, CheckStatus, DetectionOutcome, DriftDetector, HostSnapshot};
use haven_evidence::{deliver_pending, SealInput, WormUploader};
use haven_telemetry::{EventBus, EventSeverity, TelemetryEvent};
use haven_types::clock::jittered;
use haven_types::{AgentError, EvidenceBundle, Incident, ScrubberStats, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HEALER_POOL_SIZE: usize = 3;
pub const INCIDENT_CHANNEL_CAPACITY: usize = 100;
pub const DEFAULT_DRIFT_POLL_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_EVIDENCE_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_LEARNING_LOOP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_CHECKIN_INTERVAL: Duration = Duration::from_secs(60);
pub const CHECKIN_JITTER_FRACTION: f64 = 0.10;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Everything the caller chooses at startup; left in one struct so
/// `haven-agent` has a single knob surface to populate from `AgentConfig`.
pub struct WorkerConfig {
    pub healer_pool_size: usize,
    pub drift_poll_interval: Duration,
    pub evidence_poll_interval: Duration,
    pub learning_loop_interval: Duration,
    pub checkin_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            healer_pool_size: DEFAULT_HEALER_POOL_SIZE,
            drift_poll_interval: DEFAULT_DRIFT_POLL_INTERVAL,
            evidence_poll_interval: DEFAULT_EVIDENCE_POLL_INTERVAL,
            learning_loop_interval: DEFAULT_LEARNING_LOOP_INTERVAL,
            checkin_interval: DEFAULT_CHECKIN_INTERVAL,
        }
    }
}

/// Join handles for every spawned worker task, returned by [`spawn_workers`].
pub struct WorkerHandles {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerHandles {
    /// Cancels `shutdown` (if not already) and waits up to [`SHUTDOWN_GRACE`]
    /// for every worker to return; anything still running past the deadline
    /// is abandoned rather than awaited forever.
    pub async fn join(self, shutdown: &CancellationToken) {
        shutdown.cancel();
        let all = futures_util::future::join_all(self.handles);
        if tokio::time::timeout(SHUTDOWN_GRACE, all).await.is_err() {
            tracing::warn!("workers did not finish within the shutdown grace period");
        }
    }
}

/// Builds the incident channel and spawns every worker pool. `uploader` is
/// injected rather than constructed here because its concrete type depends
/// on the configured [`haven_evidence::WormMode`] (spec §4.7), which is a
/// `haven-agent` concern.
pub fn spawn_workers(
    ctx: Arc<AgentContext>,
    uploader: Arc<dyn WormUploader>,
    host_id: String,
    config: WorkerConfig,
    shutdown: CancellationToken,
) -> WorkerHandles {
    let (incident_tx, incident_rx) = incident_channel();
    let mut handles = Vec::new();

    handles.push(tokio::spawn(run_drift_workers(
        ctx.clone(),
        incident_tx,
        config.drift_poll_interval,
        shutdown.clone(),
    )));

    for _ in 0..config.healer_pool_size.max(1) {
        handles.push(tokio::spawn(run_healer_worker(
            ctx.clone(),
            incident_rx.clone(),
            shutdown.clone(),
        )));
    }

    handles.push(tokio::spawn(run_evidence_upload_worker(
        ctx.clone(),
        uploader,
        config.evidence_poll_interval,
        shutdown.clone(),
    )));

    handles.push(tokio::spawn(run_learning_loop_worker(
        ctx.clone(),
        config.learning_loop_interval,
        shutdown.clone(),
    )));

    handles.push(tokio::spawn(run_checkin_worker(
        ctx,
        host_id,
        config.checkin_interval,
        shutdown,
    )));

    WorkerHandles { handles }
}

fn incident_channel() -> (mpsc::Sender<Incident>, Arc<Mutex<mpsc::Receiver<Incident>>>) {
    let (tx, rx) = mpsc::channel(INCIDENT_CHANNEL_CAPACITY);
    (tx, Arc::new(Mutex::new(rx)))
}

fn severity_for(status: CheckStatus) -> EventSeverity {
    match status {
        CheckStatus::Pass => EventSeverity::Debug,
        CheckStatus::Warn => EventSeverity::Warn,
        CheckStatus::Fail | CheckStatus::Error => EventSeverity::Error,
    }
}

/// Non-blocking send with drop-newest backpressure: if the healer pool can't
/// keep up and the channel is full, the incident that doesn't fit is the one
/// dropped, logged by its pattern signature so the operator can see what was
/// lost instead of it silently vanishing (spec §5).
async fn send_incident(tx: &mpsc::Sender<Incident>, incident: Incident, events: &Arc<EventBus>) {
    match tx.try_send(incident) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(incident)) => {
            events.emit(
                TelemetryEvent::new(
                    "drift_worker",
                    EventSeverity::Warn,
                    format!(
                        "incident channel saturated; dropping incident for pattern '{}'",
                        incident.pattern_signature
                    ),
                )
                .with_incident(incident.id),
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::error!("incident channel closed; healer pool is gone");
        }
    }
}

/// Sweeps every host the current credential cycle knows about (spec §5).
/// Re-reads `ctx.credentials.host_ids()` on every tick rather than holding a
/// long-lived task per host, since the managed-host set can change each time
/// the check-in worker replaces the credential store.
async fn run_drift_workers(
    ctx: Arc<AgentContext>,
    incident_tx: mpsc::Sender<Incident>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    let catalog: Arc<Vec<Box<dyn Check>>> = Arc::new(builtin_checks());
    let detector = Arc::new(DriftDetector::new());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
        if shutdown.is_cancelled() {
            break;
        }

        let host_ids = ctx.credentials.host_ids().await;
        let mut set = tokio::task::JoinSet::new();
        for host_id in host_ids {
            set.spawn(sweep_host(ctx.clone(), detector.clone(), catalog.clone(), host_id, incident_tx.clone()));
        }
        while set.join_next().await.is_some() {}
    }
}

async fn sweep_host(
    ctx: Arc<AgentContext>,
    detector: Arc<DriftDetector>,
    catalog: Arc<Vec<Box<dyn Check>>>,
    host_id: String,
    incident_tx: mpsc::Sender<Incident>,
) {
    let Some(target) = ctx.credentials.get(&host_id).await else {
        return;
    };

    let snapshot = match crate::snapshot_collector::collect_snapshot(&ctx.transport, &target, &ctx.site_id, &host_id).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(host_id, "drift snapshot collection failed: {e}");
            ctx.events.emit(TelemetryEvent::new(
                "drift_worker",
                EventSeverity::Warn,
                format!("snapshot collection failed for host {host_id}: {e}"),
            ));
            return;
        }
    };

    for (result, outcome) in detector.run_checks(&ctx.site_id, &catalog, &snapshot) {
        if result.status != CheckStatus::Pass {
            ctx.events.emit(TelemetryEvent::new(
                "drift_worker",
                severity_for(result.status),
                format!("check '{}' on host {host_id} reported {:?}", result.name, result.status),
            ));
        }
        seal_check_evidence(&ctx, &snapshot, &result);
        if let DetectionOutcome::Opened(incident) = outcome {
            send_incident(&incident_tx, incident, &ctx.events).await;
        }
    }
}

/// Seals a check-level evidence bundle for every drift check that runs, not
/// just the ones that open an incident (spec §4.7: "turn every check ...
/// into a signed, chained, shippable artifact"). `pre_state` is the
/// PHI-scrubbed snapshot facts the check read; `post_state` is the check's
/// own (already scrubbed) result.
fn seal_check_evidence(ctx: &AgentContext, snapshot: &HostSnapshot, result: &CheckResult) {
    let (scrubbed_facts, report) = scrub_value(&snapshot.facts);
    let post_state = Value::Map(
        [
            ("status".to_string(), Value::from(format!("{:?}", result.status).to_lowercase())),
            ("severity".to_string(), Value::from(result.severity.to_string())),
            ("details".to_string(), result.details.clone()),
        ]
        .into_iter()
        .collect(),
    );

    let input = SealInput {
        site_id: snapshot.site_id.clone(),
        host_id: snapshot.host_id.clone(),
        check_or_runbook_id: result.name.to_string(),
        outcome: format!("{:?}", result.status).to_lowercase(),
        hipaa_controls: Vec::new(),
        pre_state: scrubbed_facts,
        post_state,
        actions: Vec::new(),
        phi_scrubbed: true,
        scrubber_stats: Some(ScrubberStats {
            categories_triggered: report.categories_triggered,
            redaction_count: report.redaction_count as u64,
        }),
    };
    if let Err(e) = ctx.evidence.seal(input) {
        tracing::error!(host_id = %snapshot.host_id, check = result.name, "failed to seal check evidence bundle: {e}");
    }
}

/// Drains the shared incident channel and runs each one through
/// [`AutoHealer::heal`]. Multiple copies of this loop are spawned to form
/// the healer pool (spec §5); they compete for the same `mpsc::Receiver`
/// behind a mutex, holding the lock only while waiting for or taking the
/// next item so the others aren't blocked while one is actually healing.
async fn run_healer_worker(ctx: Arc<AgentContext>, rx: Arc<Mutex<mpsc::Receiver<Incident>>>, shutdown: CancellationToken) {
    let healer = AutoHealer::new(ctx);
    loop {
        let incident = {
            let mut guard = rx.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                maybe = guard.recv() => maybe,
            }
        };
        match incident {
            Some(incident) => {
                healer.heal(incident).await;
            }
            None => break,
        }
    }
}

/// Periodically drains the evidence registry's pending bundles through the
/// configured [`WormUploader`] (spec §4.7, §5). `load_bundle` reconstructs
/// the bundle's on-disk path straight from its `EB-YYYYMMDD-NNNN` id rather
/// than keeping a separate date index.
async fn run_evidence_upload_worker(
    ctx: Arc<AgentContext>,
    uploader: Arc<dyn WormUploader>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
        if shutdown.is_cancelled() {
            break;
        }

        let state_dir = ctx.state_dir.clone();
        let load_bundle = move |bundle_id: &str| load_bundle_from_disk(&state_dir, bundle_id);
        if let Err(e) = deliver_pending(uploader.as_ref(), ctx.evidence.registry(), load_bundle).await {
            tracing::error!("evidence delivery cycle failed: {e}");
        }

        // Each cycle also re-verifies the chain end-to-end so external
        // tampering with a sealed bundle is caught promptly rather than
        // only at the next process restart (spec §7, scenario S5).
        if let Err(e) = ctx.evidence.verify_chain() {
            tracing::error!("hash chain integrity check failed: {e}");
        }
    }
}

fn load_bundle_from_disk(state_dir: &Path, bundle_id: &str) -> Result<(EvidenceBundle, Vec<u8>), AgentError> {
    let malformed = || AgentError::StoreCorruption {
        message: format!("malformed evidence bundle id: {bundle_id}"),
    };
    let date_part = bundle_id.strip_prefix("EB-").and_then(|rest| rest.split('-').next()).ok_or_else(malformed)?;
    if date_part.len() != 8 {
        return Err(malformed());
    }
    let (year, rest) = date_part.split_at(4);
    let (month, day) = rest.split_at(2);

    let path = state_dir
        .join("evidence")
        .join(year)
        .join(month)
        .join(day)
        .join(format!("{bundle_id}.json"));
    let json_bytes = std::fs::read(&path).map_err(|e| AgentError::StoreCorruption {
        message: format!("cannot read evidence bundle {bundle_id}: {e}"),
    })?;
    let bundle: EvidenceBundle = serde_json::from_slice(&json_bytes).map_err(|e| AgentError::StoreCorruption {
        message: format!("corrupt evidence bundle {bundle_id}: {e}"),
    })?;
    Ok((bundle, json_bytes))
}

/// 24h-cadence promotion pass (spec §4.10, §5): scores every promotion
/// candidate, writes and hot-reloads newly promoted rules, and queues
/// below-threshold candidates for operator review.
async fn run_learning_loop_worker(ctx: Arc<AgentContext>, poll_interval: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
        if shutdown.is_cancelled() {
            break;
        }

        let candidates = match ctx.store.promotion_candidates().await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("learning loop: promotion candidate query failed: {e}");
                continue;
            }
        };

        for stats in candidates {
            let now = ctx.clock.now_utc();
            let rule_id = format!("promoted-{}", stats.pattern_signature);
            match haven_store::decide_promotion(&stats, now, &ctx.promotion_policy, rule_id.clone()) {
                haven_store::PromotionDecision::Promote { rule, confidence } => {
                    if let Err(e) = haven_l1::write_promoted_rule(&ctx.rules_dir, &rule) {
                        tracing::error!(pattern_signature = %stats.pattern_signature, "failed to write promoted rule: {e}");
                        continue;
                    }
                    match ctx.reload_l1_engine().await {
                        Ok(()) => {
                            ctx.events.emit(TelemetryEvent::new(
                                "learning_loop",
                                EventSeverity::Info,
                                format!("promoted rule {rule_id} (confidence {confidence:.2})"),
                            ));
                        }
                        Err(e) => tracing::error!("failed to reload L1 engine after promotion: {e}"),
                    }
                }
                haven_store::PromotionDecision::ReviewQueue { confidence } => {
                    let action = stats.dominant_action().unwrap_or("escalate").to_string();
                    if let Err(e) = ctx.store.queue_for_review(&stats.pattern_signature, confidence, &action).await {
                        tracing::error!("failed to queue pattern for review: {e}");
                    }
                }
                haven_store::PromotionDecision::NotEligible => {}
            }
        }
    }
}

/// Check-in cycle on a jittered ~60s cadence (spec §4.11, §6): refreshes the
/// ephemeral credential set, and executes any verified operator orders
/// directly through [`AutoHealer::execute_order`]. A deployment with no
/// control plane configured (standalone mode) leaves this worker idle.
async fn run_checkin_worker(ctx: Arc<AgentContext>, host_id: String, base_interval: Duration, shutdown: CancellationToken) {
    let Some(control_plane) = ctx.control_plane.as_ref() else {
        tracing::info!("no control plane configured; check-in worker idle");
        return;
    };
    let healer = AutoHealer::new(ctx.clone());
    let mut rng = rand::rng();

    loop {
        let interval = jittered(base_interval, CHECKIN_JITTER_FRACTION, &mut rng);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if shutdown.is_cancelled() {
            break;
        }

        let state = CheckinState {
            site_id: ctx.site_id.clone(),
            host_id: host_id.clone(),
            current_config_hash: None,
            cycle_at: Utc::now(),
        };

        let response = match control_plane.checkin(state).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("control-plane checkin failed: {e}");
                continue;
            }
        };

        let credentials = response
            .credentials
            .into_iter()
            .map(|target| (target.host.clone(), target))
            .collect();
        ctx.credentials.replace_all(credentials).await;

        for order in &response.orders {
            let resolution = healer.execute_order(order).await;
            tracing::info!(order_id = %order.order_id, outcome = ?resolution.outcome, "processed operator order");
        }
    }
}
