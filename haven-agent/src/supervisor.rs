//! Builds every component from an [`AgentConfig`], spawns the worker pools,
//! and owns the process lifetime: signal handling, the shutdown grace
//! period, and the one-shot/continuous split of spec §5, §6.

use crate::config::AgentConfig;
use crate::transport::DispatchTransport;
use async_trait::async_trait;
use haven_bastion::{load_guardrail_config, GuardrailPipeline, Signer};
use haven_control_plane::{ClientConfig, ControlPlaneClient};
use haven_evidence::{DirectUploadConfig, DirectUploader, EvidenceGenerator, WormUploader};
use haven_executor::RemoteTransport;
use haven_l1::L1Engine;
use haven_l2::{L2Planner, PlanBackend, PlanRequest};
use haven_l3::Escalator;
use haven_orchestrator::{spawn_workers, AgentContext, CredentialStore, RunbookCatalog, WorkerConfig};
use haven_queue::OfflineQueue;
use haven_store::{IncidentStore, PromotionPolicy, PromotionWatcher};
use haven_telemetry::{EventBus, EventSeverity, EventSink, RingBufferSink, TelemetryEvent, TracingSink};
use haven_types::{AgentError, Clock, SystemClock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

const RING_BUFFER_CAPACITY: usize = 256;

pub struct RunOutcome {
    pub exit_code: i32,
}

/// Installs a `tracing-subscriber` fmt layer filtered by `--log-level`/
/// `LOG_LEVEL`, honoring `RUST_LOG` if set (spec §6, SPEC_FULL §1.1).
pub fn init_tracing(log_level: crate::cli::LogLevelArg) {
    let default_directive = match log_level {
        crate::cli::LogLevelArg::Debug => "debug",
        crate::cli::LogLevelArg::Info => "info",
        crate::cli::LogLevelArg::Warn => "warn",
        crate::cli::LogLevelArg::Error => "error",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// A PHI-scrubbed incident can still reach L2 even when no control plane is
/// configured (standalone deployments); since L2 has nowhere to send the
/// plan request, it fails immediately and the orchestrator's guardrail
/// fallback routes the incident to L3 instead.
struct NoControlPlaneBackend;

#[async_trait]
impl PlanBackend for NoControlPlaneBackend {
    async fn plan(&self, _request: &PlanRequest) -> Result<String, AgentError> {
        Err(AgentError::TransportPermanent {
            message: "no control plane configured; L2 planning is unavailable".to_string(),
        })
    }
}

/// Sets a flag the first time an `Error`/`Alert` event crosses the bus —
/// the one-shot mode's source for exit code 10 (spec §6 "cycle completed
/// with failures").
struct FailureTrackingSink {
    failed: Arc<AtomicBool>,
}

impl EventSink for FailureTrackingSink {
    fn name(&self) -> &str {
        "failure_tracking"
    }

    fn handle(&self, event: &TelemetryEvent) {
        if matches!(event.severity, EventSeverity::Error | EventSeverity::Alert) {
            self.failed.store(true, Ordering::SeqCst);
        }
    }
}

fn read_order_verify_key(path: &Path) -> Result<Vec<u8>, AgentError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AgentError::crypto_unavailable(format!("cannot read order verify key {}: {e}", path.display())))?;
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, raw.trim())
        .map_err(|e| AgentError::crypto_unavailable(format!("order verify key {} is not valid base64: {e}", path.display())))
}

async fn build_worm_uploader(
    config: &AgentConfig,
    proxy_client: Option<&ControlPlaneClient>,
) -> Result<Arc<dyn WormUploader>, AgentError> {
    match config.worm_mode {
        crate::cli::WormModeArg::Proxy => {
            let client = proxy_client.ok_or_else(|| {
                AgentError::configuration("WORM_MODE=proxy requires a control plane")
            })?;
            Ok(Arc::new(client.proxy_uploader()))
        }
        crate::cli::WormModeArg::Direct => {
            let bucket = config
                .worm_s3_bucket
                .clone()
                .ok_or_else(|| AgentError::configuration("WORM_S3_BUCKET is required for direct WORM mode"))?;
            let region = config
                .worm_s3_region
                .clone()
                .ok_or_else(|| AgentError::configuration("WORM_S3_REGION is required for direct WORM mode"))?;
            let direct_config = DirectUploadConfig {
                bucket,
                region: region.clone(),
                retention_days: config.worm_retention_days,
            };
            direct_config.validate()?;

            let aws_region = aws_config::Region::new(region);
            let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_region)
                .load()
                .await;
            let s3_client = aws_sdk_s3::Client::new(&shared_config);
            Ok(Arc::new(DirectUploader::new(s3_client, direct_config)?))
        }
    }
}

/// Builds every long-lived component, spawns the worker pools, waits for a
/// shutdown signal (or, in `--one-shot`, one poll interval), and returns the
/// exit code the supervisor should use.
pub async fn run(config: AgentConfig) -> Result<RunOutcome, AgentError> {
    std::fs::create_dir_all(&config.state_dir)
        .map_err(|e| AgentError::configuration(format!("cannot create state dir {}: {e}", config.state_dir.display())))?;
    std::fs::create_dir_all(&config.rules_dir)
        .map_err(|e| AgentError::configuration(format!("cannot create rules dir {}: {e}", config.rules_dir.display())))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let signing_key_path = config
        .signing_key
        .as_ref()
        .ok_or_else(|| AgentError::crypto_unavailable("--signing-key is required"))?;
    let pkcs8 = std::fs::read(signing_key_path)
        .map_err(|e| AgentError::crypto_unavailable(format!("cannot read signing key {}: {e}", signing_key_path.display())))?;
    let signer = Signer::from_pkcs8(&pkcs8)?;

    let failed_flag = Arc::new(AtomicBool::new(false));
    let events = Arc::new(
        EventBus::new()
            .with_sink(Arc::new(TracingSink))
            .with_sink(Arc::new(RingBufferSink::new(RING_BUFFER_CAPACITY)))
            .with_sink(Arc::new(FailureTrackingSink { failed: failed_flag.clone() })),
    );

    let evidence = EvidenceGenerator::open(&config.state_dir, signer, events.clone())?;
    if let Err(e) = evidence.verify_chain() {
        tracing::error!(error = %e, "hash chain integrity check failed at startup");
    }

    let resolved_guardrail = load_guardrail_config(config.guardrail_config.as_deref())?;
    let l1_allowlist = resolved_guardrail.allowlist.clone();
    let l2_allowlist = resolved_guardrail.allowlist.clone();

    let rules = haven_l1::load_rules(&config.rules_dir, &l1_allowlist)?;
    let l1 = L1Engine::new(rules, clock.clone());

    let runbooks = RunbookCatalog::load(&config.rules_dir)?;

    let guardrails = GuardrailPipeline::new(
        resolved_guardrail.allowlist,
        resolved_guardrail.budget_limits,
        resolved_guardrail.cooldown,
        resolved_guardrail.maintenance,
        clock.clone(),
    );

    let general_http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| AgentError::configuration(format!("failed to build HTTP client: {e}")))?;

    let control_plane = match config.mcp_url.as_ref() {
        Some(base_url) => {
            let cert_path = config
                .client_cert
                .as_ref()
                .ok_or_else(|| AgentError::configuration("--client-cert is required when --mcp-url is set"))?;
            let key_path = config
                .client_key
                .as_ref()
                .ok_or_else(|| AgentError::configuration("--client-key is required when --mcp-url is set"))?;
            let verify_key_path = config
                .order_verify_key
                .as_ref()
                .ok_or_else(|| AgentError::configuration("--order-verify-key is required when --mcp-url is set"))?;
            let order_verify_key = read_order_verify_key(verify_key_path)?;
            let bearer_token = config.mcp_api_key.clone().unwrap_or_default();

            let client_config = ClientConfig::from_files(base_url.clone(), bearer_token.clone(), cert_path, key_path, order_verify_key.clone())?;
            let mtls_client = client_config.build_client()?;
            Some(Arc::new(ControlPlaneClient::new(mtls_client, base_url.clone(), bearer_token, order_verify_key)))
        }
        None => None,
    };

    let l2_backend: Arc<dyn PlanBackend> = match control_plane.as_ref() {
        Some(cp) => cp.clone(),
        None => Arc::new(NoControlPlaneBackend),
    };
    let l2_budget = haven_bastion::BudgetTracker::new(haven_bastion::BudgetLimits::default(), clock.clone());
    let l2 = L2Planner::new(l2_backend, l2_budget, l2_allowlist);

    let escalator = Escalator::new();

    let store = IncidentStore::open(&config.state_dir.join("incidents.db")).await?;
    let queue = OfflineQueue::open(&config.state_dir.join("queue.db")).await?;

    let transport: Arc<dyn RemoteTransport> = Arc::new(DispatchTransport::new(general_http_client));

    let ctx = Arc::new(AgentContext {
        site_id: config.site_id.clone(),
        rules_dir: config.rules_dir.clone(),
        state_dir: config.state_dir.clone(),
        dry_run: config.dry_run,
        l1: RwLock::new(Arc::new(l1)),
        l2,
        escalator,
        guardrails,
        runbooks,
        allowlist: l1_allowlist,
        store,
        evidence,
        queue,
        control_plane,
        events,
        credentials: CredentialStore::new(),
        maintenance_windows: RwLock::new(Vec::new()),
        transport,
        clock,
        promotion_policy: PromotionPolicy::default(),
        promotion_watcher: PromotionWatcher::new(),
    });

    let uploader = build_worm_uploader(&config, ctx.control_plane.as_deref()).await?;

    let shutdown = CancellationToken::new();
    let worker_config = WorkerConfig {
        checkin_interval: Duration::from_secs(config.poll_interval_secs),
        ..WorkerConfig::default()
    };
    let handles = spawn_workers(ctx.clone(), uploader, config.host_id.clone(), worker_config, shutdown.clone());

    if config.one_shot {
        tokio::time::sleep(Duration::from_secs(config.poll_interval_secs) + Duration::from_secs(2)).await;
        handles.join(&shutdown).await;
        let exit_code = if failed_flag.load(Ordering::SeqCst) { 10 } else { 0 };
        return Ok(RunOutcome { exit_code });
    }

    wait_for_shutdown_signal(shutdown.clone())?;
    handles.join(&shutdown).await;
    Ok(RunOutcome { exit_code: 0 })
}

/// Blocks the calling task until SIGINT/SIGTERM fires or `shutdown` is
/// already cancelled, then returns. `ctrlc` runs its handler on its own
/// thread, so the cancellation itself is a cheap, sync call.
fn wait_for_shutdown_signal(shutdown: CancellationToken) -> Result<(), AgentError> {
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .map_err(|e| AgentError::configuration(format!("failed to install signal handler: {e}")))?;

    tokio::task::block_in_place(|| {
        tokio::runtime::Handle::current().block_on(shutdown.cancelled());
    });
    Ok(())
}
