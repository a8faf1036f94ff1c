//! [`ControlPlaneClient`] — the pull-only mTLS client (spec §4.11): cycle
//! check-in, L2 planning (implements [`haven_l2::PlanBackend`]), and
//! execution telemetry. Evidence upload is not reimplemented here — the
//! client hands its shared, identity-bound [`reqwest::Client`] to
//! `haven_evidence::ProxyUploader`, which already owns the
//! `/api/evidence/upload` request shape.

use crate::checkin::{verify_orders, CheckinResponse, CheckinState, CheckinResponseWire};
use crate::telemetry::ExecutionReport;
use async_trait::async_trait;
use chrono::Utc;
use haven_evidence::ProxyUploader;
use haven_l2::{PlanBackend, PlanRequest};
use haven_types::AgentError;
use std::time::Duration;

pub const CHECKIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const PLAN_TIMEOUT: Duration = Duration::from_secs(30);
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    order_verify_key: Vec<u8>,
}

impl ControlPlaneClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, bearer_token: impl Into<String>, order_verify_key: Vec<u8>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
            order_verify_key,
        }
    }

    pub fn proxy_uploader(&self) -> ProxyUploader {
        ProxyUploader::new(self.client.clone(), self.base_url.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /api/appliances/checkin` (spec §4.11, §6). Orders come back
    /// with their signatures and TTLs already verified; anything that
    /// fails either check is dropped before this function returns.
    pub async fn checkin(&self, state: CheckinState) -> Result<CheckinResponse, AgentError> {
        let wire: CheckinResponseWire = tokio::time::timeout(CHECKIN_TIMEOUT, async {
            let response = self
                .client
                .post(self.url("/api/appliances/checkin"))
                .bearer_auth(&self.bearer_token)
                .json(&state)
                .send()
                .await
                .map_err(classify_reqwest_error)?;

            if !response.status().is_success() {
                return Err(classify_status(response.status()));
            }
            response
                .json::<CheckinResponseWire>()
                .await
                .map_err(|e| AgentError::ValidationFailed {
                    reason: format!("malformed checkin response: {e}"),
                })
        })
        .await
        .map_err(|_| AgentError::Timeout {
            operation: "control-plane checkin".to_string(),
            elapsed_ms: CHECKIN_TIMEOUT.as_millis() as u64,
        })??;

        Ok(verify_orders(wire, &self.order_verify_key, Utc::now()))
    }

    /// `POST /api/agent/executions` (spec §6). Fire-and-forget from the
    /// orchestrator's point of view: a failure here never blocks or
    /// reverses a resolution that already happened locally.
    pub async fn report_execution(&self, report: &ExecutionReport) -> Result<(), AgentError> {
        tokio::time::timeout(REPORT_TIMEOUT, async {
            let response = self
                .client
                .post(self.url("/api/agent/executions"))
                .bearer_auth(&self.bearer_token)
                .json(report)
                .send()
                .await
                .map_err(classify_reqwest_error)?;

            if !response.status().is_success() {
                return Err(classify_status(response.status()));
            }
            Ok(())
        })
        .await
        .map_err(|_| AgentError::Timeout {
            operation: "control-plane execution report".to_string(),
            elapsed_ms: REPORT_TIMEOUT.as_millis() as u64,
        })?
    }
}

#[async_trait]
impl PlanBackend for ControlPlaneClient {
    /// `POST /api/agent/l2/plan` (spec §4.3, §6). Returns the raw response
    /// body; parsing (including code-fence stripping) stays the planner's
    /// job so a backend swap never changes parsing behavior.
    async fn plan(&self, request: &PlanRequest) -> Result<String, AgentError> {
        tokio::time::timeout(PLAN_TIMEOUT, async {
            let response = self
                .client
                .post(self.url("/api/agent/l2/plan"))
                .bearer_auth(&self.bearer_token)
                .json(request)
                .send()
                .await
                .map_err(classify_reqwest_error)?;

            if !response.status().is_success() {
                return Err(classify_status(response.status()));
            }
            response.text().await.map_err(|e| AgentError::ValidationFailed {
                reason: format!("unreadable plan response: {e}"),
            })
        })
        .await
        .map_err(|_| AgentError::Timeout {
            operation: "control-plane plan".to_string(),
            elapsed_ms: PLAN_TIMEOUT.as_millis() as u64,
        })?
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> AgentError {
    if e.is_timeout() || e.is_connect() {
        AgentError::TransportTransient { message: e.to_string() }
    } else {
        AgentError::TransportPermanent { message: e.to_string() }
    }
}

fn classify_status(status: reqwest::StatusCode) -> AgentError {
    if status.as_u16() == 429 || status.is_server_error() {
        AgentError::TransportTransient {
            message: format!("control plane returned {status}"),
        }
    } else {
        AgentError::TransportPermanent {
            message: format!("control plane returned {status}"),
        }
    }
}
