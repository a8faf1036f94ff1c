//! `POST /api/agent/executions` — post-execution telemetry (spec §6). The
//! wire shape is the narrower projection the control plane actually wants,
//! distinct from `haven_telemetry::TelemetryEvent` (this workspace's
//! internal event bus record).

use chrono::{DateTime, Utc};
use haven_types::{Outcome, Resolution, ResolutionLevel};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionTelemetry {
    pub execution_id: String,
    pub incident_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appliance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runbook_id: Option<String>,
    pub hostname: String,
    pub incident_type: String,
    pub duration_seconds: f64,
    pub success: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub resolution_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_signature: Option<String>,
}

impl ExecutionTelemetry {
    pub fn from_resolution(execution_id: impl Into<String>, hostname: impl Into<String>, resolution: &Resolution) -> Self {
        let resolution_level = match resolution.resolution_level {
            ResolutionLevel::L1 => "l1",
            ResolutionLevel::L2 => "l2",
            ResolutionLevel::L3 => "l3",
        };
        let (success, status) = match resolution.outcome {
            Outcome::Success => (true, "success"),
            Outcome::Failure => (false, "failure"),
            Outcome::Partial => (false, "partial"),
            Outcome::Escalated => (false, "escalated"),
            Outcome::Blocked => (false, "blocked"),
        };
        Self {
            execution_id: execution_id.into(),
            incident_id: resolution.incident_id.clone(),
            appliance_id: None,
            runbook_id: None,
            hostname: hostname.into(),
            incident_type: String::new(),
            duration_seconds: resolution.resolution_time_ms as f64 / 1000.0,
            success,
            status: status.to_string(),
            confidence: None,
            resolution_level: resolution_level.to_string(),
            error_message: resolution.error_message.clone(),
            cost_usd: resolution.cost_usd,
            input_tokens: resolution.llm_tokens_in,
            output_tokens: resolution.llm_tokens_out,
            reasoning: resolution.reasoning.clone(),
            pattern_signature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub site_id: String,
    pub execution: ExecutionTelemetry,
    pub reported_at: DateTime<Utc>,
}
