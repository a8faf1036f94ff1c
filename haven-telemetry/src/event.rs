//! The [`TelemetryEvent`] record and its severity scale.

use chrono::{DateTime, Utc};
use haven_types::Value;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Debug,
    Info,
    Warn,
    Error,
    Alert,
}

/// A single structured event emitted by a component (drift detector,
/// auto-healer, learning loop, control-plane client, evidence pipeline,
/// ...). This is the agent's internal telemetry record — the wire shape
/// posted to the control plane's execution-telemetry endpoint is a
/// different, narrower projection built by `haven-control-plane`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub when: DateTime<Utc>,
    pub component: String,
    pub severity: EventSeverity,
    pub message: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub incident_id: Option<String>,
}

impl TelemetryEvent {
    pub fn new(
        component: impl Into<String>,
        severity: EventSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            when: Utc::now(),
            component: component.into(),
            severity,
            message: message.into(),
            context: Value::Null,
            incident_id: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_incident(mut self, incident_id: impl Into<String>) -> Self {
        self.incident_id = Some(incident_id.into());
        self
    }
}
