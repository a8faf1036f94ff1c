//! The [`QueueItem`] record and its lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemKind {
    Evidence,
    Telemetry,
}

impl QueueItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemKind::Evidence => "evidence",
            QueueItemKind::Telemetry => "telemetry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "evidence" => Some(QueueItemKind::Evidence),
            "telemetry" => Some(QueueItemKind::Telemetry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemState {
    Pending,
    Delivered,
    Failed,
}

impl QueueItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemState::Pending => "pending",
            QueueItemState::Delivered => "delivered",
            QueueItemState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "delivered" => QueueItemState::Delivered,
            "failed" => QueueItemState::Failed,
            _ => QueueItemState::Pending,
        }
    }
}

/// One durable unit of work: a bundle reference or a telemetry batch,
/// serialized as JSON (the queue doesn't interpret `payload`; delivery
/// workers deserialize it against the type implied by `kind`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub kind: QueueItemKind,
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub state: QueueItemState,
}
