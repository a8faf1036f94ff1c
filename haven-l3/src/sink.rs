//! Pluggable escalation channels. Mirrors `haven_telemetry::EventSink`'s
//! "try every channel, log failures, never fail the whole operation"
//! posture, but over an async webhook call rather than a synchronous
//! handler: a pager outage must never stop the chat and email channels
//! from firing.

use crate::ticket::EscalationTicket;
use async_trait::async_trait;
use haven_types::AgentError;

#[async_trait]
pub trait EscalationSink: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, ticket: &EscalationTicket) -> Result<(), AgentError>;
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
            message: format!("escalation webhook returned {status}"),
        }
    } else {
        AgentError::TransportPermanent {
            message: format!("escalation webhook returned {status}"),
        }
    }
}

/// A channel that posts the ticket's rendered body to a webhook URL. Pager,
/// chat, and email are distinguished only by `name` and `webhook_url` —
/// the routing policy in [`crate::escalator`] is what decides which
/// channels fire for a given severity, not the sink itself.
pub struct WebhookSink {
    name: &'static str,
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookSink {
    pub fn new(name: &'static str, client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            name,
            client,
            webhook_url: webhook_url.into(),
        }
    }

    pub fn pager(client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self::new("pager", client, webhook_url)
    }

    pub fn chat(client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self::new("chat", client, webhook_url)
    }

    pub fn email(client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self::new("email", client, webhook_url)
    }
}

#[derive(serde::Serialize)]
struct WebhookPayload<'a> {
    headline: &'a str,
    body: &'a str,
    severity: String,
    incident_id: &'a str,
}

#[async_trait]
impl EscalationSink for WebhookSink {
    fn name(&self) -> &str {
        self.name
    }

    async fn notify(&self, ticket: &EscalationTicket) -> Result<(), AgentError> {
        let payload = WebhookPayload {
            headline: &ticket.headline(),
            body: &ticket.render(),
            severity: ticket.severity.to_string(),
            incident_id: &ticket.incident_id,
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            return Err(classify_status(response.status()));
        }
        Ok(())
    }
}

/// Records every ticket it receives instead of sending anything. Used by
/// tests and by a deployment that has no channel configured for some
/// severity tier.
pub struct RecordingSink {
    name: &'static str,
    received: parking_lot::Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            received: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn received_incident_ids(&self) -> Vec<String> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl EscalationSink for RecordingSink {
    fn name(&self) -> &str {
        self.name
    }

    async fn notify(&self, ticket: &EscalationTicket) -> Result<(), AgentError> {
        self.received.lock().push(ticket.incident_id.clone());
        Ok(())
    }
}
