//! The closed, crate-wide error taxonomy (spec §7) plus a structured,
//! chainable error-event record so any failure can be rendered into both a
//! `tracing` event and an evidence/ticket-grade record — "operator-visible
//! failures materialize in exactly two places: the L3 escalator's tickets
//! and the evidence bundles. Nothing is reported only in logs."

use crate::value::Value;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The ten error kinds of spec §7. Each variant documents its propagation
/// policy; see the module doc for the two operator-visible surfaces every
/// unrecoverable variant must reach.
#[derive(Debug, Error, Diagnostic, Clone, Serialize, Deserialize)]
pub enum AgentError {
    /// Missing/invalid startup inputs. Fatal; supervisor exits 1.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Signing key cannot be loaded. Fatal; supervisor exits 2.
    #[error("signing key unavailable: {message}")]
    CryptoUnavailable { message: String },

    /// Incident store / offline queue failed an integrity check. Fatal;
    /// supervisor exits 3.
    #[error("store corruption detected: {message}")]
    StoreCorruption { message: String },

    /// Network/remote failure likely to succeed on retry. Recovered locally
    /// by the owning component's retry/backoff policy.
    #[error("transient transport failure: {message}")]
    TransportTransient { message: String },

    /// Authentication failure, or a 4xx response that is not 429. Never
    /// retried; surfaces as `Resolution(outcome=failure)`.
    #[error("permanent transport failure: {message}")]
    TransportPermanent { message: String },

    /// A bounded step exceeded its deadline.
    #[error("operation timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// Policy prevented execution; re-routed to L3.
    #[error("blocked by guardrail: {reason}")]
    GuardrailBlocked { reason: String },

    /// L2 call blocked by cost/concurrency budget; re-routed to L3.
    #[error("budget exhausted: {reason}")]
    BudgetExhausted { reason: String },

    /// LLM produced unparseable or policy-violating output; re-routed to
    /// L3 with diagnostic detail.
    #[error("validation failed: {reason}")]
    ValidationFailed { reason: String },

    /// Hash-chain verification detected a gap. Never silently repaired:
    /// surfaces as a high-severity self-incident and freezes the chain.
    #[error("hash chain broken at index {index}: {reason}")]
    HashChainBroken { index: u64, reason: String },

    /// Evidence could not be delivered; bundle remains `pending` and is
    /// retried by the upload worker.
    #[error("evidence upload failed: {reason}")]
    UploadFailed { reason: String },
}

impl AgentError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn crypto_unavailable(message: impl Into<String>) -> Self {
        Self::CryptoUnavailable {
            message: message.into(),
        }
    }

    /// Exit code the supervisor should use when this error is fatal to the
    /// process (spec §6 "Exit codes"). Returns `None` for variants that are
    /// always recovered or captured as a `Resolution` instead.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            AgentError::Configuration { .. } => Some(1),
            AgentError::CryptoUnavailable { .. } => Some(2),
            AgentError::StoreCorruption { .. } => Some(3),
            _ => None,
        }
    }

    /// Whether this error kind is recovered by retry at the layer that owns
    /// the retry budget (executor step retries, L2 transport retries).
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::TransportTransient { .. })
    }
}

/// A structured, auditable record of a single error occurrence — the
/// evidence/ticket-grade rendering of an [`AgentError`]. Distinct from the
/// `tracing` log line emitted alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub when: DateTime<Utc>,
    pub scope: String,
    pub error: AgentError,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: Value,
}

impl ErrorEvent {
    pub fn new(scope: impl Into<String>, error: AgentError) -> Self {
        Self {
            when: Utc::now(),
            scope: scope.into(),
            error,
            tags: Vec::new(),
            context: Value::Null,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec_table() {
        assert_eq!(
            AgentError::configuration("missing --site-id").exit_code(),
            Some(1)
        );
        assert_eq!(
            AgentError::CryptoUnavailable {
                message: "no key".into()
            }
            .exit_code(),
            Some(2)
        );
        assert_eq!(
            AgentError::StoreCorruption {
                message: "wal mismatch".into()
            }
            .exit_code(),
            Some(3)
        );
        assert_eq!(
            AgentError::GuardrailBlocked {
                reason: "cooldown".into()
            }
            .exit_code(),
            None
        );
    }
}
