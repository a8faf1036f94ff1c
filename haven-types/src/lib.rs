//! Shared data model for the compliance enforcement agent.
//!
//! This crate has no I/O and no async dependency: it is the vocabulary
//! every other crate in the workspace speaks. See [`value::Value`] for the
//! dynamic payload representation, [`error::AgentError`] for the closed
//! error taxonomy, and [`clock::Clock`] for the injectable time source used
//! everywhere a cooldown, TTL, or backoff is computed.

pub mod clock;
pub mod error;
pub mod evidence;
pub mod incident;
pub mod order;
pub mod resolution;
pub mod rule;
pub mod target;
pub mod value;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{AgentError, ErrorEvent};
pub use evidence::{ActionRecord, EvidenceBundle, HashChainLink, ScrubberStats};
pub use incident::{compute_pattern_signature, Incident, IncidentType, Severity};
pub use order::Order;
pub use resolution::{Outcome, PatternStats, Resolution, ResolutionLevel};
pub use rule::{Condition, Operator, PromotionMetadata, Rule, RuleSource};
pub use target::{RemoteTarget, RemoteTransport};
pub use value::Value;
