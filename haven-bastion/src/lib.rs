//! Guardrails, PHI scrubber, and cryptographic signer.
//!
//! Every action any tier proposes passes through [`guardrails::GuardrailPipeline`]
//! before it reaches the executor; every string that might reach a log line,
//! an LLM prompt, or an evidence bundle passes through [`phi::scrub_value`]
//! first. [`signer`] provides the Ed25519 signing and SHA-256 content
//! hashing the evidence pipeline needs to make a bundle tamper-evident.

pub mod allowlist;
pub mod budget;
pub mod config;
pub mod cooldown;
pub mod dangerous;
pub mod guardrails;
pub mod maintenance_window;
pub mod patterns;
pub mod phi;
pub mod signer;

pub use allowlist::Allowlist;
pub use budget::{BudgetDenial, BudgetLimits, BudgetTracker};
pub use config::{load as load_guardrail_config, FailMode, GuardrailConfigFile, ResolvedGuardrailConfig};
pub use cooldown::CooldownTracker;
pub use dangerous::{is_dangerous, scan as scan_dangerous, DangerousFinding};
pub use guardrails::{GuardrailPipeline, ProposedAction, StageOutcome};
pub use maintenance_window::{MaintenanceWindow, MaintenanceWindowPolicy, WindowDecision};
pub use phi::{category_labels as phi_categories, scrub_str, scrub_value, ScrubReport};
pub use signer::{content_hash, verify as verify_signature, Signer};
