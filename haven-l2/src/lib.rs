//! Level-2 LLM-assisted planner (spec §4.3): runs when a Level-1 rule
//! sweep misses. Scrubs PHI, asks the control plane to plan a remediation,
//! and applies the guardrail overrides that can force an escalation to
//! Level 3 regardless of what the model proposed.

pub mod backend;
pub mod decision;
pub mod parse;
pub mod planner;

pub use backend::PlanBackend;
pub use decision::{Decision, PlanRequest};
pub use parse::parse_decision;
pub use planner::{L2Planner, CONFIDENCE_ESCALATION_THRESHOLD, DEFAULT_CONCURRENCY, DEFAULT_ESTIMATED_COST_USD};
