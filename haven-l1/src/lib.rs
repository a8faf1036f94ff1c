//! Level-1 deterministic engine (spec §4.2): matches incidents against a
//! sorted, declarative rule set with no LLM call on the hot path. A miss
//! falls through to Level-2 without ever touching the network.

pub mod condition;
pub mod cooldown;
pub mod engine;
pub mod rule_file;

pub use condition::{compile_regex, evaluate, incident_value};
pub use cooldown::RuleCooldownTracker;
pub use engine::{CompiledRule, L1Engine};
pub use rule_file::{load_rules, write_promoted_rule};
