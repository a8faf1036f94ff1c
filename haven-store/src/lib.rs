//! Embedded incident/resolution store and the learning loop that promotes
//! proven L2 decisions into deterministic L1 rules (spec §4.10).

pub mod learning;
pub mod schema;
pub mod store;

pub use learning::{
    confidence_score, decide_promotion, LearningLoopClock, PromotionDecision, PromotionPolicy,
    PromotionWatcher, WatchOutcome,
};
pub use store::{IncidentStore, PatternContext};
