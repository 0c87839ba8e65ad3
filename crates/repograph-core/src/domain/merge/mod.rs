//! Entity resolution across code and documentation

pub mod engine;
pub mod index;
pub mod normalize;
pub mod rules;

pub use engine::{MergeDecision, MergeEngine, MergeOutcome, MergeReport, UnmergedReason};
pub use index::{VectorIndex, cosine_similarity};
pub use normalize::normalize_name;
pub use rules::{ExclusionRule, ExclusionRuleSet};
