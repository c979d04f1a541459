//! Command policy matching.

pub mod engine;
pub mod types;

pub use engine::FilterEngine;
pub use types::{FilterRule, FilterVerdict, RuleAction, RuleKind};
