//! Model Output Validation
//!
//! Structured output from completion backends is recovered here before any
//! stage interprets it.

mod json_repair;

pub use json_repair::{JsonRepairer, RepairKind};
