//! Alert evaluation engine.
//!
//! Each cycle takes the latest metric sample of every target, checks it
//! against the enabled rules scoped to that target, and records a new
//! [`AlertEvent`](oxwatch_common::types::AlertEvent) only when no open event
//! already exists for the (rule, target) pair. Persistence is reached
//! through the traits in [`store`].

pub mod dedup;
pub mod error;
pub mod evaluator;
pub mod matcher;
pub mod store;
pub mod validate;

#[cfg(test)]
mod tests;

pub use dedup::{DedupDecision, Deduplicator};
pub use error::EvaluationError;
pub use evaluator::{
    AlertEvaluator, CycleReport, EvaluatorConfig, EvaluatorStatsSnapshot, ManualTrigger,
    TargetFailure, TriggerOutcome,
};
pub use store::{EventStore, MetricSource, RuleStore, StoreError, StoreResult, TargetDirectory};
pub use validate::{validate_rule, RuleValidationError};
