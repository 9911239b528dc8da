//! Collaborator contracts consumed by the evaluation engine.
//!
//! Every call is potentially blocking I/O; the engine wraps each one in a
//! timeout (see [`crate::evaluator::EvaluatorConfig::store_timeout`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxwatch_common::types::{AlertEvent, AlertRule, MetricSample, NewAlertEvent};

/// Errors surfaced by rule, metric, and event stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record addressed by id does not exist.
    #[error("Store: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A write referenced a rule or target that is missing or malformed.
    #[error("Store: invalid reference: {0}")]
    InvalidReference(String),

    /// A uniqueness guarantee rejected the write (e.g. a second open event
    /// for the same rule/target pair).
    #[error("Store: conflict: {0}")]
    Conflict(String),

    /// The operation did not complete within its budget.
    #[error("Store: {operation} timed out")]
    Timeout { operation: &'static str },

    /// Any other backend failure (connection loss, SQL error, ...).
    #[error("Store: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Source of alert rule definitions.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Returns enabled rules whose scope covers `target_id`.
    async fn list_enabled_rules_for_target(&self, target_id: &str) -> StoreResult<Vec<AlertRule>>;

    async fn get_rule(&self, rule_id: &str) -> StoreResult<Option<AlertRule>>;
}

/// Source of time-stamped metric samples.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn latest_sample(&self, target_id: &str) -> StoreResult<Option<MetricSample>>;

    /// Samples collected in `[from, to]`, oldest first.
    async fn samples_between(
        &self,
        target_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricSample>>;
}

/// Durable record of alert events. The only source of truth for whether a
/// (rule, target) pair currently has an open event.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists a new firing event and assigns its id.
    async fn create_event(&self, event: NewAlertEvent) -> StoreResult<AlertEvent>;

    /// Unresolved events for the pair.
    async fn find_open_events(&self, rule_id: &str, target_id: &str)
        -> StoreResult<Vec<AlertEvent>>;

    async fn acknowledge(&self, event_id: &str) -> StoreResult<AlertEvent>;

    /// Sets status to resolved and stamps `resolved_at`.
    async fn resolve(&self, event_id: &str) -> StoreResult<AlertEvent>;
}

/// Enumerates the monitored targets.
#[async_trait]
pub trait TargetDirectory: Send + Sync {
    async fn list_target_ids(&self) -> StoreResult<Vec<String>>;
}

/// Returns true when `pattern` scopes a rule onto `target_id`.
///
/// # Examples
///
/// ```
/// use oxwatch_alert::store::target_matches;
///
/// assert!(target_matches("*", "web-01"));
/// assert!(target_matches("web-*", "web-01"));
/// assert!(!target_matches("web-*", "db-01"));
/// assert!(target_matches("7", "7"));
/// ```
pub fn target_matches(pattern: &str, target_id: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    glob_match::glob_match(pattern, target_id)
}
