use crate::store::StoreError;

/// Failures of a single target evaluation or a manual trigger.
///
/// None of these are fatal to the evaluation cycle: `evaluate_all` records
/// them per target and moves on.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// A collaborator call failed or timed out.
    #[error("failed to {operation} for target {target_id}: {source}")]
    Dependency {
        operation: &'static str,
        target_id: String,
        #[source]
        source: StoreError,
    },

    /// The whole target evaluation exceeded its budget.
    #[error("evaluation of target {0} exceeded its time budget")]
    TargetTimeout(String),

    /// The open-event check could not be answered; creation was suppressed.
    #[error("open-event lookup unavailable for rule {rule_id} on target {target_id}")]
    DedupUnavailable { rule_id: String, target_id: String },

    #[error("unknown rule '{0}'")]
    UnknownRule(String),

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
}

impl EvaluationError {
    pub(crate) fn dependency(operation: &'static str, target_id: &str, source: StoreError) -> Self {
        Self::Dependency {
            operation,
            target_id: target_id.to_string(),
            source,
        }
    }
}
