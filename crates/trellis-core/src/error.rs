use crate::storage::StorageError;
use thiserror::Error;

/// Trellis orchestration errors.
#[derive(Debug, Error)]
pub enum TrellisError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Scoring capability unavailable: {0}")]
    ScoringUnavailable(String),

    #[error("Decision already recorded for idea '{idea_id}' in cycle {cycle}")]
    AlreadyDecided { idea_id: String, cycle: u32 },

    #[error("Actor '{actor}' is not authorized to {action}")]
    Unauthorized { actor: String, action: String },

    #[error("Insufficient escrow balance on contract '{contract_id}': requested {requested}, available {available}")]
    InsufficientBalance {
        contract_id: String,
        requested: u64,
        available: u64,
    },

    #[error("Rate limit exceeded for key '{key}', resets at {reset_at}")]
    RateLimited { key: String, reset_at: String },

    #[error("Anchor '{anchor}' failed: {message}")]
    AnchorFailure { anchor: String, message: String },

    #[error("Notifier '{notifier}' failed: {message}")]
    NotifierFailure { notifier: String, message: String },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TrellisError {
    pub fn stage_violation(expected: &str, actual: &str) -> Self {
        Self::InvariantViolation(format!(
            "stage order violation: expected '{}', got '{}'",
            expected, actual
        ))
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn unauthorized(actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Unauthorized {
            actor: actor.into(),
            action: action.into(),
        }
    }
}
