//! # Engine Error Taxonomy
//!
//! Every engine operation fails with an [`EngineError`]. Public entry points
//! wrap it in a [`Rejection`] that also carries the current, unmodified
//! transaction snapshot so callers can reconcile without a second read.

use thiserror::Error;

use escrow_arbitration::ArbitrationError;
use escrow_core::ValidationError;
use escrow_reputation::ReputationError;
use escrow_state::{EscrowTransaction, TransitionError};

use crate::store::StoreError;

/// Typed engine failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The transition table or an edge guard forbids the request.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The actor may not perform the request.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A dispute is already open on the transaction.
    #[error("conflicting dispute: {0}")]
    ConflictingDispute(String),

    /// An external collaborator timed out or failed. Retryable; no
    /// transition was applied.
    #[error("collaborator unavailable during {operation}: {reason}")]
    CollaboratorUnavailable {
        /// The collaborator operation (`confirm_deposit`, `assess`, ...).
        operation: String,
        /// Last failure observed.
        reason: String,
    },

    /// A concurrent writer won a version race, twice.
    #[error("stale write: {0}")]
    StaleWrite(String),

    /// Recorded state contradicts a delivered fact.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// A uniquely-keyed record already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The addressed entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The ledger store failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    /// Stable snake_case kind, used as the error code and metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Unauthorized(_) => "unauthorized",
            Self::ConflictingDispute(_) => "conflicting_dispute",
            Self::CollaboratorUnavailable { .. } => "collaborator_unavailable",
            Self::StaleWrite(_) => "stale_write",
            Self::IntegrityViolation(_) => "integrity_violation",
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CollaboratorUnavailable { .. } | Self::StaleWrite(_))
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<TransitionError> for EngineError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidTransition { .. } | TransitionError::Terminal { .. } => {
                Self::InvalidTransition(err.to_string())
            }
            TransitionError::UnknownStatus(_)
            | TransitionError::InvalidTransaction(_)
            | TransitionError::Validation(_) => Self::Validation(err.to_string()),
        }
    }
}

impl From<ArbitrationError> for EngineError {
    fn from(err: ArbitrationError) -> Self {
        match err {
            ArbitrationError::InvalidTransition { .. } | ArbitrationError::TerminalState { .. } => {
                Self::InvalidTransition(err.to_string())
            }
            ArbitrationError::ConflictingDecision { .. }
            | ArbitrationError::CompensationFinal { .. } => Self::IntegrityViolation(err.to_string()),
            ArbitrationError::InvalidDecision(_)
            | ArbitrationError::InvalidDispute(_)
            | ArbitrationError::InvalidProof(_) => Self::Validation(err.to_string()),
        }
    }
}

impl From<ReputationError> for EngineError {
    fn from(err: ReputationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StaleWrite { .. } => Self::StaleWrite(err.to_string()),
            StoreError::Duplicate { .. } => Self::AlreadyExists(err.to_string()),
            StoreError::Backend(_) => Self::Storage(err.to_string()),
        }
    }
}

/// A rejected request: the error plus the transaction as it currently is.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error}")]
pub struct Rejection {
    /// What went wrong.
    pub error: EngineError,
    /// The unmodified transaction, when the request addressed one.
    pub current: Option<Box<EscrowTransaction>>,
}

impl Rejection {
    /// A rejection with no transaction context.
    pub fn bare(error: EngineError) -> Self {
        Self {
            error,
            current: None,
        }
    }
}

impl From<EngineError> for Rejection {
    fn from(error: EngineError) -> Self {
        Self::bare(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_state::EscrowStatus;

    #[test]
    fn transition_errors_map_to_invalid_transition() {
        let err: EngineError = TransitionError::Terminal {
            transaction_id: "tx".into(),
            status: EscrowStatus::Completed,
        }
        .into();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[test]
    fn conflicting_decision_is_integrity_violation() {
        let err: EngineError = ArbitrationError::ConflictingDecision {
            dispute_id: "d".into(),
            recorded: "resolved_buyer".into(),
            attempted: "resolved_seller".into(),
        }
        .into();
        assert_eq!(err.kind(), "integrity_violation");
        assert!(!err.is_retryable());
    }

    #[test]
    fn collaborator_unavailable_is_retryable() {
        let err = EngineError::CollaboratorUnavailable {
            operation: "assess".into(),
            reason: "timed out".into(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("assess"));
    }

    #[test]
    fn rejection_displays_inner_error() {
        let rejection = Rejection::bare(EngineError::not_found("transaction", "abc"));
        assert_eq!(rejection.to_string(), "transaction abc not found");
    }
}
