//! # State Machine Errors
//!
//! Rejections carry the current status, the attempted target and the reason
//! so that a caller can reconcile without re-reading the transaction.

use thiserror::Error;

use escrow_core::ValidationError;

use crate::status::EscrowStatus;

/// Errors arising from escrow state transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The requested status change is not an edge of the transition table,
    /// or the edge's guard is not satisfied.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// The current status.
        from: EscrowStatus,
        /// The attempted target status.
        to: EscrowStatus,
        /// Human-readable reason for the rejection.
        reason: String,
    },

    /// The transaction is terminal and admits no further mutation.
    #[error("transaction {transaction_id} is in terminal status {status}")]
    Terminal {
        /// The transaction identifier.
        transaction_id: String,
        /// The terminal status.
        status: EscrowStatus,
    },

    /// A status name outside the closed enumeration.
    #[error("unknown escrow status: \"{0}\"")]
    UnknownStatus(String),

    /// A new transaction violates a creation invariant.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// A primitive failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
