//! # Arbitration Error Types
//!
//! Dispute-machine rejections include the current state, the attempted
//! target and the reason.

use thiserror::Error;

/// Errors arising from dispute, proof and compensation operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbitrationError {
    /// Attempted state transition is not valid from the current dispute state.
    #[error("invalid dispute transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// The current state name.
        from: String,
        /// The attempted target state name.
        to: String,
        /// Human-readable reason for the rejection.
        reason: String,
    },

    /// Dispute is closed and accepts no further transitions.
    #[error("dispute {dispute_id} is in terminal state {state}")]
    TerminalState {
        /// The dispute identifier.
        dispute_id: String,
        /// The terminal state name.
        state: String,
    },

    /// A decision contradicts the one already recorded.
    #[error("dispute {dispute_id} already resolved as {recorded}; refusing {attempted}")]
    ConflictingDecision {
        /// The dispute identifier.
        dispute_id: String,
        /// The verdict on record.
        recorded: String,
        /// The verdict that was delivered.
        attempted: String,
    },

    /// A decision is malformed (confidence out of range, empty assessment id).
    #[error("invalid arbitration decision: {0}")]
    InvalidDecision(String),

    /// Dispute creation input is malformed.
    #[error("invalid dispute: {0}")]
    InvalidDispute(String),

    /// Proof input is malformed or the proof is immutable.
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// A compensation record is already in a terminal status.
    #[error("compensation {compensation_id} already {status}")]
    CompensationFinal {
        /// The compensation record identifier.
        compensation_id: String,
        /// The terminal status.
        status: String,
    },
}
