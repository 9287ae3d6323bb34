//! # Validation Errors
//!
//! Construction-time validation failures for domain primitives. Each error
//! carries the rejected input so that callers can report exactly what was
//! wrong without guesswork.

use thiserror::Error;

/// Validation errors for domain primitive newtypes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// User identifier is empty or whitespace.
    #[error("invalid user ID: must be non-empty")]
    EmptyUserId,

    /// User identifier exceeds the maximum length.
    #[error("invalid user ID: \"{0}\" exceeds 128 characters")]
    UserIdTooLong(String),

    /// User identifier contains whitespace or control characters.
    #[error("invalid user ID: \"{0}\" contains whitespace or control characters")]
    UserIdCharacters(String),

    /// Amount string is not a valid decimal number.
    #[error("invalid amount: \"{0}\" is not a decimal number")]
    InvalidAmount(String),

    /// Amount is negative.
    #[error("invalid amount: {0} is negative")]
    NegativeAmount(String),

    /// Idempotency key is empty, too long, or not printable ASCII.
    #[error("invalid idempotency key: \"{0}\" (expected 1-128 printable ASCII characters)")]
    InvalidIdempotencyKey(String),

    /// Identifier string is not a UUID.
    #[error("invalid identifier: \"{0}\" is not a UUID")]
    InvalidUuid(String),
}
