//! # Reputation Errors

use thiserror::Error;

/// Errors arising from reputation and rating operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReputationError {
    /// Star ratings run from 1 to 5.
    #[error("rating must be between 1 and 5 stars, got {0}")]
    InvalidStars(u8),

    /// A user tried to rate themselves.
    #[error("user {0} cannot rate themselves")]
    SelfRating(String),

    /// A rating comment exceeded the length limit.
    #[error("rating comment exceeds {max} characters")]
    CommentTooLong {
        /// Maximum permitted length.
        max: usize,
    },

    /// A policy threshold is out of range.
    #[error("invalid reputation policy: {0}")]
    InvalidPolicy(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert!(ReputationError::InvalidStars(7).to_string().contains('7'));
        assert!(ReputationError::SelfRating("alice".into())
            .to_string()
            .contains("alice"));
        assert!(ReputationError::CommentTooLong { max: 10 }
            .to_string()
            .contains("10"));
    }
}
