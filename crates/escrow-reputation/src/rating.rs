//! # Transaction Ratings
//!
//! Post-completion feedback from one party about the other. Whether the
//! transaction is ratable and whether the rated user is really the
//! counterparty is decided by the authorization guard; this module owns the
//! value-level invariants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrow_core::{RatingId, TransactionId, UserId};

use crate::error::ReputationError;

const MAX_COMMENT_LEN: usize = 1000;

/// A 1–5 star rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Stars(u8);

/// How a rating moves the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    /// 4–5 stars.
    Positive,
    /// 3 stars; counted nowhere.
    Neutral,
    /// 1–2 stars.
    Negative,
}

impl Stars {
    /// Validate a star count.
    ///
    /// # Errors
    ///
    /// Returns [`ReputationError::InvalidStars`] outside `1..=5`.
    pub fn new(value: u8) -> Result<Self, ReputationError> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ReputationError::InvalidStars(value))
        }
    }

    /// The raw star count.
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Counter bucket for this rating.
    pub fn sentiment(&self) -> Sentiment {
        match self.0 {
            4 | 5 => Sentiment::Positive,
            3 => Sentiment::Neutral,
            _ => Sentiment::Negative,
        }
    }
}

impl TryFrom<u8> for Stars {
    type Error = ReputationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Stars> for u8 {
    fn from(stars: Stars) -> Self {
        stars.0
    }
}

/// One party's rating of the other for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRating {
    /// Unique rating identifier.
    pub id: RatingId,
    /// The rated transaction.
    pub escrow_transaction_id: TransactionId,
    /// Who gave the rating.
    pub rater_id: UserId,
    /// Who received it.
    pub rated_user_id: UserId,
    /// Star count.
    pub rating: Stars,
    /// Optional free-text comment.
    pub comment: Option<String>,
    /// Set by an operator for moderation; does not affect counters.
    pub flagged: bool,
    /// When the rating was recorded.
    pub created_at: DateTime<Utc>,
}

impl TransactionRating {
    /// Build a rating.
    ///
    /// # Errors
    ///
    /// Returns [`ReputationError::SelfRating`] if rater and rated user are
    /// the same, or [`ReputationError::CommentTooLong`].
    pub fn new(
        escrow_transaction_id: TransactionId,
        rater_id: UserId,
        rated_user_id: UserId,
        rating: Stars,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, ReputationError> {
        if rater_id == rated_user_id {
            return Err(ReputationError::SelfRating(rater_id.to_string()));
        }
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if comment
            .as_ref()
            .is_some_and(|c| c.chars().count() > MAX_COMMENT_LEN)
        {
            return Err(ReputationError::CommentTooLong {
                max: MAX_COMMENT_LEN,
            });
        }
        Ok(Self {
            id: RatingId::new(),
            escrow_transaction_id,
            rater_id,
            rated_user_id,
            rating,
            comment,
            flagged: false,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[test]
    fn stars_bounds() {
        assert!(Stars::new(0).is_err());
        assert!(Stars::new(6).is_err());
        for v in 1..=5 {
            assert_eq!(Stars::new(v).unwrap().value(), v);
        }
    }

    #[test]
    fn sentiment_buckets() {
        assert_eq!(Stars::new(5).unwrap().sentiment(), Sentiment::Positive);
        assert_eq!(Stars::new(4).unwrap().sentiment(), Sentiment::Positive);
        assert_eq!(Stars::new(3).unwrap().sentiment(), Sentiment::Neutral);
        assert_eq!(Stars::new(2).unwrap().sentiment(), Sentiment::Negative);
        assert_eq!(Stars::new(1).unwrap().sentiment(), Sentiment::Negative);
    }

    #[test]
    fn stars_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<Stars>("9").is_err());
        assert_eq!(serde_json::from_str::<Stars>("4").unwrap().value(), 4);
    }

    #[test]
    fn self_rating_rejected() {
        let err = TransactionRating::new(
            TransactionId::new(),
            user("alice"),
            user("alice"),
            Stars::new(5).unwrap(),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ReputationError::SelfRating(_)));
    }

    #[test]
    fn blank_comment_is_dropped() {
        let rating = TransactionRating::new(
            TransactionId::new(),
            user("alice"),
            user("bob"),
            Stars::new(5).unwrap(),
            Some("   ".into()),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(rating.comment, None);
        assert!(!rating.flagged);
    }
}
