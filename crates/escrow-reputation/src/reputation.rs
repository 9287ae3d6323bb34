//! # User Reputation
//!
//! One record per user, created on first touch and mutated only through the
//! `record_*` methods below. Each method updates a counter, recomputes the
//! score from the counters, re-evaluates the trust level and bumps
//! `version` so the store can detect lost updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrow_core::UserId;

use crate::policy::ReputationPolicy;
use crate::rating::{Sentiment, Stars};
use crate::score::overall_score;

/// Coarse reputation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Default tier.
    New,
    /// Some history and a decent score.
    Trusted,
    /// Identity verified with meaningful history.
    Verified,
    /// Identity verified, long history, excellent score.
    Elite,
    /// Accumulated too many strikes.
    Flagged,
}

impl TrustLevel {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Trusted => "trusted",
            Self::Verified => "verified",
            Self::Elite => "elite",
            Self::Flagged => "flagged",
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity verification status, set by operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Nothing submitted.
    #[default]
    Unverified,
    /// Submitted, awaiting review.
    Pending,
    /// Identity confirmed.
    Verified,
    /// Verification refused.
    Rejected,
}

/// Per-user trust metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReputation {
    /// The user.
    pub user_id: UserId,
    /// Derived score in `[0, 1]`.
    pub overall_score: f64,
    /// Transactions completed as buyer or seller.
    pub transaction_count: u64,
    /// 4–5 star ratings received.
    pub positive_ratings: u64,
    /// 1–2 star ratings received.
    pub negative_ratings: u64,
    /// Disputes this user opened.
    pub disputes_initiated: u64,
    /// Disputes resolved against this user.
    pub disputes_lost: u64,
    /// Strikes; every lost dispute adds one.
    pub strike_count: u32,
    /// Until when the user may not initiate escrows or disputes.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Current tier.
    pub trust_level: TrustLevel,
    /// Identity verification status.
    pub verification_status: VerificationStatus,
    /// Optimistic-concurrency version.
    pub version: u64,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

impl UserReputation {
    /// A fresh record for a user with no history.
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            overall_score: overall_score(0, 0, 0),
            transaction_count: 0,
            positive_ratings: 0,
            negative_ratings: 0,
            disputes_initiated: 0,
            disputes_lost: 0,
            strike_count: 0,
            cooldown_until: None,
            trust_level: TrustLevel::New,
            verification_status: VerificationStatus::Unverified,
            version: 0,
            updated_at: now,
        }
    }

    /// Whether the user is cooling down at `now`.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// A transaction this user was party to reached `COMPLETED`.
    pub fn record_completion(&mut self, policy: &ReputationPolicy, now: DateTime<Utc>) {
        self.transaction_count += 1;
        self.touch(policy, now);
    }

    /// This user received a rating.
    pub fn record_rating(&mut self, stars: Stars, policy: &ReputationPolicy, now: DateTime<Utc>) {
        match stars.sentiment() {
            Sentiment::Positive => self.positive_ratings += 1,
            Sentiment::Negative => self.negative_ratings += 1,
            Sentiment::Neutral => {}
        }
        self.touch(policy, now);
    }

    /// This user opened a dispute.
    pub fn record_dispute_initiated(&mut self, policy: &ReputationPolicy, now: DateTime<Utc>) {
        self.disputes_initiated += 1;
        self.touch(policy, now);
    }

    /// A dispute was resolved against this user: one loss, one strike, and
    /// a cooldown once the strike threshold is reached.
    pub fn record_dispute_lost(&mut self, policy: &ReputationPolicy, now: DateTime<Utc>) {
        self.disputes_lost += 1;
        self.strike_count = self.strike_count.saturating_add(1);
        if let Some(cooldown) = policy.cooldown_for(self.strike_count) {
            let until = now.checked_add_signed(cooldown).unwrap_or(now);
            self.cooldown_until = Some(self.cooldown_until.map_or(until, |u| u.max(until)));
        }
        self.touch(policy, now);
    }

    /// Operator-set identity verification.
    pub fn set_verification(
        &mut self,
        status: VerificationStatus,
        policy: &ReputationPolicy,
        now: DateTime<Utc>,
    ) {
        self.verification_status = status;
        self.touch(policy, now);
    }

    fn touch(&mut self, policy: &ReputationPolicy, now: DateTime<Utc>) {
        self.overall_score = overall_score(
            self.positive_ratings,
            self.negative_ratings,
            self.transaction_count,
        );
        self.trust_level = self.evaluate(policy);
        self.version += 1;
        self.updated_at = now;
    }

    fn evaluate(&self, policy: &ReputationPolicy) -> TrustLevel {
        let verified = self.verification_status == VerificationStatus::Verified;
        if self.strike_count >= policy.strike_threshold {
            TrustLevel::Flagged
        } else if verified
            && self.transaction_count >= policy.elite_min_transactions
            && self.overall_score >= policy.elite_min_score
        {
            TrustLevel::Elite
        } else if verified && self.transaction_count >= policy.verified_min_transactions {
            TrustLevel::Verified
        } else if self.transaction_count >= policy.trusted_min_transactions
            && self.overall_score >= policy.trusted_min_score
        {
            TrustLevel::Trusted
        } else {
            TrustLevel::New
        }
    }
}
