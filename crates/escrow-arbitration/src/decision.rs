//! # Arbitration Decisions and Awards
//!
//! An assessment arrives from the arbitration collaborator; a manual
//! decision arrives from an operator. Both become an [`ArbitrationDecision`]
//! on the dispute. Once a dispute resolves, the fund movements are fixed in
//! an [`Award`] and every settlement retry reuses it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use escrow_core::Amount;

use crate::error::ArbitrationError;

/// The outcome of arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Buyer wins: full refund.
    ResolvedBuyer,
    /// Seller wins: release less fee.
    ResolvedSeller,
    /// Partial refund proportional to the compensation amount.
    ResolvedSplit,
}

impl Verdict {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolvedBuyer => "resolved_buyer",
            Self::ResolvedSeller => "resolved_seller",
            Self::ResolvedSplit => "resolved_split",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// The arbitration collaborator.
    Automated,
    /// An operator.
    Manual,
}

/// What the arbitration collaborator returns for a case bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Collaborator-assigned id; used for deduplication.
    pub assessment_id: String,
    /// Proposed outcome.
    pub decision: Verdict,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Free-text rationale.
    pub rationale: String,
    /// Optional compensation amount.
    pub compensation_amount: Option<Amount>,
}

impl Assessment {
    /// Reject malformed assessments.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::InvalidDecision`] for an empty assessment id
    /// or a confidence that is not a finite number in `[0, 1]`.
    pub fn validate(&self) -> Result<(), ArbitrationError> {
        if self.assessment_id.trim().is_empty() {
            return Err(ArbitrationError::InvalidDecision(
                "assessment_id must not be empty".into(),
            ));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ArbitrationError::InvalidDecision(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// A decision recorded on a dispute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationDecision {
    /// Assessment id (automated) or an operator-scoped id (manual).
    pub assessment_id: String,
    /// The outcome.
    pub verdict: Verdict,
    /// Confidence; manual decisions record `1.0`.
    pub confidence: f64,
    /// Free-text rationale.
    pub rationale: String,
    /// Optional compensation amount.
    pub compensation_amount: Option<Amount>,
    /// Automated or manual.
    pub source: DecisionSource,
    /// Who decided (actor label).
    pub decided_by: String,
    /// When the decision was recorded.
    pub decided_at: DateTime<Utc>,
}

impl ArbitrationDecision {
    /// Record an automated assessment.
    pub fn automated(assessment: &Assessment, now: DateTime<Utc>) -> Self {
        Self {
            assessment_id: assessment.assessment_id.clone(),
            verdict: assessment.decision,
            confidence: assessment.confidence,
            rationale: assessment.rationale.clone(),
            compensation_amount: assessment.compensation_amount,
            source: DecisionSource::Automated,
            decided_by: "system".into(),
            decided_at: now,
        }
    }

    /// Whether this decision awards a non-zero compensation.
    pub fn has_compensation(&self) -> bool {
        self.compensation_amount.is_some_and(|c| c.is_positive())
    }
}

/// A decision supplied by an operator for an escalated (or stuck) dispute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualDecision {
    /// The outcome.
    pub verdict: Verdict,
    /// Free-text rationale.
    pub rationale: String,
    /// Optional compensation amount.
    pub compensation_amount: Option<Amount>,
}

/// Fund movements fixed at resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    /// Returned to the buyer.
    pub buyer_refund: Amount,
    /// Released to the seller (after fee).
    pub seller_release: Amount,
    /// Refund as a percentage of the transaction amount, two decimals.
    pub refund_percent: Decimal,
}

impl Award {
    /// Compute the award for `verdict` on a transaction of `amount` with
    /// `fee` retained on any release to the seller.
    ///
    /// A split refunds `min(compensation, amount)` and releases the
    /// remainder less fee (never below zero).
    pub fn compute(
        verdict: Verdict,
        amount: Amount,
        fee: Amount,
        compensation: Option<Amount>,
    ) -> Self {
        let (buyer_refund, remainder) = match verdict {
            Verdict::ResolvedBuyer => (amount, Amount::ZERO),
            Verdict::ResolvedSeller => (Amount::ZERO, amount),
            Verdict::ResolvedSplit => {
                let refund = compensation.unwrap_or(Amount::ZERO).min(amount);
                (refund, amount.checked_sub(refund).unwrap_or(Amount::ZERO))
            }
        };
        let seller_release = if remainder.is_zero() {
            Amount::ZERO
        } else {
            remainder.checked_sub(fee).unwrap_or(Amount::ZERO)
        };
        Self {
            buyer_refund,
            seller_release,
            refund_percent: buyer_refund.percent_of(amount),
        }
    }

    /// Human-readable summary stored as the dispute's resolution detail.
    pub fn describe(&self) -> String {
        format!(
            "refund {}% ({}) to buyer; release {} to seller",
            self.refund_percent, self.buyer_refund, self.seller_release
        )
    }
}
