//! # Compensation Records
//!
//! Issued `pending` when arbitration awards compensation to the winning
//! party. The settlement collaborator later reports `processed` or `failed`;
//! both are terminal and never retried automatically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrow_core::{Amount, CompensationId, DisputeId, UserId};

use crate::error::ArbitrationError;

/// Settlement status of a compensation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStatus {
    /// Issued, awaiting settlement.
    Pending,
    /// Paid out. Terminal.
    Processed,
    /// Settlement gave up. Terminal.
    Failed,
}

impl CompensationStatus {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further updates are accepted.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// What a compensation record relates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedEntityType {
    /// An escrow dispute.
    Dispute,
}

/// The outcome reported by settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompensationOutcome {
    /// Paid.
    Processed {
        /// Settlement reference of the payout.
        settlement_ref: String,
    },
    /// Not paid.
    Failed {
        /// Why settlement failed.
        note: String,
    },
}

/// A remedy issued by arbitration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRecord {
    /// Unique record identifier.
    pub id: CompensationId,
    /// Recipient.
    pub user_id: UserId,
    /// Amount awarded.
    pub amount: Amount,
    /// Why it was issued.
    pub reason: String,
    /// Id of the related entity.
    pub related_entity_id: String,
    /// Kind of the related entity.
    pub related_entity_type: RelatedEntityType,
    /// Settlement status.
    pub status: CompensationStatus,
    /// When it was issued.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
    /// Reference reported on success.
    pub settlement_ref: Option<String>,
    /// Note reported on failure.
    pub failure_note: Option<String>,
}

impl CompensationRecord {
    /// Issue a pending record for a dispute award.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::InvalidDecision`] for a zero amount.
    pub fn issue(
        user_id: UserId,
        amount: Amount,
        reason: String,
        dispute_id: DisputeId,
        now: DateTime<Utc>,
    ) -> Result<Self, ArbitrationError> {
        if !amount.is_positive() {
            return Err(ArbitrationError::InvalidDecision(
                "compensation amount must be greater than zero".into(),
            ));
        }
        Ok(Self {
            id: CompensationId::new(),
            user_id,
            amount,
            reason,
            related_entity_id: dispute_id.to_string(),
            related_entity_type: RelatedEntityType::Dispute,
            status: CompensationStatus::Pending,
            created_at: now,
            updated_at: now,
            settlement_ref: None,
            failure_note: None,
        })
    }

    /// Apply a settlement report. Returns `false` if the same outcome was
    /// already recorded.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::CompensationFinal`] if a different outcome
    /// is already recorded.
    pub fn record_outcome(
        &mut self,
        outcome: CompensationOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool, ArbitrationError> {
        if self.status.is_terminal() {
            let same = match (&outcome, self.status) {
                (CompensationOutcome::Processed { settlement_ref }, CompensationStatus::Processed) => {
                    self.settlement_ref.as_deref() == Some(settlement_ref.as_str())
                }
                (CompensationOutcome::Failed { note }, CompensationStatus::Failed) => {
                    self.failure_note.as_deref() == Some(note.as_str())
                }
                _ => false,
            };
            if same {
                return Ok(false);
            }
            return Err(ArbitrationError::CompensationFinal {
                compensation_id: self.id.to_string(),
                status: self.status.as_str().to_string(),
            });
        }
        match outcome {
            CompensationOutcome::Processed { settlement_ref } => {
                self.status = CompensationStatus::Processed;
                self.settlement_ref = Some(settlement_ref);
            }
            CompensationOutcome::Failed { note } => {
                self.status = CompensationStatus::Failed;
                self.failure_note = Some(note);
            }
        }
        self.updated_at = now;
        Ok(true)
    }
}
