//! # Delivery Evidence
//!
//! Proofs are submitted by either party while the transaction is live and
//! become immutable once an operator verifies them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrow_core::{ProofId, TransactionId, UserId};

use crate::error::ArbitrationError;

const MAX_DESCRIPTION_LEN: usize = 2000;
const MAX_CONTENT_REF_LEN: usize = 2048;

/// Kind of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    /// Carrier tracking number.
    TrackingNumber,
    /// Shipping or postage receipt.
    ShippingReceipt,
    /// Photograph of goods or packaging.
    Photo,
    /// Document such as an invoice or signed delivery note.
    Document,
    /// Delivery confirmation from a carrier or platform.
    DeliveryConfirmation,
    /// Free-text statement.
    Statement,
}

impl ProofType {
    /// Whether a proof of this type must reference stored content.
    pub fn requires_content(&self) -> bool {
        !matches!(self, Self::Statement)
    }
}

/// Input for a new proof.
#[derive(Debug, Clone)]
pub struct NewProof {
    /// Kind of evidence.
    pub proof_type: ProofType,
    /// What the proof shows.
    pub description: String,
    /// Reference to stored content (URL, content hash, tracking number).
    pub content_ref: Option<String>,
}

/// A piece of evidence attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowProof {
    /// Unique proof identifier.
    pub id: ProofId,
    /// Owning transaction.
    pub escrow_transaction_id: TransactionId,
    /// The party who submitted it.
    pub submitter_id: UserId,
    /// Kind of evidence.
    pub proof_type: ProofType,
    /// What the proof shows.
    pub description: String,
    /// Reference to stored content.
    pub content_ref: Option<String>,
    /// When it was submitted.
    pub submitted_at: DateTime<Utc>,
    /// Set by an operator; the proof is immutable afterwards.
    pub verified: bool,
    /// When it was verified.
    pub verified_at: Option<DateTime<Utc>>,
    /// Who verified it (actor label).
    pub verified_by: Option<String>,
    /// Operator notes.
    pub verification_notes: Option<String>,
}

impl EscrowProof {
    /// Build a proof. Party membership and transaction status are checked
    /// by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::InvalidProof`] if a content reference is
    /// required but missing, a statement has no text, or a field is too long.
    pub fn submit(
        escrow_transaction_id: TransactionId,
        submitter_id: UserId,
        new: NewProof,
        now: DateTime<Utc>,
    ) -> Result<Self, ArbitrationError> {
        let content_ref = new
            .content_ref
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if new.proof_type.requires_content() && content_ref.is_none() {
            return Err(ArbitrationError::InvalidProof(
                "content_ref is required for this proof type".into(),
            ));
        }
        if content_ref
            .as_ref()
            .is_some_and(|c| c.len() > MAX_CONTENT_REF_LEN)
        {
            return Err(ArbitrationError::InvalidProof(format!(
                "content_ref exceeds {MAX_CONTENT_REF_LEN} bytes"
            )));
        }
        let description = new.description.trim().to_string();
        if new.proof_type == ProofType::Statement && description.is_empty() {
            return Err(ArbitrationError::InvalidProof(
                "a statement needs a description".into(),
            ));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ArbitrationError::InvalidProof(format!(
                "description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        Ok(Self {
            id: ProofId::new(),
            escrow_transaction_id,
            submitter_id,
            proof_type: new.proof_type,
            description,
            content_ref,
            submitted_at: now,
            verified: false,
            verified_at: None,
            verified_by: None,
            verification_notes: None,
        })
    }

    /// Mark verified.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::InvalidProof`] if already verified.
    pub fn verify(
        &mut self,
        verified_by: &str,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ArbitrationError> {
        if self.verified {
            return Err(ArbitrationError::InvalidProof(format!(
                "proof {} is already verified",
                self.id
            )));
        }
        self.verified = true;
        self.verified_at = Some(now);
        self.verified_by = Some(verified_by.to_string());
        self.verification_notes = notes;
        Ok(())
    }
}
