//! # Case Bundle
//!
//! The snapshot submitted to the arbitration collaborator.

use serde::{Deserialize, Serialize};

use escrow_reputation::UserReputation;
use escrow_state::EscrowTransaction;

use crate::dispute::EscrowDispute;
use crate::proof::EscrowProof;

/// Transaction, dispute, evidence and both parties' reputation as of
/// submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBundle {
    /// The disputed transaction.
    pub transaction: EscrowTransaction,
    /// The dispute being assessed.
    pub dispute: EscrowDispute,
    /// All proofs on the transaction, oldest first.
    pub proofs: Vec<EscrowProof>,
    /// Buyer's reputation prior to the dispute's outcome.
    pub buyer_reputation: UserReputation,
    /// Seller's reputation prior to the dispute's outcome.
    pub seller_reputation: UserReputation,
}

impl CaseBundle {
    /// Proofs submitted by the buyer.
    pub fn buyer_proofs(&self) -> impl Iterator<Item = &EscrowProof> {
        self.proofs
            .iter()
            .filter(move |p| p.submitter_id == self.transaction.buyer_id)
    }

    /// Proofs submitted by the seller.
    pub fn seller_proofs(&self) -> impl Iterator<Item = &EscrowProof> {
        self.proofs
            .iter()
            .filter(move |p| p.submitter_id == self.transaction.seller_id)
    }
}
