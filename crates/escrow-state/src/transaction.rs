//! # Escrow Transaction
//!
//! The unit of custody and its guarded transitions.
//!
//! ## Design Choice: Validated Enum over Typestate
//!
//! Transactions are loaded from storage and addressed by id in requests, so
//! the status is never known at compile time. Each transition is a dedicated
//! method taking the typed input its guard needs (a deposit confirmation, a
//! release receipt, a proof count). The method checks the edge and the guard
//! first and only then mutates, so every rejection leaves the transaction
//! exactly as it was.
//!
//! Role checks (is this actor the buyer?) belong to the authorization guard
//! in `escrow-engine`; methods here record the actor for the audit chain.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrow_core::{Actor, Amount, DisputeId, TransactionId, UserId};

use crate::audit::AuditEntry;
use crate::error::TransitionError;
use crate::event::TransitionEvent;
use crate::status::EscrowStatus;

const MAX_DESCRIPTION_LEN: usize = 2000;
const MAX_TOKEN_SYMBOL_LEN: usize = 16;

// ── Inputs ─────────────────────────────────────────────────────────────

/// A party's role on a particular transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    /// The party whose funds are held.
    Buyer,
    /// The party delivering goods or services.
    Seller,
}

/// Everything needed to open a new escrow.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// The seller (creator).
    pub seller_id: UserId,
    /// The buyer.
    pub buyer_id: UserId,
    /// Amount to hold. Must be positive.
    pub amount: Amount,
    /// Token or currency symbol (e.g. `USD`, `USDC`).
    pub token_symbol: String,
    /// What is being bought.
    pub description: String,
    /// Settlement network identifier, opaque to the engine.
    pub chain_id: Option<String>,
    /// Optional deadline after which the sweep intervenes.
    pub expires_at: Option<DateTime<Utc>>,
    /// Caller-defined metadata.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Settlement collaborator's confirmation that the buyer's deposit arrived.
#[derive(Debug, Clone)]
pub struct DepositConfirmation {
    /// Reference of the deposit in the settlement system, if any.
    pub settlement_ref: Option<String>,
}

/// Settlement collaborator's receipt for a release to the seller.
#[derive(Debug, Clone)]
pub struct ReleaseReceipt {
    /// Reference of the release in the settlement system.
    pub settlement_ref: String,
}

/// How a closed dispute disposed of the funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// Everything (less fee) released to the seller.
    ReleasedToSeller,
    /// Funds wholly or partly returned to the buyer.
    RefundedToBuyer,
}

/// Input for `DISPUTED → COMPLETED | REFUNDED`.
#[derive(Debug, Clone)]
pub struct DisputeSettlement {
    /// The dispute that decided the outcome.
    pub dispute_id: DisputeId,
    /// Whether that dispute has reached `CLOSED`.
    pub dispute_closed: bool,
    /// Which way the funds went.
    pub outcome: DisputeOutcome,
    /// Settlement reference(s) for the movements performed.
    pub settlement_ref: String,
}

/// A payout the settlement rail has been asked for but the ledger has not
/// yet recorded.
///
/// While one is pending the transaction refuses every transition other
/// than the one the payout completes, so the funds cannot be claimed twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingSettlement {
    /// Release to the seller, completing the transaction.
    Release,
    /// Refund to the buyer, cancelling the transaction.
    Refund,
}

impl PendingSettlement {
    /// The status the payout leads to.
    pub fn target(&self) -> EscrowStatus {
        match self {
            Self::Release => EscrowStatus::Completed,
            Self::Refund => EscrowStatus::Cancelled,
        }
    }

    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Refund => "refund",
        }
    }
}

impl std::fmt::Display for PendingSettlement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-party consent to cancel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationConsent {
    /// Buyer has asked to cancel.
    pub buyer: bool,
    /// Seller has asked to cancel.
    pub seller: bool,
}

// ── The Transaction ────────────────────────────────────────────────────

/// An escrow transaction.
///
/// ## Security Invariant
///
/// `status` is private and only changes through the transition methods,
/// each of which appends to the hash-chained audit log and bumps
/// `version`. Terminal statuses reject every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowTransaction {
    /// Unique transaction identifier.
    pub id: TransactionId,
    /// The seller.
    pub seller_id: UserId,
    /// The buyer.
    pub buyer_id: UserId,
    /// Amount held in escrow.
    pub amount: Amount,
    /// Token or currency symbol.
    pub token_symbol: String,
    /// What is being bought.
    pub description: String,
    status: EscrowStatus,
    /// Settlement network identifier.
    pub chain_id: Option<String>,
    /// Fee retained by the escrow service on release.
    pub escrow_fee: Amount,
    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
    /// When the deposit was confirmed.
    pub funded_at: Option<DateTime<Utc>>,
    /// When the seller submitted evidence.
    pub evidence_submitted_at: Option<DateTime<Utc>>,
    /// When the evidence was accepted.
    pub verified_at: Option<DateTime<Utc>>,
    /// When a dispute was opened.
    pub disputed_at: Option<DateTime<Utc>>,
    /// When the transaction reached `COMPLETED`.
    pub completed_at: Option<DateTime<Utc>>,
    /// When funds were released to the seller.
    pub released_at: Option<DateTime<Utc>>,
    /// When funds were returned to the buyer.
    pub refunded_at: Option<DateTime<Utc>>,
    /// When the transaction was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Deadline enforced by the expiry sweep.
    pub expires_at: Option<DateTime<Utc>>,
    /// Latest settlement reference, opaque to the engine.
    pub settlement_ref: Option<String>,
    /// Caller-defined metadata.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Cancellation consent recorded so far.
    pub cancellation: CancellationConsent,
    #[serde(default)]
    pending_settlement: Option<PendingSettlement>,
    version: u64,
    audit_log: Vec<AuditEntry>,
}

impl EscrowTransaction {
    /// Create a transaction in [`EscrowStatus::Initiated`].
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::InvalidTransaction`] if the amount is not
    /// positive, buyer and seller are the same user, the fee exceeds the
    /// amount, the token symbol or description is malformed, or the expiry
    /// is not in the future.
    pub fn initiate(
        new: NewTransaction,
        escrow_fee: Amount,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        if !new.amount.is_positive() {
            return Err(TransitionError::InvalidTransaction(
                "amount must be greater than zero".to_string(),
            ));
        }
        if new.buyer_id == new.seller_id {
            return Err(TransitionError::InvalidTransaction(
                "buyer and seller must be different users".to_string(),
            ));
        }
        if escrow_fee > new.amount {
            return Err(TransitionError::InvalidTransaction(format!(
                "escrow fee {escrow_fee} exceeds amount {}",
                new.amount
            )));
        }
        let symbol = new.token_symbol.trim();
        if symbol.is_empty()
            || symbol.len() > MAX_TOKEN_SYMBOL_LEN
            || !symbol.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(TransitionError::InvalidTransaction(format!(
                "token symbol \"{}\" must be 1-{MAX_TOKEN_SYMBOL_LEN} ASCII letters or digits",
                new.token_symbol
            )));
        }
        if new.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(TransitionError::InvalidTransaction(format!(
                "description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if let Some(expires_at) = new.expires_at {
            if expires_at <= now {
                return Err(TransitionError::InvalidTransaction(
                    "expires_at must be in the future".to_string(),
                ));
            }
        }

        let genesis = AuditEntry::next(
            None,
            None,
            EscrowStatus::Initiated,
            "create",
            actor.label(),
            now,
        );
        Ok(Self {
            id: TransactionId::new(),
            seller_id: new.seller_id,
            buyer_id: new.buyer_id,
            amount: new.amount,
            token_symbol: symbol.to_string(),
            description: new.description,
            status: EscrowStatus::Initiated,
            chain_id: new.chain_id,
            escrow_fee,
            created_at: now,
            funded_at: None,
            evidence_submitted_at: None,
            verified_at: None,
            disputed_at: None,
            completed_at: None,
            released_at: None,
            refunded_at: None,
            cancelled_at: None,
            expires_at: new.expires_at,
            settlement_ref: None,
            metadata: new.metadata,
            cancellation: CancellationConsent::default(),
            pending_settlement: None,
            version: 0,
            audit_log: vec![genesis],
        })
    }

    // ── Accessors ──────────────────────────────────────────────────────

    /// Current status.
    pub fn status(&self) -> EscrowStatus {
        self.status
    }

    /// Optimistic-concurrency version; bumped by every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The payout in flight, if any.
    pub fn pending_settlement(&self) -> Option<PendingSettlement> {
        self.pending_settlement
    }

    /// The append-only audit log.
    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit_log
    }

    /// The role `user` plays on this transaction, if any.
    pub fn role_of(&self, user: &UserId) -> Option<PartyRole> {
        if *user == self.buyer_id {
            Some(PartyRole::Buyer)
        } else if *user == self.seller_id {
            Some(PartyRole::Seller)
        } else {
            None
        }
    }

    /// Whether `user` is the buyer or the seller.
    pub fn is_party(&self, user: &UserId) -> bool {
        self.role_of(user).is_some()
    }

    /// The other party from `user`'s point of view.
    pub fn counterparty_of(&self, user: &UserId) -> Option<&UserId> {
        match self.role_of(user)? {
            PartyRole::Buyer => Some(&self.seller_id),
            PartyRole::Seller => Some(&self.buyer_id),
        }
    }

    /// The user holding `role`.
    pub fn party(&self, role: PartyRole) -> &UserId {
        match role {
            PartyRole::Buyer => &self.buyer_id,
            PartyRole::Seller => &self.seller_id,
        }
    }

    /// What the seller receives on a full release: amount less fee.
    pub fn seller_payout(&self) -> Amount {
        self.amount
            .checked_sub(self.escrow_fee)
            .unwrap_or(Amount::ZERO)
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    // ── Settlement Reservation ─────────────────────────────────────────

    /// Reserve the funds for a payout before the settlement rail is asked
    /// to move them. The status is unchanged; the reservation is recorded
    /// in the audit chain and bumps the version.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if another payout is already pending or
    /// the payout's target is not an edge from the current status.
    pub fn begin_settlement(
        &mut self,
        kind: PendingSettlement,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if let Some(pending) = self.pending_settlement {
            return Err(self.guard_failed(
                kind.target(),
                &format!("a {} is already being settled", pending.as_str()),
            ));
        }
        self.require_edge(kind.target())?;
        self.pending_settlement = Some(kind);
        let action = format!("{}_pending", kind.as_str());
        self.record(self.status, &action, actor, now);
        Ok(())
    }

    /// Drop a reservation whose payout failed, reopening the transaction
    /// to other transitions. No-op when nothing is pending.
    pub fn abandon_settlement(&mut self, actor: &Actor, now: DateTime<Utc>) {
        if let Some(kind) = self.pending_settlement.take() {
            let action = format!("{}_abandoned", kind.as_str());
            self.record(self.status, &action, actor, now);
        }
    }

    // ── Transitions ────────────────────────────────────────────────────

    /// `INITIATED → FUNDED` once the deposit is confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the transaction is not `INITIATED`.
    pub fn fund(
        &mut self,
        actor: &Actor,
        confirmation: DepositConfirmation,
        now: DateTime<Utc>,
    ) -> Result<TransitionEvent, TransitionError> {
        self.require_edge(EscrowStatus::Funded)?;
        self.funded_at = Some(now);
        if confirmation.settlement_ref.is_some() {
            self.settlement_ref = confirmation.settlement_ref;
        }
        Ok(self.apply(EscrowStatus::Funded, "fund", actor, now))
    }

    /// `FUNDED → EVIDENCE_SUBMITTED`; requires at least one proof on file.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if not `FUNDED` or `proof_count` is zero.
    pub fn submit_evidence(
        &mut self,
        actor: &Actor,
        proof_count: usize,
        now: DateTime<Utc>,
    ) -> Result<TransitionEvent, TransitionError> {
        self.require_edge(EscrowStatus::EvidenceSubmitted)?;
        if proof_count == 0 {
            return Err(self.guard_failed(
                EscrowStatus::EvidenceSubmitted,
                "at least one proof must be submitted first",
            ));
        }
        self.evidence_submitted_at = Some(now);
        Ok(self.apply(EscrowStatus::EvidenceSubmitted, "submit_evidence", actor, now))
    }

    /// `EVIDENCE_SUBMITTED → VERIFIED`; requires no open dispute.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if not `EVIDENCE_SUBMITTED` or a dispute is open.
    pub fn verify(
        &mut self,
        actor: &Actor,
        has_open_dispute: bool,
        now: DateTime<Utc>,
    ) -> Result<TransitionEvent, TransitionError> {
        self.require_edge(EscrowStatus::Verified)?;
        if has_open_dispute {
            return Err(self.guard_failed(EscrowStatus::Verified, "a dispute is open"));
        }
        self.verified_at = Some(now);
        Ok(self.apply(EscrowStatus::Verified, "verify", actor, now))
    }

    /// `VERIFIED → COMPLETED` after the settlement collaborator released funds.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if not `VERIFIED` or the receipt is empty.
    pub fn release(
        &mut self,
        actor: &Actor,
        receipt: ReleaseReceipt,
        now: DateTime<Utc>,
    ) -> Result<TransitionEvent, TransitionError> {
        if self.status == EscrowStatus::Disputed {
            return Err(self.guard_failed(
                EscrowStatus::Completed,
                "disputed funds are released only by arbitration",
            ));
        }
        self.require_edge(EscrowStatus::Completed)?;
        if receipt.settlement_ref.trim().is_empty() {
            return Err(self.guard_failed(
                EscrowStatus::Completed,
                "release was not confirmed by settlement",
            ));
        }
        self.settlement_ref = Some(receipt.settlement_ref);
        self.released_at = Some(now);
        self.completed_at = Some(now);
        self.pending_settlement = None;
        Ok(self.apply(EscrowStatus::Completed, "release", actor, now))
    }

    /// `{FUNDED, EVIDENCE_SUBMITTED, VERIFIED} → DISPUTED`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the status is not disputable or a
    /// dispute is already open.
    pub fn open_dispute(
        &mut self,
        actor: &Actor,
        has_open_dispute: bool,
        now: DateTime<Utc>,
    ) -> Result<TransitionEvent, TransitionError> {
        self.require_edge(EscrowStatus::Disputed)?;
        if has_open_dispute {
            return Err(self.guard_failed(EscrowStatus::Disputed, "a dispute is already open"));
        }
        self.disputed_at = Some(now);
        Ok(self.apply(EscrowStatus::Disputed, "open_dispute", actor, now))
    }

    /// `DISPUTED → COMPLETED | REFUNDED` once the dispute has closed.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if not `DISPUTED` or the dispute is not closed.
    pub fn settle_dispute(
        &mut self,
        actor: &Actor,
        settlement: DisputeSettlement,
        now: DateTime<Utc>,
    ) -> Result<TransitionEvent, TransitionError> {
        let target = match settlement.outcome {
            DisputeOutcome::ReleasedToSeller => EscrowStatus::Completed,
            DisputeOutcome::RefundedToBuyer => EscrowStatus::Refunded,
        };
        if self.status != EscrowStatus::Disputed {
            self.ensure_mutable()?;
            return Err(self.guard_failed(target, "transaction is not under dispute"));
        }
        if !settlement.dispute_closed {
            return Err(self.guard_failed(
                target,
                &format!("dispute {} is not closed", settlement.dispute_id),
            ));
        }
        self.settlement_ref = Some(settlement.settlement_ref);
        match settlement.outcome {
            DisputeOutcome::ReleasedToSeller => {
                self.released_at = Some(now);
                self.completed_at = Some(now);
            }
            DisputeOutcome::RefundedToBuyer => {
                self.refunded_at = Some(now);
            }
        }
        Ok(self.apply(target, "settle_dispute", actor, now))
    }

    /// Record one party's consent to cancel. When both parties have
    /// consented the transaction moves to `CANCELLED` and the event is
    /// returned; otherwise only the consent is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if cancellation is not possible from the
    /// current status or evidence has already been submitted.
    pub fn consent_to_cancel(
        &mut self,
        actor: &Actor,
        role: PartyRole,
        proof_count: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<TransitionEvent>, TransitionError> {
        self.require_edge(EscrowStatus::Cancelled)?;
        if proof_count > 0 {
            return Err(self.guard_failed(
                EscrowStatus::Cancelled,
                "evidence has already been submitted",
            ));
        }
        let mut consent = self.cancellation;
        match role {
            PartyRole::Buyer => consent.buyer = true,
            PartyRole::Seller => consent.seller = true,
        }
        if consent.buyer && consent.seller {
            self.cancellation = consent;
            self.cancelled_at = Some(now);
            self.pending_settlement = None;
            return Ok(Some(self.apply(
                EscrowStatus::Cancelled,
                "cancel",
                actor,
                now,
            )));
        }
        if consent != self.cancellation {
            self.cancellation = consent;
            self.record(self.status, "cancel_consent", actor, now);
        }
        Ok(None)
    }

    /// `INITIATED → CANCELLED` when the deadline passed before funding.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if not `INITIATED` or not yet expired.
    pub fn cancel_expired(&mut self, now: DateTime<Utc>) -> Result<TransitionEvent, TransitionError> {
        self.require_edge(EscrowStatus::Cancelled)?;
        if self.status != EscrowStatus::Initiated {
            return Err(self.guard_failed(
                EscrowStatus::Cancelled,
                "only unfunded transactions are cancelled on expiry",
            ));
        }
        if !self.is_expired(now) {
            return Err(self.guard_failed(EscrowStatus::Cancelled, "deadline has not passed"));
        }
        self.cancelled_at = Some(now);
        Ok(self.apply(EscrowStatus::Cancelled, "expire", &Actor::System, now))
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn ensure_mutable(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal {
                transaction_id: self.id.to_string(),
                status: self.status,
            });
        }
        Ok(())
    }

    fn require_edge(&self, target: EscrowStatus) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        if let Some(pending) = self.pending_settlement {
            if pending.target() != target {
                return Err(self.guard_failed(
                    target,
                    &format!("a {} is being settled", pending.as_str()),
                ));
            }
        }
        if !self.status.can_transition_to(target) {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: target,
                reason: format!(
                    "allowed targets from {} are {:?}",
                    self.status,
                    self.status
                        .valid_transitions()
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                ),
            });
        }
        Ok(())
    }

    fn guard_failed(&self, target: EscrowStatus, reason: &str) -> TransitionError {
        TransitionError::InvalidTransition {
            from: self.status,
            to: target,
            reason: reason.to_string(),
        }
    }

    fn apply(
        &mut self,
        target: EscrowStatus,
        action: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> TransitionEvent {
        let from = self.status;
        self.record(target, action, actor, now);
        self.status = target;
        TransitionEvent::new(self.id, from, target, actor.clone(), now)
    }

    fn record(&mut self, to: EscrowStatus, action: &str, actor: &Actor, now: DateTime<Utc>) {
        let entry = AuditEntry::next(
            self.audit_log.last(),
            Some(self.status),
            to,
            action,
            actor.label(),
            now,
        );
        self.audit_log.push(entry);
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::verify_chain;
    use chrono::Duration;

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn seller() -> Actor {
        Actor::User(user("seller"))
    }

    fn buyer() -> Actor {
        Actor::User(user("buyer"))
    }

    fn new_tx() -> NewTransaction {
        NewTransaction {
            seller_id: user("seller"),
            buyer_id: user("buyer"),
            amount: Amount::from_units(100),
            token_symbol: "USD".to_string(),
            description: "vintage synthesizer".to_string(),
            chain_id: None,
            expires_at: None,
            metadata: BTreeMap::new(),
        }
    }

    fn initiated() -> EscrowTransaction {
        EscrowTransaction::initiate(new_tx(), Amount::from_units(1), &seller(), Utc::now()).unwrap()
    }

    fn funded() -> EscrowTransaction {
        let mut tx = initiated();
        tx.fund(
            &buyer(),
            DepositConfirmation {
                settlement_ref: Some("dep-1".into()),
            },
            Utc::now(),
        )
        .unwrap();
        tx
    }

    fn verified() -> EscrowTransaction {
        let mut tx = funded();
        tx.submit_evidence(&seller(), 1, Utc::now()).unwrap();
        tx.verify(&buyer(), false, Utc::now()).unwrap();
        tx
    }

    #[test]
    fn initiate_starts_in_initiated_with_genesis_audit() {
        let tx = initiated();
        assert_eq!(tx.status(), EscrowStatus::Initiated);
        assert_eq!(tx.version(), 0);
        assert_eq!(tx.audit_log().len(), 1);
        assert_eq!(tx.audit_log()[0].from_status, None);
        assert_eq!(tx.seller_payout(), Amount::from_units(99));
    }

    #[test]
    fn initiate_rejects_zero_amount() {
        let mut req = new_tx();
        req.amount = Amount::ZERO;
        let err = EscrowTransaction::initiate(req, Amount::ZERO, &seller(), Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransaction(_)));
    }

    #[test]
    fn initiate_rejects_self_dealing() {
        let mut req = new_tx();
        req.buyer_id = user("seller");
        assert!(EscrowTransaction::initiate(req, Amount::ZERO, &seller(), Utc::now()).is_err());
    }

    #[test]
    fn initiate_rejects_past_expiry_and_bad_symbol() {
        let mut req = new_tx();
        req.expires_at = Some(Utc::now() - Duration::minutes(1));
        assert!(EscrowTransaction::initiate(req, Amount::ZERO, &seller(), Utc::now()).is_err());

        let mut req = new_tx();
        req.token_symbol = "US D".into();
        assert!(EscrowTransaction::initiate(req, Amount::ZERO, &seller(), Utc::now()).is_err());
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut tx = verified();
        let event = tx
            .release(
                &buyer(),
                ReleaseReceipt {
                    settlement_ref: "rel-1".into(),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(event.from_status, EscrowStatus::Verified);
        assert_eq!(event.to_status, EscrowStatus::Completed);
        assert_eq!(tx.status(), EscrowStatus::Completed);
        assert_eq!(tx.settlement_ref.as_deref(), Some("rel-1"));
        assert!(tx.completed_at.is_some());
        assert_eq!(tx.version(), 4);
        assert!(verify_chain(tx.audit_log()));
    }

    #[test]
    fn evidence_before_funding_is_rejected_without_mutation() {
        let mut tx = initiated();
        let before = tx.clone();
        let err = tx.submit_evidence(&seller(), 1, Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert_eq!(tx, before);
    }

    #[test]
    fn evidence_requires_a_proof() {
        let mut tx = funded();
        let before = tx.clone();
        assert!(tx.submit_evidence(&seller(), 0, Utc::now()).is_err());
        assert_eq!(tx, before);
    }

    #[test]
    fn verify_blocked_by_open_dispute() {
        let mut tx = funded();
        tx.submit_evidence(&seller(), 2, Utc::now()).unwrap();
        assert!(tx.verify(&buyer(), true, Utc::now()).is_err());
        assert_eq!(tx.status(), EscrowStatus::EvidenceSubmitted);
    }

    #[test]
    fn release_requires_settlement_reference() {
        let mut tx = verified();
        let before = tx.clone();
        assert!(tx
            .release(
                &buyer(),
                ReleaseReceipt {
                    settlement_ref: "  ".into()
                },
                Utc::now()
            )
            .is_err());
        assert_eq!(tx, before);
    }

    #[test]
    fn dispute_then_refund() {
        let mut tx = funded();
        tx.open_dispute(&buyer(), false, Utc::now()).unwrap();
        assert_eq!(tx.status(), EscrowStatus::Disputed);

        let dispute_id = DisputeId::new();
        let open = tx.settle_dispute(
            &Actor::System,
            DisputeSettlement {
                dispute_id,
                dispute_closed: false,
                outcome: DisputeOutcome::RefundedToBuyer,
                settlement_ref: "ref-1".into(),
            },
            Utc::now(),
        );
        assert!(open.is_err());

        tx.settle_dispute(
            &Actor::System,
            DisputeSettlement {
                dispute_id,
                dispute_closed: true,
                outcome: DisputeOutcome::RefundedToBuyer,
                settlement_ref: "ref-1".into(),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(tx.status(), EscrowStatus::Refunded);
        assert!(tx.refunded_at.is_some());
    }

    #[test]
    fn second_dispute_rejected() {
        let mut tx = funded();
        assert!(tx.open_dispute(&seller(), true, Utc::now()).is_err());
        assert_eq!(tx.status(), EscrowStatus::Funded);
    }

    #[test]
    fn disputed_cannot_be_released_directly() {
        let mut tx = verified();
        tx.open_dispute(&buyer(), false, Utc::now()).unwrap();
        let err = tx
            .release(
                &buyer(),
                ReleaseReceipt {
                    settlement_ref: "x".into(),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn joint_cancellation_needs_both_parties() {
        let mut tx = funded();
        let first = tx
            .consent_to_cancel(&buyer(), PartyRole::Buyer, 0, Utc::now())
            .unwrap();
        assert!(first.is_none());
        assert_eq!(tx.status(), EscrowStatus::Funded);
        assert!(tx.cancellation.buyer);

        let repeat = tx
            .consent_to_cancel(&buyer(), PartyRole::Buyer, 0, Utc::now())
            .unwrap();
        assert!(repeat.is_none());

        let second = tx
            .consent_to_cancel(&seller(), PartyRole::Seller, 0, Utc::now())
            .unwrap();
        assert_eq!(second.unwrap().to_status, EscrowStatus::Cancelled);
        assert_eq!(tx.status(), EscrowStatus::Cancelled);
        assert!(verify_chain(tx.audit_log()));
    }

    #[test]
    fn pending_release_blocks_dispute_until_applied() {
        let mut tx = verified();
        tx.begin_settlement(PendingSettlement::Release, &buyer(), Utc::now())
            .unwrap();
        assert_eq!(tx.status(), EscrowStatus::Verified);
        assert_eq!(tx.version(), 4);

        let before = tx.clone();
        assert!(tx.open_dispute(&seller(), false, Utc::now()).is_err());
        assert!(tx
            .begin_settlement(PendingSettlement::Release, &buyer(), Utc::now())
            .is_err());
        assert_eq!(tx, before);

        tx.release(
            &buyer(),
            ReleaseReceipt {
                settlement_ref: "rel-1".into(),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(tx.pending_settlement(), None);
        assert_eq!(tx.status(), EscrowStatus::Completed);
        assert!(verify_chain(tx.audit_log()));
    }

    #[test]
    fn pending_refund_blocks_evidence_and_dispute() {
        let mut tx = funded();
        tx.consent_to_cancel(&buyer(), PartyRole::Buyer, 0, Utc::now())
            .unwrap();
        tx.begin_settlement(PendingSettlement::Refund, &seller(), Utc::now())
            .unwrap();
        assert!(tx.submit_evidence(&seller(), 1, Utc::now()).is_err());
        assert!(tx.open_dispute(&buyer(), false, Utc::now()).is_err());

        let event = tx
            .consent_to_cancel(&seller(), PartyRole::Seller, 0, Utc::now())
            .unwrap();
        assert_eq!(event.unwrap().to_status, EscrowStatus::Cancelled);
        assert_eq!(tx.pending_settlement(), None);
    }

    #[test]
    fn abandoned_settlement_reopens_transitions() {
        let mut tx = funded();
        tx.begin_settlement(PendingSettlement::Refund, &buyer(), Utc::now())
            .unwrap();
        tx.abandon_settlement(&Actor::System, Utc::now());
        assert_eq!(tx.pending_settlement(), None);
        let actions: Vec<_> = tx.audit_log().iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, ["create", "fund", "refund_pending", "refund_abandoned"]);

        tx.open_dispute(&buyer(), false, Utc::now()).unwrap();
        assert_eq!(tx.status(), EscrowStatus::Disputed);
        assert!(verify_chain(tx.audit_log()));
    }

    #[test]
    fn release_cannot_be_reserved_before_verification() {
        let mut tx = funded();
        let before = tx.clone();
        assert!(tx
            .begin_settlement(PendingSettlement::Release, &buyer(), Utc::now())
            .is_err());
        assert_eq!(tx, before);
    }

    #[test]
    fn cancellation_blocked_after_evidence() {
        let mut tx = funded();
        assert!(tx
            .consent_to_cancel(&buyer(), PartyRole::Buyer, 1, Utc::now())
            .is_err());
        assert!(!tx.cancellation.buyer);
    }

    #[test]
    fn expired_unfunded_is_cancelled() {
        let now = Utc::now();
        let mut req = new_tx();
        req.expires_at = Some(now + Duration::hours(1));
        let mut tx = EscrowTransaction::initiate(req, Amount::ZERO, &seller(), now).unwrap();
        assert!(tx.cancel_expired(now).is_err());
        let event = tx.cancel_expired(now + Duration::hours(2)).unwrap();
        assert_eq!(event.actor, Actor::System);
        assert_eq!(tx.status(), EscrowStatus::Cancelled);
    }

    #[test]
    fn terminal_transactions_reject_everything() {
        let mut tx = funded();
        tx.consent_to_cancel(&buyer(), PartyRole::Buyer, 0, Utc::now())
            .unwrap();
        tx.consent_to_cancel(&seller(), PartyRole::Seller, 0, Utc::now())
            .unwrap();
        let before = tx.clone();

        let results = [
            tx.fund(&buyer(), DepositConfirmation { settlement_ref: None }, Utc::now())
                .map(|_| ()),
            tx.submit_evidence(&seller(), 1, Utc::now()).map(|_| ()),
            tx.verify(&buyer(), false, Utc::now()).map(|_| ()),
            tx.open_dispute(&buyer(), false, Utc::now()).map(|_| ()),
            tx.cancel_expired(Utc::now()).map(|_| ()),
        ];
        for result in results {
            assert!(matches!(result, Err(TransitionError::Terminal { .. })));
        }
        assert_eq!(tx, before);
    }

    #[test]
    fn roles_and_counterparty() {
        let tx = initiated();
        assert_eq!(tx.role_of(&user("buyer")), Some(PartyRole::Buyer));
        assert_eq!(tx.role_of(&user("seller")), Some(PartyRole::Seller));
        assert_eq!(tx.role_of(&user("mallory")), None);
        assert_eq!(tx.counterparty_of(&user("buyer")), Some(&user("seller")));
        assert_eq!(tx.party(PartyRole::Seller), &user("seller"));
    }

    #[test]
    fn serde_round_trip_preserves_private_state() {
        let tx = verified();
        let json = serde_json::to_string(&tx).unwrap();
        let back: EscrowTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status(), EscrowStatus::Verified);
        assert_eq!(back.version(), tx.version());
        assert!(verify_chain(back.audit_log()));
    }
}
