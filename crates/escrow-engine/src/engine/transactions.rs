//! Transaction lifecycle: creation, funding, evidence, verification,
//! release and joint cancellation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrow_arbitration::{EscrowProof, NewProof};
use escrow_core::{Actor, Amount, IdempotencyKey, TransactionId, UserId};
use escrow_state::{
    DepositConfirmation, EscrowStatus, EscrowTransaction, NewTransaction, PartyRole,
    PendingSettlement, ReleaseReceipt,
};

use super::{EscrowEngine, ReputationBatch};
use crate::collaborators::call_with_retry;
use crate::error::{EngineError, Rejection};
use crate::guard;
use crate::outbox::Outbox;
use crate::store::UnitOfWork;

/// A new escrow, opened by its seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransaction {
    /// The paying party.
    pub buyer_id: UserId,
    /// Amount held in escrow.
    pub amount: Amount,
    /// Token or currency symbol.
    pub token_symbol: String,
    /// Free-text description of the goods or service.
    #[serde(default)]
    pub description: String,
    /// Chain identifier for on-chain settlement.
    #[serde(default)]
    pub chain_id: Option<String>,
    /// Deadline for completion.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Opaque caller metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A stored proof and the transaction after it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofSubmission {
    /// The stored proof.
    pub proof: EscrowProof,
    /// The owning transaction, possibly advanced to `EVIDENCE_SUBMITTED`.
    pub transaction: EscrowTransaction,
}

impl EscrowEngine {
    /// Open an escrow. The caller becomes the seller; the fee is
    /// `fee_bps` of the amount.
    pub async fn create_transaction(
        &self,
        actor: &Actor,
        request: CreateTransaction,
        key: Option<&IdempotencyKey>,
    ) -> Result<EscrowTransaction, Rejection> {
        self.idempotent(actor, "create_transaction", key, move || async move {
            let now = self.now();
            let seller = actor.user().cloned().ok_or_else(|| {
                EngineError::Unauthorized(format!("{actor} cannot open an escrow"))
            })?;
            let reputation = self.store.reputation(&seller)?;
            guard::check_initiate(actor, reputation.as_ref(), now)?;

            let fee = request.amount.basis_points(self.config.fee_bps);
            let tx = EscrowTransaction::initiate(
                NewTransaction {
                    seller_id: seller,
                    buyer_id: request.buyer_id,
                    amount: request.amount,
                    token_symbol: request.token_symbol,
                    description: request.description,
                    chain_id: request.chain_id,
                    expires_at: request.expires_at,
                    metadata: request.metadata,
                },
                fee,
                actor,
                now,
            )?;
            let mut work = UnitOfWork::new();
            work.create_transaction(tx.clone());
            self.store.commit(work)?;

            metrics::counter!("escrow_transitions_total", "to" => EscrowStatus::Initiated.as_str())
                .increment(1);
            tracing::info!(
                transaction_id = %tx.id,
                seller = %tx.seller_id,
                buyer = %tx.buyer_id,
                amount = %tx.amount,
                fee = %tx.escrow_fee,
                "transaction created"
            );
            Ok(tx)
        })
        .await
        .map_err(|e| self.reject(None, e))
    }

    /// The buyer funds the escrow once the settlement rail confirms the
    /// deposit.
    pub async fn fund(
        &self,
        actor: &Actor,
        id: TransactionId,
        key: Option<&IdempotencyKey>,
    ) -> Result<EscrowTransaction, Rejection> {
        self.idempotent(actor, "fund", key, || self.fund_inner(actor, id))
            .await
            .map_err(|e| self.reject(Some(id), e))
    }

    /// Attach evidence. A seller's proof on a `FUNDED` transaction also
    /// moves it to `EVIDENCE_SUBMITTED`.
    pub async fn submit_proof(
        &self,
        actor: &Actor,
        id: TransactionId,
        proof: NewProof,
        key: Option<&IdempotencyKey>,
    ) -> Result<ProofSubmission, Rejection> {
        self.idempotent(actor, "submit_proof", key, || {
            self.transact(id, || {
                let mut tx = self.load_tx(id)?;
                let role = guard::check_party(actor, &tx)?;
                if !tx.status().holds_funds() {
                    return Err(EngineError::InvalidTransition(format!(
                        "transaction {id} accepts evidence only while funds are held; it is {}",
                        tx.status()
                    )));
                }
                if let Some(pending) = tx.pending_settlement() {
                    return Err(EngineError::InvalidTransition(format!(
                        "transaction {id} has a {pending} in flight and accepts no more evidence"
                    )));
                }
                let now = self.now();
                let submitter = tx.party(role).clone();
                let stored = EscrowProof::submit(id, submitter, proof.clone(), now)?;

                let mut work = UnitOfWork::new();
                work.put_proof(stored.clone());
                let mut outbox = Outbox::new();
                if role == PartyRole::Seller && tx.status() == EscrowStatus::Funded {
                    let on_file = self.store.proofs_for(id)?.len();
                    let read = tx.version();
                    outbox.push(tx.submit_evidence(actor, on_file + 1, now)?);
                    work.update_transaction(tx.clone(), read);
                }
                tracing::info!(
                    transaction_id = %id,
                    proof_id = %stored.id,
                    proof_type = ?stored.proof_type,
                    "proof recorded"
                );
                Ok((
                    work,
                    outbox,
                    ProofSubmission {
                        proof: stored,
                        transaction: tx,
                    },
                ))
            })
        })
        .await
        .map_err(|e| self.reject(Some(id), e))
    }

    /// Ask for a status change. `DISPUTED` goes through
    /// [`EscrowEngine::open_dispute`]; `REFUNDED` only through arbitration.
    pub async fn request_transition(
        &self,
        actor: &Actor,
        id: TransactionId,
        target: EscrowStatus,
        key: Option<&IdempotencyKey>,
    ) -> Result<EscrowTransaction, Rejection> {
        self.idempotent(actor, "request_transition", key, move || async move {
            match target {
                EscrowStatus::Funded => self.fund_inner(actor, id).await,
                EscrowStatus::EvidenceSubmitted => self.submit_evidence_inner(actor, id).await,
                EscrowStatus::Verified => self.verify_inner(actor, id).await,
                EscrowStatus::Completed => self.release_inner(actor, id).await,
                EscrowStatus::Cancelled => self.cancel_inner(actor, id).await,
                EscrowStatus::Initiated | EscrowStatus::Disputed | EscrowStatus::Refunded => {
                    let tx = self.load_tx(id)?;
                    guard::check_transition(actor, &tx, target)?;
                    Err(EngineError::InvalidTransition(format!(
                        "{target} cannot be requested directly"
                    )))
                }
            }
        })
        .await
        .map_err(|e| self.reject(Some(id), e))
    }

    pub(crate) async fn fund_inner(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<EscrowTransaction, EngineError> {
        let snapshot = {
            let _held = self.lock(id).await;
            let tx = self.load_tx(id)?;
            guard::check_transition(actor, &tx, EscrowStatus::Funded)?;
            tx
        };

        let deposit = call_with_retry("confirm_deposit", &self.config.retry, || {
            self.settlement.confirm_deposit(&snapshot)
        })
        .await?;
        if !deposit.confirmed {
            return Err(EngineError::InvalidTransition(format!(
                "deposit for transaction {id} has not been confirmed"
            )));
        }

        self.transact(id, || {
            let mut tx = self.load_tx(id)?;
            guard::check_transition(actor, &tx, EscrowStatus::Funded)?;
            let read = tx.version();
            let event = tx.fund(
                actor,
                DepositConfirmation {
                    settlement_ref: deposit.settlement_ref.clone(),
                },
                self.now(),
            )?;
            let mut work = UnitOfWork::new();
            work.update_transaction(tx.clone(), read);
            Ok((work, event.into(), tx))
        })
        .await
    }

    async fn submit_evidence_inner(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<EscrowTransaction, EngineError> {
        self.transact(id, || {
            let mut tx = self.load_tx(id)?;
            guard::check_transition(actor, &tx, EscrowStatus::EvidenceSubmitted)?;
            let on_file = self.store.proofs_for(id)?.len();
            let read = tx.version();
            let event = tx.submit_evidence(actor, on_file, self.now())?;
            let mut work = UnitOfWork::new();
            work.update_transaction(tx.clone(), read);
            Ok((work, event.into(), tx))
        })
        .await
    }

    pub(crate) async fn verify_inner(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<EscrowTransaction, EngineError> {
        self.transact(id, || {
            let mut tx = self.load_tx(id)?;
            guard::check_transition(actor, &tx, EscrowStatus::Verified)?;
            let open = self.has_open_dispute(id)?;
            let read = tx.version();
            let event = tx.verify(actor, open, self.now())?;
            let mut work = UnitOfWork::new();
            work.update_transaction(tx.clone(), read);
            Ok((work, event.into(), tx))
        })
        .await
    }

    /// `VERIFIED → COMPLETED`: reserve the funds, pay the seller (amount
    /// less fee), then record the completion for both parties in the same
    /// unit of work.
    ///
    /// A reservation left by an earlier attempt whose payout failed is
    /// resumed rather than refused.
    pub(crate) async fn release_inner(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<EscrowTransaction, EngineError> {
        let reserved = self
            .transact(id, || {
                let mut tx = self.load_tx(id)?;
                guard::check_transition(actor, &tx, EscrowStatus::Completed)?;
                let mut work = UnitOfWork::new();
                if tx.pending_settlement() != Some(PendingSettlement::Release) {
                    let read = tx.version();
                    tx.begin_settlement(PendingSettlement::Release, actor, self.now())?;
                    work.update_transaction(tx.clone(), read);
                    tracing::debug!(transaction_id = %id, "release reserved");
                }
                Ok((work, Outbox::new(), tx))
            })
            .await?;
        self.finish_release(actor, reserved).await
    }

    /// Pay out a reserved release and complete the transaction. On a
    /// collaborator failure the reservation stays and the sweep finishes it.
    pub(crate) async fn finish_release(
        &self,
        actor: &Actor,
        reserved: EscrowTransaction,
    ) -> Result<EscrowTransaction, EngineError> {
        let id = reserved.id;
        let receipt = call_with_retry("release_funds", &self.config.retry, || {
            self.settlement
                .release_funds(&reserved, &reserved.seller_id, reserved.seller_payout())
        })
        .await?;

        self.transact(id, || {
            let mut tx = self.load_tx(id)?;
            if tx.status() == EscrowStatus::Completed
                && tx.settlement_ref.as_deref() == Some(receipt.settlement_ref.as_str())
            {
                return Ok((UnitOfWork::new(), Outbox::new(), tx));
            }
            if tx.pending_settlement() != Some(PendingSettlement::Release) {
                tracing::error!(
                    transaction_id = %id,
                    settlement_ref = %receipt.settlement_ref,
                    status = %tx.status(),
                    "funds released without a reservation"
                );
                return Err(EngineError::IntegrityViolation(format!(
                    "funds for transaction {id} were released ({}) but it is {} with no release reserved",
                    receipt.settlement_ref,
                    tx.status()
                )));
            }
            let now = self.now();
            let read = tx.version();
            let event = tx.release(
                actor,
                ReleaseReceipt {
                    settlement_ref: receipt.settlement_ref.clone(),
                },
                now,
            )?;

            let policy = &self.config.reputation;
            let mut reputations = ReputationBatch::new(self.store.as_ref(), now);
            reputations.get(&tx.buyer_id)?.record_completion(policy, now);
            reputations.get(&tx.seller_id)?.record_completion(policy, now);

            let mut work = UnitOfWork::new();
            work.update_transaction(tx.clone(), read);
            reputations.write_into(&mut work);
            Ok((work, event.into(), tx))
        })
        .await
    }

    /// Record the actor's consent to cancel. The second consent cancels;
    /// on a funded transaction the deposit is reserved and refunded first.
    async fn cancel_inner(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<EscrowTransaction, EngineError> {
        let (tx, refund_due) = self
            .transact(id, || {
                let mut tx = self.load_tx(id)?;
                guard::check_transition(actor, &tx, EscrowStatus::Cancelled)?;
                let role = guard::check_party(actor, &tx)?;
                let now = self.now();
                let read = tx.version();
                let mut outbox = Outbox::new();
                let mut refund_due = tx.pending_settlement() == Some(PendingSettlement::Refund);
                if !refund_due {
                    let on_file = self.store.proofs_for(id)?.len();
                    let mut trial = tx.clone();
                    let cancels = trial.consent_to_cancel(actor, role, on_file, now)?.is_some();
                    if cancels && tx.status() == EscrowStatus::Funded {
                        tx.begin_settlement(PendingSettlement::Refund, actor, now)?;
                        refund_due = true;
                        tracing::debug!(transaction_id = %id, "refund reserved");
                    } else {
                        outbox.push_opt(tx.consent_to_cancel(actor, role, on_file, now)?);
                    }
                }
                let mut work = UnitOfWork::new();
                if tx.version() != read {
                    work.update_transaction(tx.clone(), read);
                }
                Ok((work, outbox, (tx, refund_due)))
            })
            .await?;
        if !refund_due {
            return Ok(tx);
        }
        self.finish_refund(actor, tx).await
    }

    /// Refund a reserved cancellation and record the outstanding consent.
    /// On a collaborator failure the reservation stays and the sweep
    /// finishes it.
    pub(crate) async fn finish_refund(
        &self,
        actor: &Actor,
        reserved: EscrowTransaction,
    ) -> Result<EscrowTransaction, EngineError> {
        let id = reserved.id;
        let receipt = call_with_retry("refund", &self.config.retry, || {
            self.settlement
                .refund(&reserved, &reserved.buyer_id, reserved.amount)
        })
        .await?;

        self.transact(id, || {
            let mut tx = self.load_tx(id)?;
            if tx.status() == EscrowStatus::Cancelled
                && tx.settlement_ref.as_deref() == Some(receipt.settlement_ref.as_str())
            {
                return Ok((UnitOfWork::new(), Outbox::new(), tx));
            }
            if tx.pending_settlement() != Some(PendingSettlement::Refund) {
                tracing::error!(
                    transaction_id = %id,
                    settlement_ref = %receipt.settlement_ref,
                    status = %tx.status(),
                    "deposit refunded without a reservation"
                );
                return Err(EngineError::IntegrityViolation(format!(
                    "deposit for transaction {id} was refunded ({}) but it is {} with no refund reserved",
                    receipt.settlement_ref,
                    tx.status()
                )));
            }
            let outstanding = if tx.cancellation.buyer {
                PartyRole::Seller
            } else {
                PartyRole::Buyer
            };
            let on_file = self.store.proofs_for(id)?.len();
            let read = tx.version();
            let event = tx
                .consent_to_cancel(actor, outstanding, on_file, self.now())?
                .ok_or_else(|| {
                    EngineError::IntegrityViolation(format!(
                        "refund reserved on transaction {id} without a pending cancellation"
                    ))
                })?;
            tx.settlement_ref = Some(receipt.settlement_ref.clone());
            tracing::info!(
                transaction_id = %id,
                settlement_ref = %receipt.settlement_ref,
                "transaction cancelled and deposit refunded"
            );
            let mut work = UnitOfWork::new();
            work.update_transaction(tx.clone(), read);
            Ok((work, event.into(), tx))
        })
        .await
    }
}
