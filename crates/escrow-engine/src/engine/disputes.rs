//! Disputes: opening, automated assessment, manual decisions, evidence
//! requests, settlement of the award, and proof verification.
//!
//! Settlement of a resolved dispute is one unit of work: the dispute
//! closes, the transaction leaves `DISPUTED`, the loser takes a strike,
//! completions are counted, and any compensation is issued. Fund movements
//! happen before that commit, outside the lock; if one fails the dispute
//! stays `RESOLVED_*` and the sweep finishes it.

use serde::{Deserialize, Serialize};

use escrow_arbitration::{
    CaseBundle, CompensationRecord, DecisionOutcome, DisputeOrigin, DisputeStatus, EscrowDispute,
    EscrowProof, ManualDecision, Verdict,
};
use escrow_core::{Actor, DisputeId, IdempotencyKey, ProofId, TransactionId};
use escrow_reputation::UserReputation;
use escrow_state::{DisputeOutcome, DisputeSettlement, EscrowStatus};

use super::{EscrowEngine, ReputationBatch};
use crate::collaborators::call_with_retry;
use crate::error::{EngineError, Rejection};
use crate::guard;
use crate::outbox::Outbox;
use crate::store::UnitOfWork;

/// A party's request to dispute a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDispute {
    /// Short reason, e.g. "item not as described".
    pub reason: String,
    /// Longer account.
    #[serde(default)]
    pub description: String,
}

impl EscrowEngine {
    /// Open a dispute and submit the case for assessment.
    ///
    /// The dispute is committed before the oracle is consulted. If the
    /// oracle is unavailable the dispute is returned in `REVIEWING` and the
    /// sweep resubmits it.
    pub async fn open_dispute(
        &self,
        actor: &Actor,
        id: TransactionId,
        request: OpenDispute,
        key: Option<&IdempotencyKey>,
    ) -> Result<EscrowDispute, Rejection> {
        self.idempotent(actor, "open_dispute", key, move || async move {
            let dispute = self
                .open_dispute_inner(actor, id, &request.reason, &request.description)
                .await?;
            self.assess_in_background_of(dispute.id).await;
            self.load_dispute(dispute.id)
        })
        .await
        .map_err(|e| self.reject(Some(id), e))
    }

    /// Operator decision for an escalated (or any undecided) dispute.
    pub async fn submit_manual_decision(
        &self,
        actor: &Actor,
        dispute_id: DisputeId,
        decision: ManualDecision,
        key: Option<&IdempotencyKey>,
    ) -> Result<EscrowDispute, Rejection> {
        self.idempotent(actor, "submit_manual_decision", key, || async {
            guard::check_operator(actor)?;
            let tx_id = self.load_dispute(dispute_id)?.escrow_transaction_id;
            let outcome = self
                .transact(tx_id, || {
                    let mut dispute = self.load_dispute(dispute_id)?;
                    let tx = self.load_tx(tx_id)?;
                    let outcome = dispute.accept_manual_decision(
                        &decision,
                        &actor.label(),
                        tx.amount,
                        tx.escrow_fee,
                        self.now(),
                    )?;
                    let mut work = UnitOfWork::new();
                    if outcome != DecisionOutcome::Ignored {
                        work.put_dispute(dispute);
                    }
                    Ok((work, Outbox::new(), outcome))
                })
                .await?;
            if let DecisionOutcome::Resolved(verdict) = outcome {
                tracing::info!(dispute_id = %dispute_id, verdict = %verdict, decided_by = %actor, "manual decision accepted");
            }
            if outcome != DecisionOutcome::Escalated {
                if let Err(err) = self.settle_dispute(dispute_id).await {
                    tracing::warn!(dispute_id = %dispute_id, "settlement deferred to sweep: {err}");
                }
            }
            self.load_dispute(dispute_id)
        })
        .await
        .map_err(|e| self.reject_for_dispute(dispute_id, e))
    }

    /// Operator asks the parties for more evidence.
    pub async fn request_evidence(
        &self,
        actor: &Actor,
        dispute_id: DisputeId,
        note: String,
        key: Option<&IdempotencyKey>,
    ) -> Result<EscrowDispute, Rejection> {
        self.idempotent(actor, "request_evidence", key, || async {
            guard::check_operator(actor)?;
            let tx_id = self.load_dispute(dispute_id)?.escrow_transaction_id;
            self.transact(tx_id, || {
                let mut dispute = self.load_dispute(dispute_id)?;
                dispute.request_evidence(&actor.label(), &note, self.now())?;
                let mut work = UnitOfWork::new();
                work.put_dispute(dispute.clone());
                Ok((work, Outbox::new(), dispute))
            })
            .await
        })
        .await
        .map_err(|e| self.reject_for_dispute(dispute_id, e))
    }

    /// Operator resumes review after new evidence; the case is
    /// resubmitted for assessment.
    pub async fn resume_review(
        &self,
        actor: &Actor,
        dispute_id: DisputeId,
        key: Option<&IdempotencyKey>,
    ) -> Result<EscrowDispute, Rejection> {
        self.idempotent(actor, "resume_review", key, || async {
            guard::check_operator(actor)?;
            let tx_id = self.load_dispute(dispute_id)?.escrow_transaction_id;
            self.transact(tx_id, || {
                let mut dispute = self.load_dispute(dispute_id)?;
                dispute.resume_review(&actor.label(), self.now())?;
                let mut work = UnitOfWork::new();
                work.put_dispute(dispute);
                Ok((work, Outbox::new(), ()))
            })
            .await?;
            self.assess_in_background_of(dispute_id).await;
            self.load_dispute(dispute_id)
        })
        .await
        .map_err(|e| self.reject_for_dispute(dispute_id, e))
    }

    /// Operator marks a proof verified. Verified proofs are immutable.
    pub async fn verify_proof(
        &self,
        actor: &Actor,
        proof_id: ProofId,
        notes: Option<String>,
        key: Option<&IdempotencyKey>,
    ) -> Result<EscrowProof, Rejection> {
        let tx_id = self
            .store
            .proof(proof_id)
            .ok()
            .flatten()
            .map(|p| p.escrow_transaction_id);
        self.idempotent(actor, "verify_proof", key, || async {
            guard::check_operator(actor)?;
            let tx_id = tx_id.ok_or_else(|| EngineError::not_found("proof", proof_id))?;
            self.transact(tx_id, || {
                let mut proof = self
                    .store
                    .proof(proof_id)?
                    .ok_or_else(|| EngineError::not_found("proof", proof_id))?;
                proof.verify(&actor.label(), notes.clone(), self.now())?;
                let mut work = UnitOfWork::new();
                work.put_proof(proof.clone());
                Ok((work, Outbox::new(), proof))
            })
            .await
        })
        .await
        .map_err(|e| self.reject(tx_id, e))
    }

    // -- Internals ----------------------------------------------------------------

    pub(crate) async fn open_dispute_inner(
        &self,
        actor: &Actor,
        id: TransactionId,
        reason: &str,
        description: &str,
    ) -> Result<EscrowDispute, EngineError> {
        self.transact(id, || {
            let now = self.now();
            let mut tx = self.load_tx(id)?;
            let open = self.has_open_dispute(id)?;
            let reputation = match actor.user() {
                Some(user) => self.store.reputation(user)?,
                None => None,
            };
            guard::check_open_dispute(actor, &tx, open, reputation.as_ref(), now)?;

            let (initiator, origin) = match actor.user() {
                Some(user) => (user.clone(), DisputeOrigin::Party),
                None => (tx.buyer_id.clone(), DisputeOrigin::Expiry),
            };
            let mut dispute =
                EscrowDispute::open(id, initiator.clone(), reason, description, origin, now)?;
            dispute.begin_review(now)?;
            let read = tx.version();
            let event = tx.open_dispute(actor, open, now)?;

            let mut work = UnitOfWork::new();
            work.update_transaction(tx, read).put_dispute(dispute.clone());
            if origin == DisputeOrigin::Party {
                let mut reputations = ReputationBatch::new(self.store.as_ref(), now);
                reputations
                    .get(&initiator)?
                    .record_dispute_initiated(&self.config.reputation, now);
                reputations.write_into(&mut work);
            }
            tracing::info!(
                transaction_id = %id,
                dispute_id = %dispute.id,
                initiator = %initiator,
                origin = ?origin,
                "dispute opened"
            );
            Ok((work, event.into(), dispute))
        })
        .await
    }

    /// Run the assessment and log (rather than surface) a failure; the
    /// dispute itself is already committed and the sweep retries.
    async fn assess_in_background_of(&self, dispute_id: DisputeId) {
        if let Err(err) = self.run_assessment(dispute_id).await {
            tracing::warn!(dispute_id = %dispute_id, "assessment deferred to sweep: {err}");
        }
    }

    /// Submit the case bundle to the oracle and apply its answer. A
    /// resolution proceeds straight to settlement.
    pub(crate) async fn run_assessment(&self, dispute_id: DisputeId) -> Result<(), EngineError> {
        let tx_id = self.load_dispute(dispute_id)?.escrow_transaction_id;
        let case = {
            let _held = self.lock(tx_id).await;
            let dispute = self.load_dispute(dispute_id)?;
            if !dispute.awaiting_assessment() {
                return Ok(());
            }
            let transaction = self.load_tx(tx_id)?;
            let now = self.now();
            let proofs = self.store.proofs_for(tx_id)?;
            let buyer_reputation = self
                .store
                .reputation(&transaction.buyer_id)?
                .unwrap_or_else(|| UserReputation::new(transaction.buyer_id.clone(), now));
            let seller_reputation = self
                .store
                .reputation(&transaction.seller_id)?
                .unwrap_or_else(|| UserReputation::new(transaction.seller_id.clone(), now));
            CaseBundle {
                transaction,
                dispute,
                proofs,
                buyer_reputation,
                seller_reputation,
            }
        };

        let assessment = call_with_retry("assess", &self.config.retry, || {
            self.oracle.assess(&case)
        })
        .await?;

        let threshold = self.config.confidence_threshold;
        let outcome = self
            .transact(tx_id, || {
                let now = self.now();
                let mut dispute = self.load_dispute(dispute_id)?;
                if dispute.status() == DisputeStatus::EvidenceRequested {
                    tracing::debug!(dispute_id = %dispute_id, "assessment arrived while awaiting evidence; dropped");
                    return Ok((UnitOfWork::new(), Outbox::new(), DecisionOutcome::Ignored));
                }
                if dispute.status() == DisputeStatus::Opened {
                    dispute.begin_review(now)?;
                }
                let tx = self.load_tx(tx_id)?;
                let outcome =
                    dispute.apply_assessment(&assessment, threshold, tx.amount, tx.escrow_fee, now)?;
                let mut work = UnitOfWork::new();
                if outcome != DecisionOutcome::Ignored {
                    work.put_dispute(dispute);
                }
                Ok((work, Outbox::new(), outcome))
            })
            .await?;

        match outcome {
            DecisionOutcome::Resolved(verdict) => {
                tracing::info!(
                    dispute_id = %dispute_id,
                    verdict = %verdict,
                    confidence = assessment.confidence,
                    assessment_id = %assessment.assessment_id,
                    "dispute resolved by assessment"
                );
                self.settle_dispute(dispute_id).await
            }
            DecisionOutcome::Escalated => {
                tracing::info!(
                    dispute_id = %dispute_id,
                    confidence = assessment.confidence,
                    threshold,
                    "dispute escalated for manual decision"
                );
                Ok(())
            }
            DecisionOutcome::Ignored => Ok(()),
        }
    }

    /// Move the awarded funds, then close the dispute and settle the
    /// transaction in one unit of work. A no-op unless the dispute is
    /// `RESOLVED_*`.
    pub(crate) async fn settle_dispute(&self, dispute_id: DisputeId) -> Result<(), EngineError> {
        let tx_id = self.load_dispute(dispute_id)?.escrow_transaction_id;
        let (snapshot, award) = {
            let _held = self.lock(tx_id).await;
            let dispute = self.load_dispute(dispute_id)?;
            if !dispute.status().is_resolved() {
                return Ok(());
            }
            let award = dispute.award.ok_or_else(|| {
                EngineError::IntegrityViolation(format!(
                    "dispute {dispute_id} is resolved without an award"
                ))
            })?;
            let tx = self.load_tx(tx_id)?;
            if tx.status() != EscrowStatus::Disputed {
                tracing::error!(
                    dispute_id = %dispute_id,
                    transaction_id = %tx_id,
                    status = %tx.status(),
                    "resolved dispute on a transaction that is not disputed"
                );
                return Err(EngineError::IntegrityViolation(format!(
                    "dispute {dispute_id} is resolved but transaction {tx_id} is {}",
                    tx.status()
                )));
            }
            (tx, award)
        };

        let mut refs = Vec::new();
        if award.buyer_refund.is_positive() {
            let receipt = call_with_retry("refund", &self.config.retry, || {
                self.settlement
                    .refund(&snapshot, &snapshot.buyer_id, award.buyer_refund)
            })
            .await?;
            refs.push(receipt.settlement_ref);
        }
        if award.seller_release.is_positive() {
            let receipt = call_with_retry("release_funds", &self.config.retry, || {
                self.settlement
                    .release_funds(&snapshot, &snapshot.seller_id, award.seller_release)
            })
            .await?;
            refs.push(receipt.settlement_ref);
        }
        let settlement_ref = if refs.is_empty() {
            format!("dispute:{dispute_id}")
        } else {
            refs.join(",")
        };

        self.transact(tx_id, || {
            let now = self.now();
            let mut dispute = self.load_dispute(dispute_id)?;
            if !dispute.status().is_resolved() {
                return Ok((UnitOfWork::new(), Outbox::new(), ()));
            }
            let verdict = dispute.resolution.ok_or_else(|| {
                EngineError::IntegrityViolation(format!(
                    "dispute {dispute_id} is resolved without a verdict"
                ))
            })?;
            let mut tx = self.load_tx(tx_id)?;
            dispute.close(now)?;
            let outcome = match verdict {
                Verdict::ResolvedSeller => DisputeOutcome::ReleasedToSeller,
                Verdict::ResolvedBuyer | Verdict::ResolvedSplit => DisputeOutcome::RefundedToBuyer,
            };
            let read = tx.version();
            let event = tx.settle_dispute(
                &Actor::System,
                DisputeSettlement {
                    dispute_id,
                    dispute_closed: dispute.status() == DisputeStatus::Closed,
                    outcome,
                    settlement_ref: settlement_ref.clone(),
                },
                now,
            )?;

            let policy = &self.config.reputation;
            let mut reputations = ReputationBatch::new(self.store.as_ref(), now);
            let winner = match verdict {
                Verdict::ResolvedBuyer => {
                    reputations.get(&tx.seller_id)?.record_dispute_lost(policy, now);
                    Some(tx.buyer_id.clone())
                }
                Verdict::ResolvedSeller => {
                    reputations.get(&tx.buyer_id)?.record_dispute_lost(policy, now);
                    Some(tx.seller_id.clone())
                }
                Verdict::ResolvedSplit => None,
            };
            if tx.status() == EscrowStatus::Completed {
                reputations.get(&tx.buyer_id)?.record_completion(policy, now);
                reputations.get(&tx.seller_id)?.record_completion(policy, now);
            }

            let mut work = UnitOfWork::new();
            if let (Some(winner), Some(decision)) = (winner, dispute.decision.as_ref()) {
                if let Some(amount) = decision.compensation_amount.filter(|a| a.is_positive()) {
                    let record = CompensationRecord::issue(
                        winner,
                        amount,
                        decision.rationale.clone(),
                        dispute_id,
                        now,
                    )?;
                    tracing::info!(
                        compensation_id = %record.id,
                        user = %record.user_id,
                        amount = %record.amount,
                        dispute_id = %dispute_id,
                        "compensation issued"
                    );
                    work.put_compensation(record);
                }
            }
            tracing::info!(
                dispute_id = %dispute_id,
                transaction_id = %tx_id,
                verdict = %verdict,
                settlement_ref = %settlement_ref,
                "dispute settled"
            );
            work.update_transaction(tx, read).put_dispute(dispute);
            reputations.write_into(&mut work);
            Ok((work, event.into(), ()))
        })
        .await
    }

    fn reject_for_dispute(&self, dispute_id: DisputeId, error: EngineError) -> Rejection {
        let tx_id = self
            .store
            .dispute(dispute_id)
            .ok()
            .flatten()
            .map(|d| d.escrow_transaction_id);
        self.reject(tx_id, error)
    }
}
