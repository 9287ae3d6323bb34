//! Ratings, identity verification and compensation bookkeeping.

use serde::{Deserialize, Serialize};

use escrow_arbitration::{CompensationOutcome, CompensationRecord};
use escrow_core::{Actor, CompensationId, IdempotencyKey, RatingId, TransactionId, UserId};
use escrow_reputation::{Stars, TransactionRating, UserReputation, VerificationStatus};

use super::{EscrowEngine, ReputationBatch};
use crate::error::{EngineError, Rejection};
use crate::guard;
use crate::outbox::Outbox;
use crate::store::UnitOfWork;

/// A party's rating of the counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRating {
    /// 1 to 5 stars.
    pub rating: u8,
    /// Optional comment.
    #[serde(default)]
    pub comment: Option<String>,
}

impl EscrowEngine {
    /// Rate the counterparty of a completed or refunded transaction. Each
    /// party rates once; the rated user's reputation is updated in the same
    /// commit.
    pub async fn submit_rating(
        &self,
        actor: &Actor,
        id: TransactionId,
        request: SubmitRating,
        key: Option<&IdempotencyKey>,
    ) -> Result<TransactionRating, Rejection> {
        self.idempotent(actor, "submit_rating", key, || {
            self.transact(id, || {
                let now = self.now();
                let tx = self.load_tx(id)?;
                let already_rated = match actor.user() {
                    Some(user) => self
                        .store
                        .ratings_for(id)?
                        .iter()
                        .any(|r| &r.rater_id == user),
                    None => false,
                };
                guard::check_rate(actor, &tx, already_rated)?;
                let (rater, rated) = actor
                    .user()
                    .and_then(|rater| Some((rater.clone(), tx.counterparty_of(rater)?.clone())))
                    .ok_or_else(|| {
                        EngineError::Unauthorized(format!("{actor} is not a party to transaction {id}"))
                    })?;

                let stars = Stars::new(request.rating)?;
                let rating =
                    TransactionRating::new(id, rater, rated.clone(), stars, request.comment.clone(), now)?;
                let mut reputations = ReputationBatch::new(self.store.as_ref(), now);
                reputations
                    .get(&rated)?
                    .record_rating(stars, &self.config.reputation, now);

                let mut work = UnitOfWork::new();
                work.insert_rating(rating.clone());
                reputations.write_into(&mut work);
                tracing::info!(
                    transaction_id = %id,
                    rating_id = %rating.id,
                    rated = %rated,
                    stars = stars.value(),
                    "rating recorded"
                );
                Ok((work, Outbox::new(), rating))
            })
        })
        .await
        .map_err(|e| self.reject(Some(id), e))
    }

    /// Ratings on a transaction.
    pub fn ratings(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<Vec<TransactionRating>, Rejection> {
        self.transaction(actor, id)?;
        self.store
            .ratings_for(id)
            .map_err(|e| self.reject(Some(id), e.into()))
    }

    /// Operator flags a rating for moderation.
    pub async fn flag_rating(
        &self,
        actor: &Actor,
        rating_id: RatingId,
        key: Option<&IdempotencyKey>,
    ) -> Result<TransactionRating, Rejection> {
        let tx_id = self
            .store
            .rating(rating_id)
            .ok()
            .flatten()
            .map(|r| r.escrow_transaction_id);
        self.idempotent(actor, "flag_rating", key, || async {
            guard::check_operator(actor)?;
            let tx_id = tx_id.ok_or_else(|| EngineError::not_found("rating", rating_id))?;
            self.transact(tx_id, || {
                let mut rating = self
                    .store
                    .rating(rating_id)?
                    .ok_or_else(|| EngineError::not_found("rating", rating_id))?;
                let mut work = UnitOfWork::new();
                if !rating.flagged {
                    rating.flagged = true;
                    work.put_rating(rating.clone());
                    tracing::info!(rating_id = %rating_id, by = %actor, "rating flagged");
                }
                Ok((work, Outbox::new(), rating))
            })
            .await
        })
        .await
        .map_err(|e| self.reject(tx_id, e))
    }

    /// Operator records the outcome of a user's identity verification.
    pub async fn set_verification(
        &self,
        actor: &Actor,
        user: &UserId,
        status: VerificationStatus,
        key: Option<&IdempotencyKey>,
    ) -> Result<UserReputation, Rejection> {
        self.idempotent(actor, "set_verification", key, || async {
            guard::check_operator(actor)?;
            let updated = self.commit_with_retry(|| {
                let now = self.now();
                let mut reputations = ReputationBatch::new(self.store.as_ref(), now);
                let record = reputations.get(user)?;
                record.set_verification(status, &self.config.reputation, now);
                let updated = record.clone();
                let mut work = UnitOfWork::new();
                reputations.write_into(&mut work);
                Ok((work, updated))
            })?;
            tracing::info!(
                user = %user,
                status = ?updated.verification_status,
                trust_level = %updated.trust_level,
                "verification updated"
            );
            Ok(updated)
        })
        .await
        .map_err(|e| self.reject(None, e))
    }

    /// Compensation records of `user`, visible to that user and operators.
    pub fn compensations_for(
        &self,
        actor: &Actor,
        user: &UserId,
    ) -> Result<Vec<CompensationRecord>, Rejection> {
        if !actor.is_operator() && actor.user() != Some(user) {
            return Err(self.reject(
                None,
                EngineError::Unauthorized(format!("{actor} may not view compensations of {user}")),
            ));
        }
        self.store
            .compensations_for(user)
            .map_err(|e| self.reject(None, e.into()))
    }

    /// Operator records what settlement did with a compensation. Repeating
    /// the recorded outcome is a no-op; a different one is refused.
    pub async fn record_compensation_outcome(
        &self,
        actor: &Actor,
        id: CompensationId,
        outcome: CompensationOutcome,
        key: Option<&IdempotencyKey>,
    ) -> Result<CompensationRecord, Rejection> {
        self.idempotent(actor, "record_compensation_outcome", key, || async {
            guard::check_operator(actor)?;
            let _held = self.locks.acquire(*id.as_uuid()).await;
            self.commit_with_retry(|| {
                let mut record = self
                    .store
                    .compensation(id)?
                    .ok_or_else(|| EngineError::not_found("compensation", id))?;
                let changed = record.record_outcome(outcome.clone(), self.now())?;
                let mut work = UnitOfWork::new();
                if changed {
                    tracing::info!(
                        compensation_id = %id,
                        status = record.status.as_str(),
                        "compensation outcome recorded"
                    );
                    work.put_compensation(record.clone());
                }
                Ok((work, record))
            })
        })
        .await
        .map_err(|e| self.reject(None, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{buyer, completed_escrow, funded_escrow, harness, operator, seller, Harness};
    use escrow_arbitration::{CompensationStatus, Verdict};
    use escrow_core::Amount;
    use escrow_reputation::TrustLevel;

    fn five_stars() -> SubmitRating {
        SubmitRating {
            rating: 5,
            comment: Some("smooth".into()),
        }
    }

    #[tokio::test]
    async fn rating_updates_counterparty_reputation() {
        let Harness { engine, .. } = harness();
        let tx = completed_escrow(&engine).await;
        let rating = engine
            .submit_rating(&buyer(), tx.id, five_stars(), None)
            .await
            .unwrap();
        assert_eq!(rating.rated_user_id.as_str(), "seller");
        let rep = engine.reputation(&UserId::new("seller").unwrap()).unwrap();
        assert_eq!(rep.positive_ratings, 1);
        assert_eq!(rep.transaction_count, 1);
    }

    #[tokio::test]
    async fn second_rating_by_same_party_is_refused() {
        let Harness { engine, .. } = harness();
        let tx = completed_escrow(&engine).await;
        engine
            .submit_rating(&seller(), tx.id, five_stars(), None)
            .await
            .unwrap();
        let err = engine
            .submit_rating(&seller(), tx.id, five_stars(), None)
            .await
            .unwrap_err();
        assert_eq!(err.error.kind(), "already_exists");
        assert_eq!(engine.ratings(&buyer(), tx.id).unwrap().len(), 1);
        let rep = engine.reputation(&UserId::new("buyer").unwrap()).unwrap();
        assert_eq!(rep.positive_ratings, 1);
    }

    #[tokio::test]
    async fn unsettled_transaction_cannot_be_rated() {
        let Harness { engine, .. } = harness();
        let tx = funded_escrow(&engine).await;
        let err = engine
            .submit_rating(&buyer(), tx.id, five_stars(), None)
            .await
            .unwrap_err();
        assert_eq!(err.error.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn out_of_range_stars_are_validation_errors() {
        let Harness { engine, .. } = harness();
        let tx = completed_escrow(&engine).await;
        let err = engine
            .submit_rating(
                &buyer(),
                tx.id,
                SubmitRating {
                    rating: 6,
                    comment: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error.kind(), "validation");
    }

    #[tokio::test]
    async fn operator_flags_rating() {
        let Harness { engine, .. } = harness();
        let tx = completed_escrow(&engine).await;
        let rating = engine
            .submit_rating(&buyer(), tx.id, five_stars(), None)
            .await
            .unwrap();
        let err = engine.flag_rating(&seller(), rating.id, None).await.unwrap_err();
        assert_eq!(err.error.kind(), "unauthorized");
        let flagged = engine.flag_rating(&operator(), rating.id, None).await.unwrap();
        assert!(flagged.flagged);
    }

    #[tokio::test]
    async fn verification_changes_trust_level() {
        let Harness { engine, .. } = harness();
        let user = UserId::new("buyer").unwrap();
        let rep = engine
            .set_verification(&operator(), &user, VerificationStatus::Verified, None)
            .await
            .unwrap();
        assert_eq!(rep.verification_status, VerificationStatus::Verified);
        assert_ne!(rep.trust_level, TrustLevel::Flagged);
        assert_eq!(engine.reputation(&user).unwrap().version, rep.version);
    }

    #[tokio::test]
    async fn compensation_outcome_is_final() {
        let Harness { engine, mocks, .. } = harness();
        let tx = funded_escrow(&engine).await;
        mocks
            .oracle
            .push_decision(Verdict::ResolvedBuyer, 0.9, Some(Amount::from_units(5)));
        engine
            .open_dispute(
                &buyer(),
                tx.id,
                crate::engine::OpenDispute {
                    reason: "damaged".into(),
                    description: String::new(),
                },
                None,
            )
            .await
            .unwrap();
        let user = UserId::new("buyer").unwrap();
        let record = engine.compensations_for(&operator(), &user).unwrap().remove(0);
        assert!(engine.compensations_for(&seller(), &user).is_err());

        let paid = CompensationOutcome::Processed {
            settlement_ref: "pay-1".into(),
        };
        let processed = engine
            .record_compensation_outcome(&operator(), record.id, paid.clone(), None)
            .await
            .unwrap();
        assert_eq!(processed.status, CompensationStatus::Processed);
        engine
            .record_compensation_outcome(&operator(), record.id, paid, None)
            .await
            .unwrap();
        let err = engine
            .record_compensation_outcome(
                &operator(),
                record.id,
                CompensationOutcome::Failed {
                    note: "bounced".into(),
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error.kind(), "integrity_violation");
    }
}
