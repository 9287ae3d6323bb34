//! # Escrow Engine
//!
//! The orchestration layer. Every entry point follows the same shape:
//!
//! 1. acquire the per-transaction lock,
//! 2. read the current records from the [`LedgerStore`],
//! 3. run the authorization guard and the domain transition,
//! 4. commit one [`UnitOfWork`],
//! 5. release the lock and dispatch the committed events.
//!
//! Collaborator calls never happen while the lock is held. Operations that
//! need one (funding, release, assessment, dispute settlement) validate
//! under the lock, release it, await the collaborator, then re-acquire the
//! lock and re-validate against fresh state before applying the result.
//! Release and refund first commit a reservation on the transaction, which
//! every other transition refuses until the payout is recorded.
//!
//! Public methods return [`Rejection`], which carries the unmodified
//! transaction snapshot alongside the error.

mod disputes;
mod ratings;
mod transactions;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use escrow_arbitration::EscrowDispute;
use escrow_core::{Actor, Clock, DisputeId, IdempotencyKey, TransactionId, UserId};
use escrow_reputation::UserReputation;
use escrow_state::EscrowTransaction;

use crate::collaborators::{ArbitrationOracle, NotificationSink, SettlementGateway};
use crate::config::EngineConfig;
use crate::error::{EngineError, Rejection};
use crate::locks::{EntityGuard, LockRegistry};
use crate::outbox::Outbox;
use crate::store::{Expected, LedgerStore, UnitOfWork};

pub use disputes::OpenDispute;
pub use ratings::SubmitRating;
pub use transactions::{CreateTransaction, ProofSubmission};

/// Reputation read-modify-write attempts before a conflict is surfaced.
const MAX_REPUTATION_RETRIES: u32 = 5;

/// The three external systems the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Moves funds.
    pub settlement: Arc<dyn SettlementGateway>,
    /// Decides disputes.
    pub oracle: Arc<dyn ArbitrationOracle>,
    /// Receives committed transition events.
    pub notifier: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// The escrow engine.
pub struct EscrowEngine {
    store: Arc<dyn LedgerStore>,
    settlement: Arc<dyn SettlementGateway>,
    oracle: Arc<dyn ArbitrationOracle>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    locks: LockRegistry,
    replays: LockRegistry<String>,
}

impl std::fmt::Debug for EscrowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowEngine")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl EscrowEngine {
    /// Assemble an engine over a store, its collaborators and a clock.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            settlement: collaborators.settlement,
            oracle: collaborators.oracle,
            notifier: collaborators.notifier,
            clock,
            config,
            locks: LockRegistry::new(),
            replays: LockRegistry::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Number of per-entity locks currently tracked.
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    pub(crate) fn prune_locks(&self) -> usize {
        self.locks.prune() + self.replays.prune()
    }

    // -- Queries ----------------------------------------------------------------

    /// Fetch a transaction visible to `actor`.
    pub fn transaction(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<EscrowTransaction, Rejection> {
        self.visible_transaction(actor, id)
            .map_err(|e| self.reject(Some(id), e))
    }

    /// The audit log of a transaction.
    pub fn audit(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<Vec<escrow_state::AuditEntry>, Rejection> {
        self.visible_transaction(actor, id)
            .map(|tx| tx.audit_log().to_vec())
            .map_err(|e| self.reject(Some(id), e))
    }

    /// Proofs on a transaction, oldest first.
    pub fn proofs(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<Vec<escrow_arbitration::EscrowProof>, Rejection> {
        self.visible_transaction(actor, id)
            .and_then(|_| Ok(self.store.proofs_for(id)?))
            .map_err(|e| self.reject(Some(id), e))
    }

    /// Dispute history of a transaction, oldest first.
    pub fn disputes(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<Vec<EscrowDispute>, Rejection> {
        self.visible_transaction(actor, id)
            .and_then(|_| Ok(self.store.disputes_for(id)?))
            .map_err(|e| self.reject(Some(id), e))
    }

    /// Fetch a dispute visible to `actor`.
    pub fn dispute(&self, actor: &Actor, id: DisputeId) -> Result<EscrowDispute, Rejection> {
        let dispute = self.load_dispute(id).map_err(Rejection::bare)?;
        let tx_id = dispute.escrow_transaction_id;
        self.visible_transaction(actor, tx_id)
            .map(|_| dispute)
            .map_err(|e| self.reject(Some(tx_id), e))
    }

    /// A user's reputation; users with no history get a fresh record.
    pub fn reputation(&self, user: &UserId) -> Result<UserReputation, Rejection> {
        self.store
            .reputation(user)
            .map(|rep| rep.unwrap_or_else(|| UserReputation::new(user.clone(), self.now())))
            .map_err(|e| self.reject(None, e.into()))
    }

    fn visible_transaction(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<EscrowTransaction, EngineError> {
        let tx = self.load_tx(id)?;
        crate::guard::check_view(actor, &tx)?;
        Ok(tx)
    }

    // -- Shared plumbing --------------------------------------------------------

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) async fn lock(&self, id: TransactionId) -> EntityGuard {
        self.locks.acquire(*id.as_uuid()).await
    }

    pub(crate) fn load_tx(&self, id: TransactionId) -> Result<EscrowTransaction, EngineError> {
        self.store
            .transaction(id)?
            .ok_or_else(|| EngineError::not_found("transaction", id))
    }

    pub(crate) fn load_dispute(&self, id: DisputeId) -> Result<EscrowDispute, EngineError> {
        self.store
            .dispute(id)?
            .ok_or_else(|| EngineError::not_found("dispute", id))
    }

    pub(crate) fn has_open_dispute(&self, id: TransactionId) -> Result<bool, EngineError> {
        Ok(self.store.disputes_for(id)?.iter().any(|d| d.is_open()))
    }

    /// Wrap an error with the current transaction snapshot, count it and
    /// log it.
    pub(crate) fn reject(&self, tx_id: Option<TransactionId>, error: EngineError) -> Rejection {
        metrics::counter!("escrow_rejections_total", "kind" => error.kind()).increment(1);
        match &error {
            EngineError::IntegrityViolation(_) | EngineError::Storage(_) => {
                tracing::error!(transaction_id = ?tx_id, kind = error.kind(), "{error}");
            }
            _ => tracing::debug!(transaction_id = ?tx_id, kind = error.kind(), "rejected: {error}"),
        }
        let current = tx_id
            .and_then(|id| self.store.transaction(id).ok().flatten())
            .map(Box::new);
        Rejection { error, current }
    }

    /// Build and commit a unit of work, rebuilding it from fresh reads when
    /// a versioned write loses a race. A transaction conflict is retried
    /// once; reputation conflicts are retried a few times since they span
    /// transactions.
    pub(crate) fn commit_with_retry<R>(
        &self,
        mut attempt: impl FnMut() -> Result<(UnitOfWork, R), EngineError>,
    ) -> Result<R, EngineError> {
        let mut transaction_retries = 0;
        let mut reputation_retries = 0;
        loop {
            let (work, out) = attempt()?;
            if work.is_empty() {
                return Ok(out);
            }
            let err = match self.store.commit(work) {
                Ok(()) => return Ok(out),
                Err(err) => err,
            };
            match err.stale_entity() {
                Some("reputation") if reputation_retries < MAX_REPUTATION_RETRIES => {
                    reputation_retries += 1;
                    tracing::debug!(attempt = reputation_retries, "reputation conflict, rebuilding: {err}");
                }
                Some(_) if transaction_retries == 0 => {
                    transaction_retries += 1;
                    tracing::debug!("stale write, rebuilding once: {err}");
                }
                _ => return Err(err.into()),
            }
        }
    }

    /// Lock `id`, commit what `attempt` stages, release the lock, then
    /// dispatch the staged events.
    pub(crate) async fn transact<R>(
        &self,
        id: TransactionId,
        mut attempt: impl FnMut() -> Result<(UnitOfWork, Outbox, R), EngineError>,
    ) -> Result<R, EngineError> {
        let held = self.lock(id).await;
        let (outbox, out) =
            self.commit_with_retry(|| attempt().map(|(work, outbox, out)| (work, (outbox, out))))?;
        drop(held);
        self.dispatch(outbox).await;
        Ok(out)
    }

    /// Run `op` at most once per (actor, operation, key). Repeats replay the
    /// first successful response.
    ///
    /// The scope stays locked from the lookup until the response is
    /// recorded, so a repeat arriving while the first request is still
    /// running waits for it and then replays. The scope lock is separate
    /// from the per-transaction locks `op` takes.
    pub(crate) async fn idempotent<T, F, Fut>(
        &self,
        actor: &Actor,
        operation: &'static str,
        key: Option<&IdempotencyKey>,
        op: F,
    ) -> Result<T, EngineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let Some(key) = key else {
            return op().await;
        };
        let scope = format!("{}|{operation}|{}", actor.label(), key.as_str());
        let _claimed = self.replays.acquire(scope.clone()).await;
        if let Some(recorded) = self.store.recorded_response(&scope)? {
            tracing::debug!(operation, key = key.as_str(), "replaying recorded response");
            return serde_json::from_value(recorded)
                .map_err(|e| EngineError::Storage(format!("recorded response for {scope}: {e}")));
        }
        let out = op().await?;
        let value = serde_json::to_value(&out)
            .map_err(|e| EngineError::Storage(format!("serializing response for {scope}: {e}")))?;
        self.store.record_response(scope, value)?;
        Ok(out)
    }

    /// Publish committed events. Call only after the lock is released.
    pub(crate) async fn dispatch(&self, outbox: Outbox) {
        outbox
            .deliver(self.notifier.as_ref(), self.config.retry.timeout)
            .await;
    }
}

/// Reputation records touched by one unit of work, each with the version it
/// was read at. Loading a user twice returns the same pending record.
pub(crate) struct ReputationBatch<'a> {
    store: &'a dyn LedgerStore,
    now: DateTime<Utc>,
    records: HashMap<UserId, (UserReputation, Expected)>,
}

impl<'a> ReputationBatch<'a> {
    pub(crate) fn new(store: &'a dyn LedgerStore, now: DateTime<Utc>) -> Self {
        Self {
            store,
            now,
            records: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, user: &UserId) -> Result<&mut UserReputation, EngineError> {
        if !self.records.contains_key(user) {
            let loaded = match self.store.reputation(user)? {
                Some(rep) => {
                    let expected = Expected::Version(rep.version);
                    (rep, expected)
                }
                None => (UserReputation::new(user.clone(), self.now), Expected::Absent),
            };
            self.records.insert(user.clone(), loaded);
        }
        self.records
            .get_mut(user)
            .map(|(rep, _)| rep)
            .ok_or_else(|| EngineError::Storage(format!("reputation batch lost {user}")))
    }

    pub(crate) fn write_into(self, work: &mut UnitOfWork) {
        for (_, (rep, expected)) in self.records {
            work.put_reputation(rep, expected);
        }
    }
}
