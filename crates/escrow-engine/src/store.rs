//! # Ledger Store
//!
//! The single source of truth for every engine entity. Writes go through
//! [`LedgerStore::commit`], which applies a [`UnitOfWork`] all-or-nothing:
//! every version check and uniqueness check runs before anything is written.
//!
//! [`MemoryLedger`] ships for the binary and tests. It keeps one
//! [`Store`] per entity kind and serializes commits behind a single mutex.
//! Reads do not take that mutex; within the engine they are ordered by the
//! per-transaction lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use escrow_arbitration::{CompensationRecord, EscrowDispute, EscrowProof};
use escrow_core::{CompensationId, DisputeId, ProofId, RatingId, TransactionId, UserId};
use escrow_reputation::{TransactionRating, UserReputation};
use escrow_state::EscrowTransaction;

// -- Errors -------------------------------------------------------------------

/// Errors from ledger store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A versioned write lost a race.
    #[error("{entity} {id}: expected {expected}, found {found:?}")]
    StaleWrite {
        /// Entity kind.
        entity: &'static str,
        /// Record key.
        id: String,
        /// What the writer expected.
        expected: Expected,
        /// What the store holds (`None` if absent).
        found: Option<u64>,
    },

    /// A uniquely-keyed record already exists.
    #[error("{entity} {id} already exists")]
    Duplicate {
        /// Entity kind.
        entity: &'static str,
        /// Record key.
        id: String,
    },

    /// The backend failed.
    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Entity kind of a stale write, if this is one.
    pub fn stale_entity(&self) -> Option<&'static str> {
        match self {
            Self::StaleWrite { entity, .. } => Some(*entity),
            _ => None,
        }
    }
}

// -- Unit of Work ---------------------------------------------------------------

/// The version a writer read before mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// The record must not exist yet.
    Absent,
    /// The stored record must still be at this version.
    Version(u64),
}

impl std::fmt::Display for Expected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Version(v) => write!(f, "version {v}"),
        }
    }
}

/// A versioned write.
#[derive(Debug, Clone)]
pub struct VersionedWrite<T> {
    /// The new record.
    pub record: T,
    /// What the writer read.
    pub expected: Expected,
}

/// A batch of writes applied atomically.
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    /// Version-checked transaction writes.
    pub transactions: Vec<VersionedWrite<EscrowTransaction>>,
    /// Proof upserts.
    pub proofs: Vec<EscrowProof>,
    /// Dispute upserts.
    pub disputes: Vec<EscrowDispute>,
    /// New ratings; unique per (transaction, rater).
    pub new_ratings: Vec<TransactionRating>,
    /// Updates to existing ratings.
    pub ratings: Vec<TransactionRating>,
    /// Version-checked reputation upserts.
    pub reputations: Vec<VersionedWrite<UserReputation>>,
    /// Compensation upserts.
    pub compensations: Vec<CompensationRecord>,
}

impl UnitOfWork {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction that must not exist yet.
    pub fn create_transaction(&mut self, tx: EscrowTransaction) -> &mut Self {
        self.transactions.push(VersionedWrite {
            record: tx,
            expected: Expected::Absent,
        });
        self
    }

    /// Replace a transaction read at `read_version`.
    pub fn update_transaction(&mut self, tx: EscrowTransaction, read_version: u64) -> &mut Self {
        self.transactions.push(VersionedWrite {
            record: tx,
            expected: Expected::Version(read_version),
        });
        self
    }

    /// Upsert a proof.
    pub fn put_proof(&mut self, proof: EscrowProof) -> &mut Self {
        self.proofs.push(proof);
        self
    }

    /// Upsert a dispute.
    pub fn put_dispute(&mut self, dispute: EscrowDispute) -> &mut Self {
        self.disputes.push(dispute);
        self
    }

    /// Insert a new rating.
    pub fn insert_rating(&mut self, rating: TransactionRating) -> &mut Self {
        self.new_ratings.push(rating);
        self
    }

    /// Update an existing rating.
    pub fn put_rating(&mut self, rating: TransactionRating) -> &mut Self {
        self.ratings.push(rating);
        self
    }

    /// Upsert a reputation read as `expected`.
    pub fn put_reputation(&mut self, reputation: UserReputation, expected: Expected) -> &mut Self {
        self.reputations.push(VersionedWrite {
            record: reputation,
            expected,
        });
        self
    }

    /// Upsert a compensation record.
    pub fn put_compensation(&mut self, record: CompensationRecord) -> &mut Self {
        self.compensations.push(record);
        self
    }

    /// Whether the batch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
            && self.proofs.is_empty()
            && self.disputes.is_empty()
            && self.new_ratings.is_empty()
            && self.ratings.is_empty()
            && self.reputations.is_empty()
            && self.compensations.is_empty()
    }
}

// -- Trait ----------------------------------------------------------------------

/// Durable keyed storage for the engine.
pub trait LedgerStore: Send + Sync + 'static {
    /// Fetch a transaction.
    fn transaction(&self, id: TransactionId) -> Result<Option<EscrowTransaction>, StoreError>;
    /// All transactions.
    fn transactions(&self) -> Result<Vec<EscrowTransaction>, StoreError>;

    /// Fetch a proof.
    fn proof(&self, id: ProofId) -> Result<Option<EscrowProof>, StoreError>;
    /// Proofs on a transaction, oldest first.
    fn proofs_for(&self, tx: TransactionId) -> Result<Vec<EscrowProof>, StoreError>;

    /// Fetch a dispute.
    fn dispute(&self, id: DisputeId) -> Result<Option<EscrowDispute>, StoreError>;
    /// Disputes on a transaction, oldest first.
    fn disputes_for(&self, tx: TransactionId) -> Result<Vec<EscrowDispute>, StoreError>;
    /// Every dispute not yet closed.
    fn open_disputes(&self) -> Result<Vec<EscrowDispute>, StoreError>;

    /// Fetch a rating.
    fn rating(&self, id: RatingId) -> Result<Option<TransactionRating>, StoreError>;
    /// Ratings on a transaction.
    fn ratings_for(&self, tx: TransactionId) -> Result<Vec<TransactionRating>, StoreError>;

    /// Fetch a user's reputation record.
    fn reputation(&self, user: &UserId) -> Result<Option<UserReputation>, StoreError>;

    /// Fetch a compensation record.
    fn compensation(&self, id: CompensationId) -> Result<Option<CompensationRecord>, StoreError>;
    /// Compensation records for a user, oldest first.
    fn compensations_for(&self, user: &UserId) -> Result<Vec<CompensationRecord>, StoreError>;

    /// Response recorded for an idempotency scope.
    fn recorded_response(&self, scope: &str) -> Result<Option<serde_json::Value>, StoreError>;
    /// Record a response; the first recording for a scope wins.
    fn record_response(&self, scope: String, response: serde_json::Value) -> Result<(), StoreError>;

    /// Apply a batch atomically.
    fn commit(&self, work: UnitOfWork) -> Result<(), StoreError>;
}

// -- Generic In-Memory Store ------------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// Synchronous `parking_lot` locking: the lock is never held across an
/// `.await` and is not poisoned by a panicking writer.
#[derive(Debug)]
pub struct Store<K, T> {
    data: Arc<RwLock<HashMap<K, T>>>,
}

impl<K, T> Clone for Store<K, T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<K: Eq + Hash, T: Clone> Store<K, T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, key: K, value: T) -> Option<T> {
        self.data.write().insert(key, value)
    }

    /// Retrieve a record by key.
    pub fn get(&self, key: &K) -> Option<T> {
        self.data.read().get(key).cloned()
    }

    /// Records matching a predicate.
    pub fn filter(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        self.data
            .read()
            .values()
            .filter(|v| pred(v))
            .cloned()
            .collect()
    }

    /// List all records.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, T: Clone> Default for Store<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Memory Ledger ----------------------------------------------------------------

/// In-memory [`LedgerStore`].
#[derive(Debug, Default)]
pub struct MemoryLedger {
    transactions: Store<TransactionId, EscrowTransaction>,
    proofs: Store<ProofId, EscrowProof>,
    disputes: Store<DisputeId, EscrowDispute>,
    ratings: Store<RatingId, TransactionRating>,
    reputations: Store<UserId, UserReputation>,
    compensations: Store<CompensationId, CompensationRecord>,
    responses: Store<String, serde_json::Value>,
    commit_lock: Mutex<()>,
}

impl MemoryLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, work: &UnitOfWork) -> Result<(), StoreError> {
        for write in &work.transactions {
            let found = self
                .transactions
                .get(&write.record.id)
                .map(|tx| tx.version());
            check_version("transaction", write.record.id.to_string(), write.expected, found)?;
        }
        for write in &work.reputations {
            let found = self
                .reputations
                .get(&write.record.user_id)
                .map(|rep| rep.version);
            check_version("reputation", write.record.user_id.to_string(), write.expected, found)?;
        }
        for (i, rating) in work.new_ratings.iter().enumerate() {
            let same_key = |r: &TransactionRating| {
                r.escrow_transaction_id == rating.escrow_transaction_id
                    && r.rater_id == rating.rater_id
            };
            let in_batch = work.new_ratings[..i].iter().any(same_key);
            if in_batch || !self.ratings.filter(same_key).is_empty() {
                return Err(StoreError::Duplicate {
                    entity: "rating",
                    id: format!("{}/{}", rating.escrow_transaction_id, rating.rater_id),
                });
            }
        }
        Ok(())
    }
}

fn check_version(
    entity: &'static str,
    id: String,
    expected: Expected,
    found: Option<u64>,
) -> Result<(), StoreError> {
    let ok = match expected {
        Expected::Absent => found.is_none(),
        Expected::Version(v) => found == Some(v),
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::StaleWrite {
            entity,
            id,
            expected,
            found,
        })
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

impl LedgerStore for MemoryLedger {
    fn transaction(&self, id: TransactionId) -> Result<Option<EscrowTransaction>, StoreError> {
        Ok(self.transactions.get(&id))
    }

    fn transactions(&self) -> Result<Vec<EscrowTransaction>, StoreError> {
        Ok(sorted_by(self.transactions.list(), |tx| tx.created_at))
    }

    fn proof(&self, id: ProofId) -> Result<Option<EscrowProof>, StoreError> {
        Ok(self.proofs.get(&id))
    }

    fn proofs_for(&self, tx: TransactionId) -> Result<Vec<EscrowProof>, StoreError> {
        Ok(sorted_by(
            self.proofs.filter(|p| p.escrow_transaction_id == tx),
            |p| p.submitted_at,
        ))
    }

    fn dispute(&self, id: DisputeId) -> Result<Option<EscrowDispute>, StoreError> {
        Ok(self.disputes.get(&id))
    }

    fn disputes_for(&self, tx: TransactionId) -> Result<Vec<EscrowDispute>, StoreError> {
        Ok(sorted_by(
            self.disputes.filter(|d| d.escrow_transaction_id == tx),
            |d| d.created_at,
        ))
    }

    fn open_disputes(&self) -> Result<Vec<EscrowDispute>, StoreError> {
        Ok(sorted_by(self.disputes.filter(|d| d.is_open()), |d| {
            d.created_at
        }))
    }

    fn rating(&self, id: RatingId) -> Result<Option<TransactionRating>, StoreError> {
        Ok(self.ratings.get(&id))
    }

    fn ratings_for(&self, tx: TransactionId) -> Result<Vec<TransactionRating>, StoreError> {
        Ok(sorted_by(
            self.ratings.filter(|r| r.escrow_transaction_id == tx),
            |r| r.created_at,
        ))
    }

    fn reputation(&self, user: &UserId) -> Result<Option<UserReputation>, StoreError> {
        Ok(self.reputations.get(user))
    }

    fn compensation(&self, id: CompensationId) -> Result<Option<CompensationRecord>, StoreError> {
        Ok(self.compensations.get(&id))
    }

    fn compensations_for(&self, user: &UserId) -> Result<Vec<CompensationRecord>, StoreError> {
        Ok(sorted_by(
            self.compensations.filter(|c| &c.user_id == user),
            |c| c.created_at,
        ))
    }

    fn recorded_response(&self, scope: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.responses.get(&scope.to_string()))
    }

    fn record_response(&self, scope: String, response: serde_json::Value) -> Result<(), StoreError> {
        let _commit = self.commit_lock.lock();
        if self.responses.get(&scope).is_none() {
            self.responses.insert(scope, response);
        }
        Ok(())
    }

    fn commit(&self, work: UnitOfWork) -> Result<(), StoreError> {
        let _commit = self.commit_lock.lock();
        self.check(&work)?;
        for write in work.transactions {
            self.transactions.insert(write.record.id, write.record);
        }
        for proof in work.proofs {
            self.proofs.insert(proof.id, proof);
        }
        for dispute in work.disputes {
            self.disputes.insert(dispute.id, dispute);
        }
        for rating in work.new_ratings.into_iter().chain(work.ratings) {
            self.ratings.insert(rating.id, rating);
        }
        for write in work.reputations {
            self.reputations
                .insert(write.record.user_id.clone(), write.record);
        }
        for record in work.compensations {
            self.compensations.insert(record.id, record);
        }
        Ok(())
    }
}
