//! # escrow-engine: Escrow Orchestration
//!
//! Ties the domain crates together behind one [`EscrowEngine`]:
//!
//! - **Store** ([`store`]): the [`LedgerStore`] trait, atomic
//!   [`UnitOfWork`] commits with optimistic version checks, and the
//!   in-memory [`MemoryLedger`].
//!
//! - **Locks** ([`locks`]): one FIFO async mutex per transaction so
//!   concurrent requests on the same escrow apply in arrival order.
//!
//! - **Guard** ([`guard`]): pure authorization predicates consulted before
//!   every mutation.
//!
//! - **Collaborators** ([`collaborators`]): settlement, arbitration and
//!   notification traits, plus bounded retry with exponential backoff.
//!   [`mock`] has deterministic implementations.
//!
//! - **Engine** ([`engine`]): the public operations. Each locks, reads,
//!   guards, transitions, commits, then dispatches events after the lock is
//!   released.
//!
//! - **Sweep** ([`sweep`]): expiry, review windows and retry of stranded
//!   disputes, run periodically by [`spawn_sweeper`].
//!
//! - **Config** ([`config`]): environment-driven [`EngineConfig`].

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod locks;
pub mod mock;
pub mod outbox;
pub mod store;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;

pub use collaborators::{
    call_with_retry, ArbitrationOracle, CollaboratorError, DepositStatus, NotificationSink,
    SettlementGateway, SettlementReceipt,
};
pub use config::{ConfigError, EngineConfig, RetryPolicy};
pub use engine::{
    Collaborators, CreateTransaction, EscrowEngine, OpenDispute, ProofSubmission, SubmitRating,
};
pub use error::{EngineError, Rejection};
pub use locks::LockRegistry;
pub use mock::{LogNotifier, MockCollaborators, MockSettlement, RecordingNotifier, ScriptedOracle};
pub use outbox::Outbox;
pub use store::{Expected, LedgerStore, MemoryLedger, StoreError, UnitOfWork};
pub use sweep::{spawn_sweeper, SweepReport, EXPIRY_DISPUTE_REASON};
