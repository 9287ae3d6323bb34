//! # escrow-state: Escrow Transaction State Machine
//!
//! - **Status** ([`status`]): the closed [`EscrowStatus`] enumeration and the
//!   transition table, including which authority may drive each edge.
//!
//! - **Transaction** ([`transaction`]): [`EscrowTransaction`] and its guarded
//!   transition methods. Status can only change through these methods; each
//!   one validates completely before mutating, so a rejected transition
//!   leaves the transaction untouched.
//!
//! - **Audit** ([`audit`]): append-only, SHA-256 hash-chained audit entries.
//!
//! - **Events** ([`event`]): the domain event emitted for every status change.
//!
//! - **Timers** ([`timers`]): expiry and review-window evaluation used by the
//!   periodic sweep.

pub mod audit;
pub mod error;
pub mod event;
pub mod status;
pub mod timers;
pub mod transaction;

pub use audit::{verify_chain, AuditEntry};
pub use error::TransitionError;
pub use event::TransitionEvent;
pub use status::{EscrowStatus, TransitionAuthority};
pub use timers::{expiry_action, ExpiryAction, ReviewWindows};
pub use transaction::{
    CancellationConsent, DepositConfirmation, DisputeOutcome, DisputeSettlement,
    EscrowTransaction, NewTransaction, PartyRole, PendingSettlement, ReleaseReceipt,
};
