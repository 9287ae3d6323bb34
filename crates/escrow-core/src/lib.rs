#![deny(missing_docs)]

//! # escrow-core: Foundational Types for the Escrow Engine
//!
//! Every other crate in the workspace depends on `escrow-core`; it depends on
//! nothing internal.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** A [`DisputeId`] cannot be passed
//!    where a [`TransactionId`] is expected. User identifiers are validated
//!    at construction.
//!
//! 2. **Fixed-point money.** [`Amount`] wraps `rust_decimal::Decimal`. Amounts
//!    are never floating point and can never be negative.
//!
//! 3. **Explicit actors.** Every mutation names an [`Actor`]: a user, an
//!    operator, or the engine itself acting on a timer or an arbitration
//!    outcome.
//!
//! 4. **Injectable time.** Components read time through [`Clock`] so that
//!    expiry and review windows are testable without sleeping.

pub mod actor;
pub mod error;
pub mod identity;
pub mod money;
pub mod temporal;

pub use actor::Actor;
pub use error::ValidationError;
pub use identity::{
    CompensationId, DisputeId, IdempotencyKey, ProofId, RatingId, TransactionId, UserId,
};
pub use money::Amount;
pub use temporal::{Clock, ManualClock, SystemClock};
