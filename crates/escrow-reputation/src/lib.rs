//! # escrow-reputation: Reputation Ledger
//!
//! - **Reputation** ([`reputation`]): [`UserReputation`] counters and the
//!   trust-level ladder, re-evaluated after every counter update.
//!
//! - **Scoring** ([`score`]): the deterministic [`overall_score`] formula.
//!
//! - **Policy** ([`policy`]): thresholds and strike cooldowns.
//!
//! - **Ratings** ([`rating`]): [`TransactionRating`] and 1–5 [`Stars`].

pub mod error;
pub mod policy;
pub mod rating;
pub mod reputation;
pub mod score;

pub use error::ReputationError;
pub use policy::ReputationPolicy;
pub use rating::{Sentiment, Stars, TransactionRating};
pub use reputation::{TrustLevel, UserReputation, VerificationStatus};
pub use score::overall_score;
