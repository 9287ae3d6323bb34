//! # escrow-arbitration: Dispute Resolution
//!
//! - **Dispute** ([`dispute`]): the [`EscrowDispute`] sub-machine, active
//!   while its transaction is `DISPUTED`, from opening through review,
//!   evidence requests, escalation and resolution to closure.
//!
//! - **Decisions** ([`decision`]): automated [`Assessment`]s, operator
//!   [`ManualDecision`]s, and the [`Award`] fixed at resolution.
//!
//! - **Evidence** ([`proof`]): [`EscrowProof`] submission and verification.
//!
//! - **Case** ([`case`]): the [`CaseBundle`] handed to the arbitration
//!   collaborator.
//!
//! - **Compensation** ([`compensation`]): [`CompensationRecord`]s issued to
//!   winning parties.

pub mod case;
pub mod compensation;
pub mod decision;
pub mod dispute;
pub mod error;
pub mod proof;

pub use case::CaseBundle;
pub use compensation::{
    CompensationOutcome, CompensationRecord, CompensationStatus, RelatedEntityType,
};
pub use decision::{ArbitrationDecision, Assessment, Award, DecisionSource, ManualDecision, Verdict};
pub use dispute::{DecisionOutcome, DisputeOrigin, DisputeStatus, DisputeTransition, EscrowDispute};
pub use error::ArbitrationError;
pub use proof::{EscrowProof, NewProof, ProofType};
