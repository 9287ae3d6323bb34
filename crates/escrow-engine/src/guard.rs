//! # Authorization Guard
//!
//! Pure predicates over (actor, transaction, reputation). Nothing here
//! mutates or performs I/O; each `can_*` has a `check_*` twin that returns
//! the typed rejection instead of `false`. Every engine entry point calls
//! the relevant check before it mutates anything.

use chrono::{DateTime, Utc};

use escrow_core::Actor;
use escrow_reputation::UserReputation;
use escrow_state::{EscrowStatus, EscrowTransaction, PartyRole, TransitionAuthority};

use crate::error::EngineError;

/// Whether `actor` may move `tx` to `target`.
pub fn can_transition(actor: &Actor, tx: &EscrowTransaction, target: EscrowStatus) -> bool {
    check_transition(actor, tx, target).is_ok()
}

/// Check that `actor` may move `tx` to `target`: party membership, the
/// transition table, any payout in flight, then the authority for that
/// edge.
///
/// # Errors
///
/// [`EngineError::Unauthorized`] for non-parties or the wrong role,
/// [`EngineError::InvalidTransition`] for a terminal transaction, a
/// non-edge, or a target other than the one a reserved payout leads to.
pub fn check_transition(
    actor: &Actor,
    tx: &EscrowTransaction,
    target: EscrowStatus,
) -> Result<(), EngineError> {
    let role = match actor {
        Actor::User(user) => Some(check_party(actor, tx).map_err(|_| {
            EngineError::Unauthorized(format!("{user} is not a party to transaction {}", tx.id))
        })?),
        _ => None,
    };

    let from = tx.status();
    if from.is_terminal() {
        return Err(EngineError::InvalidTransition(format!(
            "transaction {} is in terminal status {from}",
            tx.id
        )));
    }
    if !from.can_transition_to(target) {
        return Err(EngineError::InvalidTransition(format!(
            "{from} cannot move to {target}"
        )));
    }
    if let Some(pending) = tx.pending_settlement() {
        if pending.target() != target {
            return Err(EngineError::InvalidTransition(format!(
                "transaction {} has a {pending} in flight and cannot move to {target}",
                tx.id
            )));
        }
    }

    let authorities = from.authorities_for(target);
    let permitted = match (actor, role) {
        (Actor::User(_), Some(PartyRole::Buyer)) => authorities
            .iter()
            .any(|a| matches!(a, TransitionAuthority::Buyer | TransitionAuthority::BothParties)),
        (Actor::User(_), Some(PartyRole::Seller)) => authorities
            .iter()
            .any(|a| matches!(a, TransitionAuthority::Seller | TransitionAuthority::BothParties)),
        (Actor::System, _) => authorities.iter().any(|a| {
            matches!(
                a,
                TransitionAuthority::Timer | TransitionAuthority::Arbitration
            )
        }),
        _ => false,
    };
    if !permitted {
        return Err(EngineError::Unauthorized(format!(
            "{actor} may not move transaction {} from {from} to {target}",
            tx.id
        )));
    }
    Ok(())
}

/// The actor's role on `tx`.
///
/// # Errors
///
/// [`EngineError::Unauthorized`] unless the actor is the buyer or seller.
pub fn check_party(actor: &Actor, tx: &EscrowTransaction) -> Result<PartyRole, EngineError> {
    actor
        .user()
        .and_then(|user| tx.role_of(user))
        .ok_or_else(|| {
            EngineError::Unauthorized(format!("{actor} is not a party to transaction {}", tx.id))
        })
}

/// Check that `actor` is an operator.
///
/// # Errors
///
/// [`EngineError::Unauthorized`] otherwise.
pub fn check_operator(actor: &Actor) -> Result<(), EngineError> {
    if actor.is_operator() {
        Ok(())
    } else {
        Err(EngineError::Unauthorized(format!(
            "{actor} is not an operator"
        )))
    }
}

/// Parties and operators may read a transaction and its records.
///
/// # Errors
///
/// [`EngineError::Unauthorized`] for anyone else.
pub fn check_view(actor: &Actor, tx: &EscrowTransaction) -> Result<(), EngineError> {
    if actor.is_operator() || actor.is_system() {
        return Ok(());
    }
    check_party(actor, tx).map(|_| ())
}

/// Whether `actor` may rate the counterparty on `tx`.
pub fn can_rate(actor: &Actor, tx: &EscrowTransaction, already_rated: bool) -> bool {
    check_rate(actor, tx, already_rated).is_ok()
}

/// Ratings are allowed once per party, after the transaction completed or
/// was refunded.
///
/// # Errors
///
/// [`EngineError::Unauthorized`] for non-parties,
/// [`EngineError::InvalidTransition`] before settlement,
/// [`EngineError::AlreadyExists`] for a second rating.
pub fn check_rate(
    actor: &Actor,
    tx: &EscrowTransaction,
    already_rated: bool,
) -> Result<(), EngineError> {
    check_party(actor, tx)?;
    if !matches!(tx.status(), EscrowStatus::Completed | EscrowStatus::Refunded) {
        return Err(EngineError::InvalidTransition(format!(
            "transaction {} cannot be rated in status {}",
            tx.id,
            tx.status()
        )));
    }
    if already_rated {
        return Err(EngineError::AlreadyExists(format!(
            "{actor} has already rated transaction {}",
            tx.id
        )));
    }
    Ok(())
}

/// Whether `actor` may open a dispute on `tx`.
pub fn can_open_dispute(
    actor: &Actor,
    tx: &EscrowTransaction,
    has_open_dispute: bool,
    reputation: Option<&UserReputation>,
    now: DateTime<Utc>,
) -> bool {
    check_open_dispute(actor, tx, has_open_dispute, reputation, now).is_ok()
}

/// Parties (or the expiry timer) may open one dispute at a time on a
/// disputable transaction. A party in cooldown may not.
///
/// # Errors
///
/// [`EngineError::Unauthorized`], [`EngineError::InvalidTransition`], or
/// [`EngineError::ConflictingDispute`].
pub fn check_open_dispute(
    actor: &Actor,
    tx: &EscrowTransaction,
    has_open_dispute: bool,
    reputation: Option<&UserReputation>,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if !actor.is_system() {
        check_party(actor, tx)?;
        check_not_cooling_down(actor, reputation, now)?;
    }
    if has_open_dispute {
        return Err(EngineError::ConflictingDispute(format!(
            "transaction {} already has an open dispute",
            tx.id
        )));
    }
    check_transition(actor, tx, EscrowStatus::Disputed)
}

/// Whether `actor` may open a new escrow.
pub fn can_initiate(actor: &Actor, reputation: Option<&UserReputation>, now: DateTime<Utc>) -> bool {
    check_initiate(actor, reputation, now).is_ok()
}

/// Only users outside cooldown open escrows.
///
/// # Errors
///
/// [`EngineError::Unauthorized`].
pub fn check_initiate(
    actor: &Actor,
    reputation: Option<&UserReputation>,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if actor.user().is_none() {
        return Err(EngineError::Unauthorized(format!(
            "{actor} cannot open an escrow"
        )));
    }
    check_not_cooling_down(actor, reputation, now)
}

/// Refuse users inside their cooldown window.
///
/// `trust_level` is not consulted: strikes never decay, so `Flagged` is a
/// lasting label, and the cooldown that accompanies each strike past the
/// threshold is the sanction. A flagged user whose cooldown has run out
/// may act again; the next lost dispute brings a longer cooldown.
fn check_not_cooling_down(
    actor: &Actor,
    reputation: Option<&UserReputation>,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    match reputation {
        Some(rep) if rep.in_cooldown(now) => Err(EngineError::Unauthorized(format!(
            "{actor} is in cooldown until {}",
            rep.cooldown_until
                .map(|t| t.to_rfc3339())
                .unwrap_or_default()
        ))),
        _ => Ok(()),
    }
}
