//! # Timers
//!
//! Pure evaluation of the actor-less transitions: deadline expiry and the
//! auto-verify / auto-release review windows. The sweep in `escrow-engine`
//! asks these functions what is due and then drives the transition through
//! the ordinary guarded path.

use chrono::{DateTime, Duration, Utc};

use crate::status::EscrowStatus;
use crate::transaction::EscrowTransaction;

/// What the sweep must do with an expired transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAction {
    /// Unfunded: cancel.
    Cancel,
    /// Funds held: force a dispute so arbitration decides custody.
    ForceDispute,
}

/// Expiry handling due for `tx` at `now`, if any.
///
/// Terminal and already-disputed transactions need nothing; a dispute
/// is already deciding their funds.
pub fn expiry_action(tx: &EscrowTransaction, now: DateTime<Utc>) -> Option<ExpiryAction> {
    if !tx.is_expired(now) {
        return None;
    }
    match tx.status() {
        EscrowStatus::Initiated => Some(ExpiryAction::Cancel),
        s if s.is_disputable() => Some(ExpiryAction::ForceDispute),
        _ => None,
    }
}

/// Windows after which the engine acts for an unresponsive buyer.
/// `None` disables the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewWindows {
    /// `EVIDENCE_SUBMITTED` older than this is verified automatically.
    pub auto_verify: Option<Duration>,
    /// `VERIFIED` older than this is released automatically.
    pub auto_release: Option<Duration>,
}

impl ReviewWindows {
    /// Whether `tx` is due for automatic verification.
    pub fn auto_verify_due(&self, tx: &EscrowTransaction, now: DateTime<Utc>) -> bool {
        match (self.auto_verify, tx.status(), tx.evidence_submitted_at) {
            (Some(window), EscrowStatus::EvidenceSubmitted, Some(at)) => now - at >= window,
            _ => false,
        }
    }

    /// Whether `tx` is due for automatic release.
    pub fn auto_release_due(&self, tx: &EscrowTransaction, now: DateTime<Utc>) -> bool {
        match (self.auto_release, tx.status(), tx.verified_at) {
            (Some(window), EscrowStatus::Verified, Some(at)) => now - at >= window,
            _ => false,
        }
    }
}
