//! # Escrow Status
//!
//! The custody lifecycle as a closed enumeration. Unknown status names are
//! rejected when parsed; there is no free-text status anywhere.
//!
//! ## Transition Graph
//!
//! ```text
//! INITIATED ──fund──▶ FUNDED ──evidence──▶ EVIDENCE_SUBMITTED ──verify──▶ VERIFIED ──release──▶ COMPLETED
//!     │                 │  │                      │                          │
//!     │                 │  └──────────dispute─────┴──────────────────────────┘
//!     │                 │                         │
//!     │                 │                         ▼
//!     │                 │                     DISPUTED ──resolved_seller──▶ COMPLETED
//!     │                 │                         └─────resolved_buyer/split──▶ REFUNDED
//!     └──cancel──┬──────┘
//!                ▼
//!            CANCELLED
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// The custody status of an escrow transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Created by the seller; no funds held yet.
    Initiated,
    /// Buyer's deposit confirmed by the settlement collaborator.
    Funded,
    /// Seller has submitted proof of delivery.
    EvidenceSubmitted,
    /// Buyer (or the review timer) accepted the evidence.
    Verified,
    /// Under arbitration.
    Disputed,
    /// Funds released to the seller. Terminal.
    Completed,
    /// Funds (wholly or partly) returned to the buyer. Terminal.
    Refunded,
    /// Cancelled before delivery. Terminal.
    Cancelled,
}

/// Who may drive a particular edge of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAuthority {
    /// The transaction's buyer.
    Buyer,
    /// The transaction's seller.
    Seller,
    /// Buyer and seller jointly (each records consent).
    BothParties,
    /// The engine acting on a timer (expiry, review windows).
    Timer,
    /// An arbitration outcome, automated or operator-supplied.
    Arbitration,
}

impl EscrowStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [EscrowStatus; 8] = [
        Self::Initiated,
        Self::Funded,
        Self::EvidenceSubmitted,
        Self::Verified,
        Self::Disputed,
        Self::Completed,
        Self::Refunded,
        Self::Cancelled,
    ];

    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Funded => "FUNDED",
            Self::EvidenceSubmitted => "EVIDENCE_SUBMITTED",
            Self::Verified => "VERIFIED",
            Self::Disputed => "DISPUTED",
            Self::Completed => "COMPLETED",
            Self::Refunded => "REFUNDED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse a canonical status name. Only exact names are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// Whether no further mutation is permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded | Self::Cancelled)
    }

    /// Whether the settlement collaborator currently holds the buyer's funds.
    pub fn holds_funds(&self) -> bool {
        matches!(
            self,
            Self::Funded | Self::EvidenceSubmitted | Self::Verified | Self::Disputed
        )
    }

    /// Whether a dispute may be opened from this status.
    pub fn is_disputable(&self) -> bool {
        matches!(
            self,
            Self::Funded | Self::EvidenceSubmitted | Self::Verified
        )
    }

    /// Valid target statuses from this status.
    pub fn valid_transitions(&self) -> &'static [EscrowStatus] {
        match self {
            Self::Initiated => &[Self::Funded, Self::Cancelled],
            Self::Funded => &[Self::EvidenceSubmitted, Self::Disputed, Self::Cancelled],
            Self::EvidenceSubmitted => &[Self::Verified, Self::Disputed],
            Self::Verified => &[Self::Completed, Self::Disputed],
            Self::Disputed => &[Self::Completed, Self::Refunded],
            Self::Completed | Self::Refunded | Self::Cancelled => &[],
        }
    }

    /// Whether `self → target` is an edge of the transition table.
    pub fn can_transition_to(&self, target: EscrowStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Authorities permitted to drive `self → target`. Empty for non-edges.
    pub fn authorities_for(&self, target: EscrowStatus) -> &'static [TransitionAuthority] {
        use TransitionAuthority::*;
        match (self, target) {
            (Self::Initiated, Self::Funded) => &[Buyer],
            (Self::Funded, Self::EvidenceSubmitted) => &[Seller],
            (Self::EvidenceSubmitted, Self::Verified) => &[Buyer, Timer],
            (Self::Verified, Self::Completed) => &[Buyer, Timer],
            (Self::Funded | Self::EvidenceSubmitted | Self::Verified, Self::Disputed) => {
                &[Buyer, Seller, Timer]
            }
            (Self::Disputed, Self::Completed | Self::Refunded) => &[Arbitration],
            (Self::Initiated, Self::Cancelled) => &[BothParties, Timer],
            (Self::Funded, Self::Cancelled) => &[BothParties],
            _ => &[],
        }
    }
}

impl FromStr for EscrowStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| TransitionError::UnknownStatus(s.to_string()))
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn names_round_trip() {
        for status in EscrowStatus::ALL {
            assert_eq!(EscrowStatus::from_name(status.as_str()), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn free_text_variants_are_rejected() {
        for name in ["in_progress", "canceled", "cancelled", "Funded", ""] {
            assert!(name.parse::<EscrowStatus>().is_err(), "{name} must be rejected");
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in EscrowStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn only_funded_statuses_are_disputable() {
        let disputable: Vec<_> = EscrowStatus::ALL
            .into_iter()
            .filter(|s| s.is_disputable())
            .collect();
        assert_eq!(
            disputable,
            vec![
                EscrowStatus::Funded,
                EscrowStatus::EvidenceSubmitted,
                EscrowStatus::Verified
            ]
        );
    }

    #[test]
    fn timer_may_only_cancel_unfunded() {
        assert!(EscrowStatus::Initiated
            .authorities_for(EscrowStatus::Cancelled)
            .contains(&TransitionAuthority::Timer));
        assert!(!EscrowStatus::Funded
            .authorities_for(EscrowStatus::Cancelled)
            .contains(&TransitionAuthority::Timer));
    }

    fn any_status() -> impl Strategy<Value = EscrowStatus> {
        (0usize..EscrowStatus::ALL.len()).prop_map(|i| EscrowStatus::ALL[i])
    }

    proptest! {
        /// Every edge has at least one authority and every non-edge has none.
        #[test]
        fn authority_table_matches_edges(from in any_status(), to in any_status()) {
            let edge = from.can_transition_to(to);
            prop_assert_eq!(edge, !from.authorities_for(to).is_empty());
        }

        /// No edge returns to INITIATED or leaves a terminal status.
        #[test]
        fn edges_move_forward(from in any_status(), to in any_status()) {
            if from.can_transition_to(to) {
                prop_assert!(to != EscrowStatus::Initiated);
                prop_assert!(!from.is_terminal());
            }
        }
    }
}
