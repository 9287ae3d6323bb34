//! # Transition Events
//!
//! The domain event published to the notification collaborator after a
//! status change has been committed. Delivery is best-effort; the event
//! id lets consumers drop duplicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use escrow_core::{Actor, TransactionId};

use crate::status::EscrowStatus;

/// A committed status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// The transaction that changed.
    pub transaction_id: TransactionId,
    /// Status before the change.
    pub from_status: EscrowStatus,
    /// Status after the change.
    pub to_status: EscrowStatus,
    /// Who drove the change.
    pub actor: Actor,
    /// When the change was applied.
    pub timestamp: DateTime<Utc>,
}

impl TransitionEvent {
    pub(crate) fn new(
        transaction_id: TransactionId,
        from_status: EscrowStatus,
        to_status: EscrowStatus,
        actor: Actor,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            transaction_id,
            from_status,
            to_status,
            actor,
            timestamp,
        }
    }
}
