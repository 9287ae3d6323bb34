//! # Event Outbox
//!
//! Transition events collected while building a unit of work. They are
//! delivered only after the commit succeeded and the per-transaction lock
//! was released. Delivery is best-effort: a failed or slow sink is logged
//! and counted, and never affects the committed state.

use std::time::Duration;

use escrow_state::TransitionEvent;

use crate::collaborators::NotificationSink;

/// Committed events awaiting delivery, in commit order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outbox {
    events: Vec<TransitionEvent>,
}

impl Outbox {
    /// An empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event.
    pub fn push(&mut self, event: TransitionEvent) {
        self.events.push(event);
    }

    /// Queue an event if there is one.
    pub fn push_opt(&mut self, event: Option<TransitionEvent>) {
        self.events.extend(event);
    }

    /// Append another outbox.
    pub fn extend(&mut self, other: Outbox) {
        self.events.extend(other.events);
    }

    /// Queued events.
    pub fn events(&self) -> &[TransitionEvent] {
        &self.events
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Deliver every event once, each bounded by `timeout`.
    pub async fn deliver(self, sink: &dyn NotificationSink, timeout: Duration) {
        for event in self.events {
            metrics::counter!("escrow_transitions_total", "to" => event.to_status.as_str())
                .increment(1);
            tracing::info!(
                transaction_id = %event.transaction_id,
                from = %event.from_status,
                to = %event.to_status,
                actor = %event.actor,
                "transition committed"
            );
            let outcome = match tokio::time::timeout(timeout, sink.publish(&event)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("timed out after {timeout:?}")),
            };
            if let Err(reason) = outcome {
                metrics::counter!("escrow_notifications_failed_total").increment(1);
                tracing::warn!(
                    event_id = %event.event_id,
                    transaction_id = %event.transaction_id,
                    "notification delivery failed: {reason}"
                );
            }
        }
    }
}

impl From<TransitionEvent> for Outbox {
    fn from(event: TransitionEvent) -> Self {
        Self {
            events: vec![event],
        }
    }
}
