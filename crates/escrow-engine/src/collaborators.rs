//! # External Collaborators
//!
//! Narrow async interfaces to the systems the engine does not own: the
//! settlement rail that actually moves funds, the arbitration oracle, and
//! the notification sink. The engine never holds a per-transaction lock
//! while awaiting one of these.
//!
//! [`call_with_retry`] bounds every attempt with a timeout and retries
//! transient failures with exponential backoff (200ms, 400ms, 800ms by
//! default). Exhaustion becomes [`EngineError::CollaboratorUnavailable`];
//! it never implies a transition.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use escrow_arbitration::{Assessment, CaseBundle};
use escrow_core::{Amount, UserId};
use escrow_state::{EscrowTransaction, TransitionEvent};

use crate::config::RetryPolicy;
use crate::error::EngineError;

/// Failure reported by (or about) a collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The attempt exceeded its time bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Transient failure; worth retrying.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The collaborator refused the request; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Result of a deposit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositStatus {
    /// Whether the buyer's funds have arrived.
    pub confirmed: bool,
    /// Settlement reference of the deposit.
    pub settlement_ref: Option<String>,
}

/// Receipt for a fund movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// Settlement reference of the movement.
    pub settlement_ref: String,
}

/// The settlement rail. Implementations must be idempotent by transaction
/// id plus operation, since the engine may repeat a call after a timeout.
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// Has the buyer's deposit for `tx` arrived?
    async fn confirm_deposit(&self, tx: &EscrowTransaction) -> Result<DepositStatus, CollaboratorError>;

    /// Pay `amount` of the held funds to `recipient`.
    async fn release_funds(
        &self,
        tx: &EscrowTransaction,
        recipient: &UserId,
        amount: Amount,
    ) -> Result<SettlementReceipt, CollaboratorError>;

    /// Return `amount` of the held funds to `recipient`.
    async fn refund(
        &self,
        tx: &EscrowTransaction,
        recipient: &UserId,
        amount: Amount,
    ) -> Result<SettlementReceipt, CollaboratorError>;
}

/// The arbitration oracle.
#[async_trait]
pub trait ArbitrationOracle: Send + Sync {
    /// Assess a case.
    async fn assess(&self, case: &CaseBundle) -> Result<Assessment, CollaboratorError>;
}

/// Receiver of committed transition events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one event.
    async fn publish(&self, event: &TransitionEvent) -> Result<(), CollaboratorError>;
}

/// Call a collaborator with a per-attempt timeout and exponential backoff.
///
/// The closure is invoked up to `max_retries + 1` times. Only
/// [`CollaboratorError::Timeout`] and [`CollaboratorError::Unavailable`]
/// are retried; [`CollaboratorError::Rejected`] returns immediately.
pub async fn call_with_retry<T, F, Fut>(
    operation: &'static str,
    policy: &RetryPolicy,
    f: F,
) -> Result<T, EngineError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(policy.timeout)),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(CollaboratorError::Rejected(reason)) => {
                return Err(EngineError::CollaboratorUnavailable {
                    operation: operation.to_string(),
                    reason: format!("rejected: {reason}"),
                });
            }
            Err(e) if attempt >= policy.max_retries => {
                tracing::warn!(operation, attempts = attempt + 1, "collaborator call exhausted retries: {e}");
                return Err(EngineError::CollaboratorUnavailable {
                    operation: operation.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.base_delay.saturating_mul(2u32.saturating_pow(attempt));
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    "collaborator call failed, retrying in {delay:?}: {e}"
                );
                metrics::counter!("escrow_collaborator_retries_total", "op" => operation).increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
