//! # Expiry Sweep
//!
//! The engine's only autonomous actor. Each pass:
//!
//! - cancels expired unfunded escrows and forces a dispute on expired
//!   escrows that hold funds,
//! - auto-verifies and auto-releases transactions whose buyer let the
//!   review window lapse,
//! - resubmits disputes still waiting for an assessment and finishes
//!   settlement of resolved disputes whose fund movement failed earlier,
//! - finishes releases and refunds left reserved by a request whose payout
//!   failed or was abandoned.
//!
//! Everything goes through the same guarded, locked path as a user request
//! with [`Actor::System`] as the actor, so a sweep racing a user sees the
//! same conflicts a second user would.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use escrow_core::{Actor, TransactionId};
use escrow_state::{expiry_action, ExpiryAction, PendingSettlement};

use crate::engine::EscrowEngine;
use crate::error::{EngineError, Rejection};
use crate::guard;
use crate::outbox::Outbox;
use crate::store::UnitOfWork;

/// Reason recorded on disputes the sweep opens.
pub const EXPIRY_DISPUTE_REASON: &str = "escrow expired before completion";

/// What one sweep pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Unfunded escrows cancelled at expiry.
    pub cancelled: usize,
    /// Funded escrows pushed into dispute at expiry.
    pub disputes_forced: usize,
    /// Evidence accepted on the buyer's behalf.
    pub auto_verified: usize,
    /// Funds released on the buyer's behalf.
    pub auto_released: usize,
    /// Disputes resubmitted for assessment.
    pub assessments_retried: usize,
    /// Resolved disputes whose settlement was retried.
    pub settlements_retried: usize,
    /// Reserved releases and refunds paid out on the parties' behalf.
    #[serde(default)]
    pub payouts_resumed: usize,
    /// Actions that failed and will be retried next pass.
    pub failures: usize,
    /// Idle lock entries dropped.
    pub locks_pruned: usize,
}

impl SweepReport {
    fn is_idle(&self) -> bool {
        self.cancelled
            + self.disputes_forced
            + self.auto_verified
            + self.auto_released
            + self.assessments_retried
            + self.settlements_retried
            + self.payouts_resumed
            + self.failures
            == 0
    }
}

impl EscrowEngine {
    /// Run one sweep pass.
    ///
    /// Individual failures are logged and counted; only a failure to list
    /// the records to sweep is returned as an error.
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let now = self.now();
        let mut report = SweepReport::default();
        // Snapshot before forcing new disputes so a dispute opened (and
        // assessed) in this pass is not resubmitted in the same pass.
        let pending = self.store().open_disputes()?;
        let windows = self.config().review_windows;
        let grace = assessment_grace(self);

        for tx in self.store().transactions()? {
            if tx.status().is_terminal() {
                continue;
            }
            if let Some(kind) = tx.pending_settlement() {
                let reserved_at = tx.audit_log().last().map_or(tx.created_at, |e| e.timestamp);
                if now - reserved_at < grace {
                    continue;
                }
                let id = tx.id;
                report.payouts_resumed += 1;
                let outcome = match kind {
                    PendingSettlement::Release => self.finish_release(&Actor::System, tx).await,
                    PendingSettlement::Refund => self.finish_refund(&Actor::System, tx).await,
                };
                if let Err(err) = outcome {
                    report.failures += 1;
                    tracing::warn!(transaction_id = %id, payout = %kind, "reserved payout failed again: {err}");
                }
                continue;
            }
            if let Some(action) = expiry_action(&tx, now) {
                let outcome = match action {
                    ExpiryAction::Cancel => self.cancel_expired(tx.id).await.map(|cancelled| {
                        if cancelled {
                            report.cancelled += 1;
                        }
                    }),
                    ExpiryAction::ForceDispute => self.force_dispute(tx.id).await.map(|()| {
                        report.disputes_forced += 1;
                    }),
                };
                if let Err(err) = outcome {
                    report.failures += 1;
                    tracing::warn!(transaction_id = %tx.id, action = ?action, "expiry handling failed: {err}");
                }
                continue;
            }

            if windows.auto_verify_due(&tx, now) {
                match self.verify_inner(&Actor::System, tx.id).await {
                    Ok(_) => report.auto_verified += 1,
                    Err(err) => {
                        report.failures += 1;
                        tracing::warn!(transaction_id = %tx.id, "auto-verify failed: {err}");
                    }
                }
            } else if windows.auto_release_due(&tx, now) {
                match self.release_inner(&Actor::System, tx.id).await {
                    Ok(_) => report.auto_released += 1,
                    Err(err) => {
                        report.failures += 1;
                        tracing::warn!(transaction_id = %tx.id, "auto-release failed: {err}");
                    }
                }
            }
        }

        for dispute in pending {
            if dispute.awaiting_assessment() {
                if now - dispute.updated_at < grace {
                    continue;
                }
                report.assessments_retried += 1;
                if let Err(err) = self.run_assessment(dispute.id).await {
                    report.failures += 1;
                    tracing::warn!(dispute_id = %dispute.id, "assessment retry failed: {err}");
                }
            } else if dispute.status().is_resolved() {
                report.settlements_retried += 1;
                if let Err(err) = self.settle_dispute(dispute.id).await {
                    report.failures += 1;
                    tracing::warn!(dispute_id = %dispute.id, "settlement retry failed: {err}");
                }
            }
        }

        report.locks_pruned = self.prune_locks();
        if report.is_idle() {
            tracing::debug!(locks_pruned = report.locks_pruned, "sweep idle");
        } else {
            tracing::info!(?report, "sweep completed");
        }
        Ok(report)
    }

    /// Operator-triggered sweep pass.
    pub async fn trigger_sweep(&self, actor: &Actor) -> Result<SweepReport, Rejection> {
        guard::check_operator(actor).map_err(|e| self.reject(None, e))?;
        self.sweep().await.map_err(|e| self.reject(None, e))
    }

    /// `INITIATED → CANCELLED` for an expired escrow. Returns whether
    /// anything changed; a transaction funded in the meantime is left alone.
    async fn cancel_expired(&self, id: TransactionId) -> Result<bool, EngineError> {
        self.transact(id, || {
            let now = self.now();
            let mut tx = self.load_tx(id)?;
            if expiry_action(&tx, now) != Some(ExpiryAction::Cancel) {
                return Ok((UnitOfWork::new(), Outbox::new(), false));
            }
            guard::check_transition(&Actor::System, &tx, escrow_state::EscrowStatus::Cancelled)?;
            let read = tx.version();
            let event = tx.cancel_expired(now)?;
            tracing::info!(transaction_id = %id, "expired escrow cancelled");
            let mut work = UnitOfWork::new();
            work.update_transaction(tx, read);
            Ok((work, event.into(), true))
        })
        .await
    }

    async fn force_dispute(&self, id: TransactionId) -> Result<(), EngineError> {
        let dispute = self
            .open_dispute_inner(&Actor::System, id, EXPIRY_DISPUTE_REASON, "")
            .await?;
        if let Err(err) = self.run_assessment(dispute.id).await {
            tracing::warn!(dispute_id = %dispute.id, "assessment deferred to next sweep: {err}");
        }
        Ok(())
    }
}

/// How long a freshly updated dispute is left alone before the sweep
/// resubmits it: one full retry budget, so an assessment still in flight
/// from the request path is not duplicated.
fn assessment_grace(engine: &EscrowEngine) -> chrono::Duration {
    let retry = &engine.config().retry;
    let backoff = retry
        .base_delay
        .saturating_mul(2u32.saturating_pow(retry.max_retries));
    let budget = retry
        .timeout
        .saturating_add(backoff)
        .saturating_mul(retry.max_retries.saturating_add(1));
    chrono::Duration::from_std(budget).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Run [`EscrowEngine::sweep`] every `sweep_interval` until the task is
/// aborted. Missed ticks are delayed, never bunched.
pub fn spawn_sweeper(engine: Arc<EscrowEngine>) -> JoinHandle<()> {
    let period = engine.config().sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = engine.sweep().await {
                tracing::error!("sweep failed: {err}");
            }
        }
    })
}
