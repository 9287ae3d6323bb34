//! # Mock Collaborators
//!
//! Deterministic in-process collaborators for the binary's development
//! mode and for tests. Each can be scripted to fail a number of times.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use escrow_arbitration::{Assessment, CaseBundle, Verdict};
use escrow_core::{Amount, UserId};
use escrow_state::{EscrowTransaction, TransitionEvent};

use crate::collaborators::{
    ArbitrationOracle, CollaboratorError, DepositStatus, NotificationSink, SettlementGateway,
    SettlementReceipt,
};

/// A fund movement recorded by [`MockSettlement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    /// `release` or `refund`.
    pub kind: &'static str,
    /// Transaction the funds belong to.
    pub transaction: String,
    /// Recipient.
    pub recipient: UserId,
    /// Amount moved.
    pub amount: Amount,
}

/// Settlement rail that confirms every deposit and records every movement.
#[derive(Debug, Default)]
pub struct MockSettlement {
    failures_remaining: AtomicU32,
    deposits_unconfirmed: Mutex<bool>,
    movements: Mutex<Vec<Movement>>,
}

impl MockSettlement {
    /// A rail that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Report deposits as not (yet) arrived.
    pub fn withhold_deposits(&self, withhold: bool) {
        *self.deposits_unconfirmed.lock() = withhold;
    }

    /// Every release and refund performed, in order.
    pub fn movements(&self) -> Vec<Movement> {
        self.movements.lock().clone()
    }

    fn maybe_fail(&self) -> Result<(), CollaboratorError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(CollaboratorError::Unavailable("scripted failure".into()));
        }
        Ok(())
    }

    fn record(
        &self,
        kind: &'static str,
        tx: &EscrowTransaction,
        recipient: &UserId,
        amount: Amount,
    ) -> SettlementReceipt {
        let mut movements = self.movements.lock();
        let already = movements
            .iter()
            .any(|m| m.kind == kind && m.transaction == tx.id.to_string() && &m.recipient == recipient);
        if !already {
            movements.push(Movement {
                kind,
                transaction: tx.id.to_string(),
                recipient: recipient.clone(),
                amount,
            });
        }
        SettlementReceipt {
            settlement_ref: format!("{kind}:{}", tx.id),
        }
    }
}

#[async_trait]
impl SettlementGateway for MockSettlement {
    async fn confirm_deposit(&self, tx: &EscrowTransaction) -> Result<DepositStatus, CollaboratorError> {
        self.maybe_fail()?;
        let confirmed = !*self.deposits_unconfirmed.lock();
        Ok(DepositStatus {
            confirmed,
            settlement_ref: confirmed.then(|| format!("deposit:{}", tx.id)),
        })
    }

    async fn release_funds(
        &self,
        tx: &EscrowTransaction,
        recipient: &UserId,
        amount: Amount,
    ) -> Result<SettlementReceipt, CollaboratorError> {
        self.maybe_fail()?;
        Ok(self.record("release", tx, recipient, amount))
    }

    async fn refund(
        &self,
        tx: &EscrowTransaction,
        recipient: &UserId,
        amount: Amount,
    ) -> Result<SettlementReceipt, CollaboratorError> {
        self.maybe_fail()?;
        Ok(self.record("refund", tx, recipient, amount))
    }
}

/// Oracle that replays queued assessments, then falls back to a default.
#[derive(Debug)]
pub struct ScriptedOracle {
    queue: Mutex<VecDeque<Result<Assessment, CollaboratorError>>>,
    fallback: Option<(Verdict, f64)>,
    calls: AtomicU32,
}

impl ScriptedOracle {
    /// An oracle with nothing queued that reports itself unavailable.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicU32::new(0),
        }
    }

    /// An oracle answering every case with `verdict` at `confidence`.
    pub fn always(verdict: Verdict, confidence: f64) -> Self {
        Self {
            fallback: Some((verdict, confidence)),
            ..Self::new()
        }
    }

    /// Queue the next answer.
    pub fn push(&self, answer: Result<Assessment, CollaboratorError>) {
        self.queue.lock().push_back(answer);
    }

    /// Queue an assessment with a fresh id.
    pub fn push_decision(&self, verdict: Verdict, confidence: f64, compensation: Option<Amount>) {
        let n = self.queue.lock().len() as u32 + self.calls.load(Ordering::SeqCst);
        self.push(Ok(Assessment {
            assessment_id: format!("assessment-{n}"),
            decision: verdict,
            confidence,
            rationale: format!("scripted {verdict}"),
            compensation_amount: compensation,
        }));
    }

    /// Number of `assess` calls served.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArbitrationOracle for ScriptedOracle {
    async fn assess(&self, case: &CaseBundle) -> Result<Assessment, CollaboratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(answer) = self.queue.lock().pop_front() {
            return answer;
        }
        match self.fallback {
            Some((verdict, confidence)) => Ok(Assessment {
                assessment_id: format!("{}-{n}", case.dispute.id),
                decision: verdict,
                confidence,
                rationale: format!("default {verdict}"),
                compensation_amount: None,
            }),
            None => Err(CollaboratorError::Unavailable(
                "no assessment scripted".into(),
            )),
        }
    }
}

/// Sink that records every event; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<TransitionEvent>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    /// A sink that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Events delivered so far.
    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn publish(&self, event: &TransitionEvent) -> Result<(), CollaboratorError> {
        if *self.failing.lock() {
            return Err(CollaboratorError::Unavailable("sink offline".into()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Sink that only logs; used by the binary when no external sink exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn publish(&self, event: &TransitionEvent) -> Result<(), CollaboratorError> {
        tracing::info!(
            event_id = %event.event_id,
            transaction_id = %event.transaction_id,
            from = %event.from_status,
            to = %event.to_status,
            actor = %event.actor,
            "transition event"
        );
        Ok(())
    }
}

/// Bundle of the three mocks, shareable with the engine.
#[derive(Debug, Clone)]
pub struct MockCollaborators {
    /// Settlement rail.
    pub settlement: Arc<MockSettlement>,
    /// Arbitration oracle.
    pub oracle: Arc<ScriptedOracle>,
    /// Notification sink.
    pub notifier: Arc<RecordingNotifier>,
}

impl MockCollaborators {
    /// Fresh mocks; the oracle has nothing scripted.
    pub fn new() -> Self {
        Self {
            settlement: Arc::new(MockSettlement::new()),
            oracle: Arc::new(ScriptedOracle::new()),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }
}

impl Default for MockCollaborators {
    fn default() -> Self {
        Self::new()
    }
}
