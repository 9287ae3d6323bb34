//! Shared fixtures for the engine's unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};

use escrow_core::{Actor, Amount, ManualClock, UserId};
use escrow_state::{EscrowStatus, EscrowTransaction};

use crate::collaborators::{
    CollaboratorError, DepositStatus, SettlementGateway, SettlementReceipt,
};
use crate::config::{EngineConfig, RetryPolicy};
use crate::engine::{Collaborators, CreateTransaction, EscrowEngine};
use crate::mock::{MockCollaborators, MockSettlement};
use crate::store::MemoryLedger;

pub(crate) struct Harness {
    pub engine: Arc<EscrowEngine>,
    pub mocks: MockCollaborators,
    pub clock: ManualClock,
    #[allow(dead_code)]
    pub store: Arc<MemoryLedger>,
}

pub(crate) fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
        },
        ..EngineConfig::default()
    }
}

pub(crate) fn harness() -> Harness {
    let mocks = MockCollaborators::new();
    let settlement = mocks.settlement.clone();
    build_harness(mocks, settlement, fast_config())
}

/// A harness whose releases and refunds wait at a gate until the test
/// opens it. Deposits pass straight through.
pub(crate) fn gated_harness() -> (Harness, Arc<GatedSettlement>) {
    let mocks = MockCollaborators::new();
    let gate = Arc::new(GatedSettlement::new(mocks.settlement.clone()));
    let config = EngineConfig {
        retry: RetryPolicy {
            timeout: Duration::from_secs(5),
            ..fast_config().retry
        },
        ..fast_config()
    };
    let harness = build_harness(mocks, gate.clone(), config);
    (harness, gate)
}

fn build_harness(
    mocks: MockCollaborators,
    settlement: Arc<dyn SettlementGateway>,
    config: EngineConfig,
) -> Harness {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    let store = Arc::new(MemoryLedger::new());
    let engine = EscrowEngine::new(
        store.clone(),
        Collaborators {
            settlement,
            oracle: mocks.oracle.clone(),
            notifier: mocks.notifier.clone(),
        },
        Arc::new(clock.clone()),
        config,
    );
    Harness {
        engine: Arc::new(engine),
        mocks,
        clock,
        store,
    }
}

pub(crate) fn buyer() -> Actor {
    Actor::User(UserId::new("buyer").unwrap())
}

pub(crate) fn seller() -> Actor {
    Actor::User(UserId::new("seller").unwrap())
}

pub(crate) fn operator() -> Actor {
    Actor::Operator("ops".into())
}

/// A `units` USD escrow from `seller` to `buyer`, expiring in 30 days.
pub(crate) async fn open_escrow(engine: &EscrowEngine, units: u64) -> EscrowTransaction {
    let expires_at = engine.now() + chrono::Duration::days(30);
    engine
        .create_transaction(
            &seller(),
            CreateTransaction {
                buyer_id: UserId::new("buyer").unwrap(),
                amount: Amount::from_units(units),
                token_symbol: "USD".into(),
                description: "vintage camera".into(),
                chain_id: None,
                expires_at: Some(expires_at),
                metadata: BTreeMap::new(),
            },
            None,
        )
        .await
        .unwrap()
}

/// A funded 100 USD escrow.
pub(crate) async fn funded_escrow(engine: &EscrowEngine) -> EscrowTransaction {
    let tx = open_escrow(engine, 100).await;
    engine.fund(&buyer(), tx.id, None).await.unwrap()
}

/// A 100 USD escrow carried through to `COMPLETED`.
pub(crate) async fn completed_escrow(engine: &EscrowEngine) -> EscrowTransaction {
    let tx = funded_escrow(engine).await;
    engine
        .submit_proof(
            &seller(),
            tx.id,
            escrow_arbitration::NewProof {
                proof_type: escrow_arbitration::ProofType::TrackingNumber,
                description: "shipped".into(),
                content_ref: Some("1Z999".into()),
            },
            None,
        )
        .await
        .unwrap();
    engine
        .request_transition(&buyer(), tx.id, EscrowStatus::Verified, None)
        .await
        .unwrap();
    engine
        .request_transition(&buyer(), tx.id, EscrowStatus::Completed, None)
        .await
        .unwrap()
}

/// Settlement rail that parks every payout until [`GatedSettlement::open`].
pub(crate) struct GatedSettlement {
    inner: Arc<MockSettlement>,
    arrived: Notify,
    gate: Semaphore,
}

impl GatedSettlement {
    fn new(inner: Arc<MockSettlement>) -> Self {
        Self {
            inner,
            arrived: Notify::new(),
            gate: Semaphore::new(0),
        }
    }

    /// Wait until a payout is parked at the gate.
    pub(crate) async fn parked(&self) {
        self.arrived.notified().await;
    }

    /// Let every parked and future payout through.
    pub(crate) fn open(&self) {
        self.gate.add_permits(1024);
    }

    async fn pass(&self) {
        self.arrived.notify_one();
        let _permit = self.gate.acquire().await;
    }
}

#[async_trait]
impl SettlementGateway for GatedSettlement {
    async fn confirm_deposit(&self, tx: &EscrowTransaction) -> Result<DepositStatus, CollaboratorError> {
        self.inner.confirm_deposit(tx).await
    }

    async fn release_funds(
        &self,
        tx: &EscrowTransaction,
        recipient: &UserId,
        amount: Amount,
    ) -> Result<SettlementReceipt, CollaboratorError> {
        self.pass().await;
        self.inner.release_funds(tx, recipient, amount).await
    }

    async fn refund(
        &self,
        tx: &EscrowTransaction,
        recipient: &UserId,
        amount: Amount,
    ) -> Result<SettlementReceipt, CollaboratorError> {
        self.pass().await;
        self.inner.refund(tx, recipient, amount).await
    }
}
