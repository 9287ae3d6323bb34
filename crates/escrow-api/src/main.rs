//! # escrow-api: Binary Entry Point
//!
//! Starts the Axum HTTP server and the background sweeper. Collaborators
//! are the in-process mocks: deposits are confirmed immediately, movements
//! are recorded in memory, and the development oracle escalates every
//! dispute to operators.

use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;

use escrow_api::state::{AppConfig, AppState};
use escrow_arbitration::Verdict;
use escrow_core::SystemClock;
use escrow_engine::{
    spawn_sweeper, Collaborators, EngineConfig, EscrowEngine, LogNotifier, MemoryLedger,
    MockSettlement, ScriptedOracle,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("server configuration")?;
    let engine_config = EngineConfig::from_env().context("engine configuration")?;
    tracing::info!(?config, ?engine_config, "configuration loaded");

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;

    let engine = Arc::new(EscrowEngine::new(
        Arc::new(MemoryLedger::new()),
        Collaborators {
            settlement: Arc::new(MockSettlement::new()),
            oracle: Arc::new(ScriptedOracle::always(Verdict::ResolvedBuyer, 0.0)),
            notifier: Arc::new(LogNotifier),
        },
        Arc::new(SystemClock),
        engine_config,
    ));
    let sweeper = spawn_sweeper(engine.clone());

    let port = config.port;
    let state = AppState::new(engine, config).with_metrics(metrics);
    let app = escrow_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("escrow API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let served = axum::serve(listener, app).await;
    sweeper.abort();
    served.context("serving HTTP")?;

    Ok(())
}

/// `RUST_LOG` filter (default `info`); `LOG_FORMAT=json` switches to JSON
/// lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
