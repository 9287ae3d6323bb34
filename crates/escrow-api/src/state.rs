//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers via
//! the `State` extractor. The engine owns every record; the API layer keeps
//! only configuration and the metrics handle.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;

use escrow_engine::EscrowEngine;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The escrow engine.
    pub engine: Arc<EscrowEngine>,
    /// Server configuration.
    pub config: AppConfig,
    /// Prometheus render handle. `None` when no recorder is installed, in
    /// which case `/metrics` answers 503.
    pub metrics: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("engine", &self.engine)
            .field("config", &self.config)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl AppState {
    /// State with the given engine and configuration, without metrics.
    pub fn new(engine: Arc<EscrowEngine>, config: AppConfig) -> Self {
        Self {
            engine,
            config,
            metrics: None,
        }
    }

    /// Attach a Prometheus handle for `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Server configuration.
///
/// Custom `Debug` redacts the auth token.
#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Shared bearer secret. If `None`, authentication is disabled.
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
        }
    }
}

/// A server variable that is set but malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct AppConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl AppConfig {
    /// Load from `PORT` (default 8080) and `AUTH_TOKEN` (optional).
    pub fn from_env() -> Result<Self, AppConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppConfigError> {
        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| AppConfigError {
                var: "PORT",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => Self::default().port,
        };

        let auth_token = match lookup("AUTH_TOKEN") {
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(raw),
            None => None,
        };

        Ok(Self { port, auth_token })
    }
}
