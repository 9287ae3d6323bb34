//! # escrow-api: HTTP Surface for the Escrow Engine
//!
//! ## API Surface
//!
//! | Prefix                               | Module                   | Domain                 |
//! |--------------------------------------|--------------------------|------------------------|
//! | `/v1/transactions/*`, `/v1/proofs/*` | [`routes::transactions`] | Escrow lifecycle       |
//! | `/v1/transactions/{id}/disputes`, `/v1/disputes/*` | [`routes::disputes`] | Disputes |
//! | `/v1/transactions/{id}/ratings`, `/v1/ratings/*`, `/v1/users/*`, `/v1/compensations/*` | [`routes::users`] | Ratings, reputation, compensation |
//! | `/v1/sweep`                          | [`routes::ops`]          | Operator maintenance   |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → Handler
//! ```
//!
//! Health checks and `/metrics` sit outside the stack and need no
//! credentials.
//!
//! ## OpenAPI
//!
//! Generated with utoipa derive macros, served at `/openapi.json`.

pub mod auth;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };

    let api = Router::new()
        .merge(routes::transactions::router())
        .merge(routes::disputes::router())
        .merge(routes::users::router())
        .merge(routes::ops::router())
        .merge(openapi::router())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(from_fn(auth::auth_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(auth_config))
        .with_state(state.clone());

    let unauthenticated = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness))
        .route("/metrics", axum::routing::get(prometheus_metrics))
        .with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

/// GET /metrics: Prometheus text exposition.
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// Liveness check: always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness check: 200 once the ledger store answers reads.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.store().open_disputes() {
        Ok(_) => (StatusCode::OK, "ready").into_response(),
        Err(e) => {
            tracing::warn!("ledger store health check failed: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, "ledger store unavailable").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use escrow_core::SystemClock;
    use escrow_engine::{Collaborators, EngineConfig, EscrowEngine, MemoryLedger, MockCollaborators};

    use crate::auth::USER_HEADER;
    use crate::extractors::IDEMPOTENCY_HEADER;
    use crate::state::AppConfig;

    fn test_state(auth_token: Option<&str>) -> (AppState, MockCollaborators) {
        let mocks = MockCollaborators::new();
        let engine = EscrowEngine::new(
            Arc::new(MemoryLedger::new()),
            Collaborators {
                settlement: mocks.settlement.clone(),
                oracle: mocks.oracle.clone(),
                notifier: mocks.notifier.clone(),
            },
            Arc::new(SystemClock),
            EngineConfig::default(),
        );
        let config = AppConfig {
            port: 0,
            auth_token: auth_token.map(str::to_string),
        };
        (AppState::new(Arc::new(engine), config), mocks)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn as_user(user: &str) -> [(&'static str, &str); 1] {
        [(USER_HEADER, user)]
    }

    async fn create(app: &Router) -> String {
        let (status, tx) = send(
            app,
            "POST",
            "/v1/transactions",
            &as_user("seller"),
            Some(json!({
                "buyer_id": "buyer",
                "amount": "100",
                "token_symbol": "USD",
                "description": "camera"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(tx["status"], "INITIATED");
        tx["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn liveness_needs_no_credentials() {
        let (state, _) = test_state(Some("s3cret"));
        let app = app(state);
        let response = app
            .oneshot(Request::get("/health/liveness").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_reports_ready() {
        let (state, _) = test_state(None);
        let response = app(state)
            .oneshot(Request::get("/health/readiness").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_unavailable() {
        let (state, _) = test_state(None);
        let response = app(state)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn api_requires_credentials_when_auth_enabled() {
        let (state, _) = test_state(Some("s3cret"));
        let app = app(state);
        let (status, body) = send(&app, "GET", "/openapi.json", &[], None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let (status, _) = send(
            &app,
            "GET",
            "/openapi.json",
            &[("authorization", "Bearer operator:ops:s3cret")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn happy_path_over_http() {
        let (state, mocks) = test_state(None);
        let app = app(state);
        let id = create(&app).await;

        let (status, tx) = send(&app, "POST", &format!("/v1/transactions/{id}/fund"), &as_user("buyer"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tx["status"], "FUNDED");

        let (status, submission) = send(
            &app,
            "POST",
            &format!("/v1/transactions/{id}/proofs"),
            &as_user("seller"),
            Some(json!({
                "proof_type": "tracking_number",
                "description": "shipped",
                "content_ref": "1Z999"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(submission["transaction"]["status"], "EVIDENCE_SUBMITTED");

        for target in ["VERIFIED", "COMPLETED"] {
            let (status, tx) = send(
                &app,
                "POST",
                &format!("/v1/transactions/{id}/transition"),
                &as_user("buyer"),
                Some(json!({ "target_status": target })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(tx["status"], target);
        }

        let (status, audit) = send(&app, "GET", &format!("/v1/transactions/{id}/audit"), &as_user("seller"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(audit.as_array().unwrap().len(), 6);
        assert_eq!(mocks.settlement.movements().len(), 1);

        let (status, rating) = send(
            &app,
            "POST",
            &format!("/v1/transactions/{id}/ratings"),
            &as_user("buyer"),
            Some(json!({ "rating": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(rating["rated_user_id"], "seller");

        let (status, rep) = send(&app, "GET", "/v1/users/seller/reputation", &as_user("buyer"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rep["transaction_count"], 1);
    }

    #[tokio::test]
    async fn invalid_transition_is_409_with_current_snapshot() {
        let (state, _) = test_state(None);
        let app = app(state);
        let id = create(&app).await;
        let (status, body) = send(
            &app,
            "POST",
            &format!("/v1/transactions/{id}/transition"),
            &as_user("buyer"),
            Some(json!({ "target_status": "COMPLETED" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
        assert_eq!(body["error"]["details"]["current"]["status"], "INITIATED");
    }

    #[tokio::test]
    async fn strangers_are_forbidden() {
        let (state, _) = test_state(None);
        let app = app(state);
        let id = create(&app).await;
        let (status, body) = send(&app, "GET", &format!("/v1/transactions/{id}"), &as_user("mallory"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn unknown_transaction_is_404() {
        let (state, _) = test_state(None);
        let (status, body) = send(
            &app(state),
            "GET",
            "/v1/transactions/550e8400-e29b-41d4-a716-446655440000",
            &[],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn malformed_json_is_400_and_wrong_shape_is_422() {
        let (state, _) = test_state(None);
        let app = app(state);
        let response = app
            .clone()
            .oneshot(
                Request::post("/v1/transactions")
                    .header("content-type", "application/json")
                    .header(USER_HEADER, "seller")
                    .body(Body::from("{\"buyer_id\": "))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "POST",
            "/v1/transactions",
            &as_user("seller"),
            Some(json!({ "buyer_id": "buyer", "amount": "-5", "token_symbol": "USD" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn idempotent_fund_replays_first_response() {
        let (state, mocks) = test_state(None);
        let app = app(state);
        let id = create(&app).await;
        let headers = [(USER_HEADER, "buyer"), (IDEMPOTENCY_HEADER, "fund-1")];
        let uri = format!("/v1/transactions/{id}/fund");
        let (first_status, first) = send(&app, "POST", &uri, &headers, None).await;
        let (second_status, second) = send(&app, "POST", &uri, &headers, None).await;
        assert_eq!(first_status, StatusCode::OK);
        assert_eq!(second_status, StatusCode::OK);
        assert_eq!(first, second);
        assert!(mocks.settlement.movements().is_empty());
    }

    #[tokio::test]
    async fn parties_cannot_decide_disputes() {
        let (state, _) = test_state(None);
        let (status, body) = send(
            &app(state),
            "POST",
            "/v1/disputes/550e8400-e29b-41d4-a716-446655440000/decision",
            &as_user("buyer"),
            Some(json!({ "verdict": "resolved_buyer", "rationale": "mine" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn operator_runs_sweep() {
        let (state, _) = test_state(None);
        let app = app(state);
        let (status, report) = send(&app, "POST", "/v1/sweep", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["cancelled"], 0);

        let (status, _) = send(&app, "POST", "/v1/sweep", &as_user("buyer"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
