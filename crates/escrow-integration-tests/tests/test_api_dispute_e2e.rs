//! # End-to-End API Scenario: A Disputed Sale
//!
//! One story over HTTP. A seller opens an escrow and the buyer funds it.
//! The buyer then disputes, and the oracle is unsure, so the case
//! escalates. An operator decides for the buyer with compensation. The
//! refund, the seller's lost dispute and the compensation payout are then
//! visible through the API. A second story pauses a dispute for evidence
//! and resumes it.
//!
//! Auth is disabled; callers identify with the `x-user-id` header and an
//! absent header means the development operator.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use escrow_api::state::{AppConfig, AppState};
use escrow_arbitration::Verdict;
use escrow_core::{Amount, SystemClock};
use escrow_engine::{
    Collaborators, EngineConfig, EscrowEngine, MemoryLedger, MockCollaborators, RetryPolicy,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The full application with auth disabled, plus handles on the mocks.
fn test_app() -> (axum::Router, MockCollaborators) {
    let mocks = MockCollaborators::new();
    let engine = EscrowEngine::new(
        Arc::new(MemoryLedger::new()),
        Collaborators {
            settlement: mocks.settlement.clone(),
            oracle: mocks.oracle.clone(),
            notifier: mocks.notifier.clone(),
        },
        Arc::new(SystemClock),
        EngineConfig {
            retry: RetryPolicy {
                max_retries: 1,
                base_delay: std::time::Duration::from_millis(1),
                timeout: std::time::Duration::from_millis(50),
            },
            ..EngineConfig::default()
        },
    );
    let state = AppState::new(Arc::new(engine), AppConfig::default());
    (escrow_api::app(state), mocks)
}

/// Parse a response body as JSON.
async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Send a request as `user` (or as the development operator for `None`).
async fn call(
    app: &axum::Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_string(&v).unwrap())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disputed_sale_from_escalation_to_compensation() {
    let (app, mocks) = test_app();

    // Act 1: seller opens, buyer funds.
    let (status, tx) = call(
        &app,
        "POST",
        "/v1/transactions",
        Some("grace"),
        Some(json!({
            "buyer_id": "heidi",
            "amount": "120.00",
            "token_symbol": "USD",
            "description": "antique lamp"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tx["status"], "INITIATED");
    let id = tx["id"].as_str().unwrap().to_string();

    let (status, tx) = call(&app, "POST", &format!("/v1/transactions/{id}/fund"), Some("heidi"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tx["status"], "FUNDED");

    // Act 2: the oracle is unsure, so the dispute escalates.
    mocks.oracle.push_decision(Verdict::ResolvedBuyer, 0.35, None);
    let (status, dispute) = call(
        &app,
        "POST",
        &format!("/v1/transactions/{id}/disputes"),
        Some("heidi"),
        Some(json!({ "reason": "arrived broken", "description": "shade cracked" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(dispute["status"], "ESCALATED");
    let dispute_id = dispute["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "POST",
        &format!("/v1/transactions/{id}/disputes"),
        Some("grace"),
        Some(json!({ "reason": "buyer dropped it" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICTING_DISPUTE");

    let (status, tx) = call(&app, "GET", &format!("/v1/transactions/{id}"), Some("grace"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tx["status"], "DISPUTED");

    // Act 3: parties may not decide, and an escalated case no longer
    // pauses for evidence.
    let (status, _) = call(
        &app,
        "POST",
        &format!("/v1/disputes/{dispute_id}/decision"),
        Some("heidi"),
        Some(json!({ "verdict": "resolved_buyer", "rationale": "I say so" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/v1/disputes/{dispute_id}/request-evidence"),
        None,
        Some(json!({ "note": "photos of the packaging" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    // Act 4: operator finds for the buyer with a goodwill payment.
    let (status, decided) = call(
        &app,
        "POST",
        &format!("/v1/disputes/{dispute_id}/decision"),
        None,
        Some(json!({
            "verdict": "resolved_buyer",
            "rationale": "photos show transit damage",
            "compensation_amount": "10"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decided["status"], "CLOSED");
    assert_eq!(decided["resolution"], "resolved_buyer");

    let (_, tx) = call(&app, "GET", &format!("/v1/transactions/{id}"), Some("heidi"), None).await;
    assert_eq!(tx["status"], "REFUNDED");
    let movements = mocks.settlement.movements();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].kind, "refund");
    assert_eq!(movements[0].amount, Amount::from_units(120));

    let (_, rep) = call(&app, "GET", "/v1/users/grace/reputation", Some("heidi"), None).await;
    assert_eq!(rep["disputes_lost"], 1);

    // Act 5: settlement pays the compensation and reports back.
    let (status, records) = call(&app, "GET", "/v1/users/heidi/compensations", Some("heidi"), None).await;
    assert_eq!(status, StatusCode::OK);
    let records = records.as_array().unwrap().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "pending");
    let compensation_id = records[0]["id"].as_str().unwrap().to_string();

    let (status, _) = call(&app, "GET", "/v1/users/heidi/compensations", Some("grace"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, record) = call(
        &app,
        "POST",
        &format!("/v1/compensations/{compensation_id}/outcome"),
        None,
        Some(json!({ "status": "processed", "settlement_ref": "payout-31" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "processed");
    assert_eq!(record["settlement_ref"], "payout-31");

    // The audit chain over HTTP ends in the refund.
    let (_, audit) = call(&app, "GET", &format!("/v1/transactions/{id}/audit"), Some("grace"), None).await;
    let entries = audit.as_array().unwrap();
    assert_eq!(entries.last().unwrap()["to_status"], "REFUNDED");
}

#[tokio::test]
async fn evidence_round_trip_over_http() {
    let (app, mocks) = test_app();
    let (_, tx) = call(
        &app,
        "POST",
        "/v1/transactions",
        Some("ivan"),
        Some(json!({ "buyer_id": "judy", "amount": 40, "token_symbol": "EUR" })),
    )
    .await;
    let id = tx["id"].as_str().unwrap().to_string();
    call(&app, "POST", &format!("/v1/transactions/{id}/fund"), Some("judy"), None).await;

    // Oracle down: the dispute waits in review.
    let (_, dispute) = call(
        &app,
        "POST",
        &format!("/v1/transactions/{id}/disputes"),
        Some("judy"),
        Some(json!({ "reason": "wrong colour" })),
    )
    .await;
    assert_eq!(dispute["status"], "REVIEWING");
    let dispute_id = dispute["id"].as_str().unwrap().to_string();

    let (status, waiting) = call(
        &app,
        "POST",
        &format!("/v1/disputes/{dispute_id}/request-evidence"),
        None,
        Some(json!({ "note": "photo of the item in daylight" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(waiting["status"], "EVIDENCE_REQUESTED");

    let (status, _) = call(
        &app,
        "POST",
        &format!("/v1/transactions/{id}/proofs"),
        Some("ivan"),
        Some(json!({
            "proof_type": "photo",
            "description": "listing photo, same colour",
            "content_ref": "img-553"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    mocks.oracle.push_decision(Verdict::ResolvedSeller, 0.88, None);
    let (status, resumed) = call(&app, "POST", &format!("/v1/disputes/{dispute_id}/resume"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resumed["status"], "CLOSED");
    assert_eq!(resumed["resolution"], "resolved_seller");

    let (_, tx) = call(&app, "GET", &format!("/v1/transactions/{id}"), Some("ivan"), None).await;
    assert_eq!(tx["status"], "COMPLETED");
}

#[tokio::test]
async fn decision_on_unknown_dispute_is_not_found() {
    let (app, mocks) = test_app();
    let (status, body) = call(
        &app,
        "POST",
        &format!("/v1/disputes/{}/decision", Uuid::new_v4()),
        None,
        Some(json!({ "verdict": "resolved_seller", "rationale": "no such case" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert!(mocks.settlement.movements().is_empty());
}

#[tokio::test]
async fn openapi_document_is_served() {
    let (app, _) = test_app();
    let (status, doc) = call(&app, "GET", "/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/v1/disputes/{id}/decision"].is_object());
    assert!(doc["paths"]["/v1/transactions/{id}/transition"].is_object());
}
