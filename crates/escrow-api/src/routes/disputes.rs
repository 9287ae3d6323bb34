//! # Dispute Routes
//!
//! Parties open disputes; the arbitration oracle assesses them as part of
//! the request. Operators decide escalated cases, request more evidence and
//! resume review.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use escrow_arbitration::{EscrowDispute, ManualDecision, Verdict};
use escrow_core::{Amount, DisputeId, TransactionId};
use escrow_engine::OpenDispute;

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::{extract_json, Idempotency};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Open a dispute on a transaction.
#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenDisputeRequest {
    /// Short reason, e.g. "item not received".
    pub reason: String,
    /// Longer account of the problem.
    #[serde(default)]
    pub description: String,
}

/// An operator's decision on a dispute.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DecisionRequest {
    /// `resolved_buyer`, `resolved_seller` or `resolved_split`.
    #[schema(value_type = String, example = "resolved_split")]
    pub verdict: Verdict,
    /// Why.
    pub rationale: String,
    /// Refund owed to the buyer on a split, or compensation to the winner.
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "40.00")]
    pub compensation_amount: Option<Amount>,
}

/// Ask the parties for more evidence.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EvidenceRequest {
    /// What is needed.
    pub note: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the dispute router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/transactions/{id}/disputes",
            post(open_dispute).get(list_disputes),
        )
        .route("/v1/disputes/{id}", get(get_dispute))
        .route("/v1/disputes/{id}/decision", post(submit_decision))
        .route("/v1/disputes/{id}/request-evidence", post(request_evidence))
        .route("/v1/disputes/{id}/resume", post(resume_review))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/transactions/{id}/disputes: Open a dispute.
///
/// The response reflects the dispute after the first assessment attempt:
/// resolved and settled, escalated, or still under review when the oracle
/// was unreachable.
#[utoipa::path(
    post,
    path = "/v1/transactions/{id}/disputes",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    request_body = OpenDisputeRequest,
    responses(
        (status = 201, description = "Dispute opened", body = serde_json::Value),
        (status = 409, description = "A dispute is already open, or the transaction cannot be disputed"),
    ),
    tag = "disputes"
)]
pub(crate) async fn open_dispute(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<Uuid>,
    body: Result<Json<OpenDisputeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EscrowDispute>), AppError> {
    let req = extract_json(body)?;
    let dispute = state
        .engine
        .open_dispute(
            &actor,
            TransactionId::from_uuid(id),
            OpenDispute {
                reason: req.reason,
                description: req.description,
            },
            idempotency.key(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(dispute)))
}

/// GET /v1/transactions/{id}/disputes: Dispute history.
#[utoipa::path(
    get,
    path = "/v1/transactions/{id}/disputes",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Disputes, oldest first", body = serde_json::Value),
        (status = 404, description = "Not found"),
    ),
    tag = "disputes"
)]
pub(crate) async fn list_disputes(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<EscrowDispute>>, AppError> {
    Ok(Json(
        state.engine.disputes(&actor, TransactionId::from_uuid(id))?,
    ))
}

/// GET /v1/disputes/{id}: Fetch a dispute.
#[utoipa::path(
    get,
    path = "/v1/disputes/{id}",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    responses(
        (status = 200, description = "Dispute", body = serde_json::Value),
        (status = 404, description = "Not found"),
    ),
    tag = "disputes"
)]
pub(crate) async fn get_dispute(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<EscrowDispute>, AppError> {
    Ok(Json(state.engine.dispute(&actor, DisputeId::from_uuid(id))?))
}

/// POST /v1/disputes/{id}/decision: Operator decides a dispute.
///
/// Re-delivering a decision for a closed dispute returns the dispute
/// unchanged.
#[utoipa::path(
    post,
    path = "/v1/disputes/{id}/decision",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    request_body = DecisionRequest,
    responses(
        (status = 200, description = "Dispute after the decision", body = serde_json::Value),
        (status = 403, description = "Operators only"),
        (status = 409, description = "Conflicts with an earlier decision"),
    ),
    tag = "disputes"
)]
pub(crate) async fn submit_decision(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<Uuid>,
    body: Result<Json<DecisionRequest>, JsonRejection>,
) -> Result<Json<EscrowDispute>, AppError> {
    let req = extract_json(body)?;
    let decision = ManualDecision {
        verdict: req.verdict,
        rationale: req.rationale,
        compensation_amount: req.compensation_amount,
    };
    let dispute = state
        .engine
        .submit_manual_decision(&actor, DisputeId::from_uuid(id), decision, idempotency.key())
        .await?;
    Ok(Json(dispute))
}

/// POST /v1/disputes/{id}/request-evidence: Pause review for evidence.
#[utoipa::path(
    post,
    path = "/v1/disputes/{id}/request-evidence",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    request_body = EvidenceRequest,
    responses(
        (status = 200, description = "Dispute is EVIDENCE_REQUESTED", body = serde_json::Value),
        (status = 403, description = "Operators only"),
        (status = 409, description = "Dispute is not under review"),
    ),
    tag = "disputes"
)]
pub(crate) async fn request_evidence(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<Uuid>,
    body: Result<Json<EvidenceRequest>, JsonRejection>,
) -> Result<Json<EscrowDispute>, AppError> {
    let req = extract_json(body)?;
    let dispute = state
        .engine
        .request_evidence(&actor, DisputeId::from_uuid(id), req.note, idempotency.key())
        .await?;
    Ok(Json(dispute))
}

/// POST /v1/disputes/{id}/resume: Resume review and re-submit the case.
#[utoipa::path(
    post,
    path = "/v1/disputes/{id}/resume",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    responses(
        (status = 200, description = "Dispute after re-assessment", body = serde_json::Value),
        (status = 403, description = "Operators only"),
        (status = 409, description = "Dispute is not waiting for evidence"),
    ),
    tag = "disputes"
)]
pub(crate) async fn resume_review(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<Uuid>,
) -> Result<Json<EscrowDispute>, AppError> {
    let dispute = state
        .engine
        .resume_review(&actor, DisputeId::from_uuid(id), idempotency.key())
        .await?;
    Ok(Json(dispute))
}
