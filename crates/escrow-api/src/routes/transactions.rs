//! # Transaction Routes
//!
//! Escrow lifecycle: creation, funding, proofs and requested transitions.
//! Every mutation accepts an optional `idempotency-key` header.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use escrow_arbitration::{EscrowProof, NewProof, ProofType};
use escrow_core::{Amount, ProofId, TransactionId, UserId};
use escrow_engine::{CreateTransaction, ProofSubmission};
use escrow_state::{AuditEntry, EscrowStatus, EscrowTransaction};

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::{extract_json, Idempotency};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Open an escrow. The caller is the seller.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTransactionRequest {
    /// The paying party.
    #[schema(value_type = String, example = "buyer-42")]
    pub buyer_id: UserId,
    /// Amount to hold, as a decimal string or number.
    #[schema(value_type = String, example = "250.00")]
    pub amount: Amount,
    /// Token or currency symbol.
    pub token_symbol: String,
    /// What is being sold.
    #[serde(default)]
    pub description: String,
    /// Chain identifier for on-chain settlement.
    #[serde(default)]
    pub chain_id: Option<String>,
    /// Completion deadline (RFC 3339).
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Opaque caller metadata.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl From<CreateTransactionRequest> for CreateTransaction {
    fn from(req: CreateTransactionRequest) -> Self {
        Self {
            buyer_id: req.buyer_id,
            amount: req.amount,
            token_symbol: req.token_symbol,
            description: req.description,
            chain_id: req.chain_id,
            expires_at: req.expires_at,
            metadata: req.metadata,
        }
    }
}

/// Ask for a transition.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TransitionRequest {
    /// Target status, e.g. `VERIFIED`, `COMPLETED`, `CANCELLED`.
    #[schema(value_type = String, example = "VERIFIED")]
    pub target_status: EscrowStatus,
}

/// Attach evidence to a transaction.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitProofRequest {
    /// `tracking_number`, `shipping_receipt`, `photo`, `document`,
    /// `delivery_confirmation` or `statement`.
    #[schema(value_type = String, example = "tracking_number")]
    pub proof_type: ProofType,
    /// What the proof shows.
    pub description: String,
    /// Reference to stored content; required for everything but statements.
    #[serde(default)]
    pub content_ref: Option<String>,
}

impl From<SubmitProofRequest> for NewProof {
    fn from(req: SubmitProofRequest) -> Self {
        Self {
            proof_type: req.proof_type,
            description: req.description,
            content_ref: req.content_ref,
        }
    }
}

/// Operator verification of a proof.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct VerifyProofRequest {
    /// Operator notes.
    #[serde(default)]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the transaction router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/transactions", post(create_transaction))
        .route("/v1/transactions/{id}", get(get_transaction))
        .route("/v1/transactions/{id}/audit", get(get_audit))
        .route("/v1/transactions/{id}/fund", post(fund))
        .route("/v1/transactions/{id}/transition", post(transition))
        .route(
            "/v1/transactions/{id}/proofs",
            post(submit_proof).get(list_proofs),
        )
        .route("/v1/proofs/{id}/verify", post(verify_proof))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/transactions: Open an escrow.
#[utoipa::path(
    post,
    path = "/v1/transactions",
    request_body = CreateTransactionRequest,
    responses(
        (status = 201, description = "Escrow opened in INITIATED", body = serde_json::Value),
        (status = 403, description = "Caller is not a user"),
        (status = 422, description = "Validation error"),
    ),
    tag = "transactions"
)]
pub(crate) async fn create_transaction(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    body: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EscrowTransaction>), AppError> {
    let req = extract_json(body)?;
    let tx = state
        .engine
        .create_transaction(&actor, req.into(), idempotency.key())
        .await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// GET /v1/transactions/{id}: Fetch a transaction.
#[utoipa::path(
    get,
    path = "/v1/transactions/{id}",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Transaction", body = serde_json::Value),
        (status = 403, description = "Caller is not a party"),
        (status = 404, description = "Not found"),
    ),
    tag = "transactions"
)]
pub(crate) async fn get_transaction(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<EscrowTransaction>, AppError> {
    Ok(Json(
        state
            .engine
            .transaction(&actor, TransactionId::from_uuid(id))?,
    ))
}

/// GET /v1/transactions/{id}/audit: Hash-chained audit log.
#[utoipa::path(
    get,
    path = "/v1/transactions/{id}/audit",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Audit entries, oldest first", body = serde_json::Value),
        (status = 404, description = "Not found"),
    ),
    tag = "transactions"
)]
pub(crate) async fn get_audit(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    Ok(Json(state.engine.audit(&actor, TransactionId::from_uuid(id))?))
}

/// POST /v1/transactions/{id}/fund: Buyer confirms the deposit.
#[utoipa::path(
    post,
    path = "/v1/transactions/{id}/fund",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Transaction is FUNDED", body = serde_json::Value),
        (status = 409, description = "Invalid transition"),
        (status = 503, description = "Settlement rail unavailable; retry"),
    ),
    tag = "transactions"
)]
pub(crate) async fn fund(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<Uuid>,
) -> Result<Json<EscrowTransaction>, AppError> {
    let tx = state
        .engine
        .fund(&actor, TransactionId::from_uuid(id), idempotency.key())
        .await?;
    Ok(Json(tx))
}

/// POST /v1/transactions/{id}/transition: Request a status change.
#[utoipa::path(
    post,
    path = "/v1/transactions/{id}/transition",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Transaction after the transition", body = serde_json::Value),
        (status = 403, description = "Actor may not request this transition"),
        (status = 409, description = "Invalid transition; details.current has the unchanged transaction"),
    ),
    tag = "transactions"
)]
pub(crate) async fn transition(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<Uuid>,
    body: Result<Json<TransitionRequest>, JsonRejection>,
) -> Result<Json<EscrowTransaction>, AppError> {
    let req = extract_json(body)?;
    let tx = state
        .engine
        .request_transition(
            &actor,
            TransactionId::from_uuid(id),
            req.target_status,
            idempotency.key(),
        )
        .await?;
    Ok(Json(tx))
}

/// POST /v1/transactions/{id}/proofs: Submit evidence.
#[utoipa::path(
    post,
    path = "/v1/transactions/{id}/proofs",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    request_body = SubmitProofRequest,
    responses(
        (status = 201, description = "Stored proof and the transaction", body = serde_json::Value),
        (status = 409, description = "Transaction does not accept proofs"),
        (status = 422, description = "Validation error"),
    ),
    tag = "transactions"
)]
pub(crate) async fn submit_proof(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<Uuid>,
    body: Result<Json<SubmitProofRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProofSubmission>), AppError> {
    let req = extract_json(body)?;
    let submission = state
        .engine
        .submit_proof(
            &actor,
            TransactionId::from_uuid(id),
            req.into(),
            idempotency.key(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// GET /v1/transactions/{id}/proofs: List proofs.
#[utoipa::path(
    get,
    path = "/v1/transactions/{id}/proofs",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Proofs, oldest first", body = serde_json::Value),
        (status = 404, description = "Not found"),
    ),
    tag = "transactions"
)]
pub(crate) async fn list_proofs(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<EscrowProof>>, AppError> {
    Ok(Json(
        state.engine.proofs(&actor, TransactionId::from_uuid(id))?,
    ))
}

/// POST /v1/proofs/{id}/verify: Operator verifies a proof.
#[utoipa::path(
    post,
    path = "/v1/proofs/{id}/verify",
    params(("id" = Uuid, Path, description = "Proof ID")),
    request_body = VerifyProofRequest,
    responses(
        (status = 200, description = "Verified proof", body = serde_json::Value),
        (status = 403, description = "Operators only"),
        (status = 422, description = "Proof already verified"),
    ),
    tag = "transactions"
)]
pub(crate) async fn verify_proof(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<Uuid>,
    body: Result<Json<VerifyProofRequest>, JsonRejection>,
) -> Result<Json<EscrowProof>, AppError> {
    let req = extract_json(body)?;
    let proof = state
        .engine
        .verify_proof(&actor, ProofId::from_uuid(id), req.notes, idempotency.key())
        .await?;
    Ok(Json(proof))
}
