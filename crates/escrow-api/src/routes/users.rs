//! # Rating, Reputation & Compensation Routes

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use escrow_arbitration::{CompensationOutcome, CompensationRecord};
use escrow_core::{CompensationId, RatingId, TransactionId, UserId};
use escrow_engine::SubmitRating;
use escrow_reputation::{TransactionRating, UserReputation, VerificationStatus};

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::{extract_json, Idempotency};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Rate the counterparty of a settled transaction.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RatingRequest {
    /// 1 to 5 stars.
    #[schema(minimum = 1, maximum = 5)]
    pub rating: u8,
    /// Optional comment.
    #[serde(default)]
    pub comment: Option<String>,
}

/// Operator-reported identity verification result.
#[derive(Debug, Deserialize, ToSchema)]
pub struct VerificationRequest {
    /// `unverified`, `pending`, `verified` or `rejected`.
    #[schema(value_type = String, example = "verified")]
    pub status: VerificationStatus,
}

/// What settlement did with a compensation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CompensationOutcomeRequest {
    /// `processed` or `failed`.
    pub status: String,
    /// Payout reference; required when processed.
    #[serde(default)]
    pub settlement_ref: Option<String>,
    /// Failure note; required when failed.
    #[serde(default)]
    pub note: Option<String>,
}

impl TryFrom<CompensationOutcomeRequest> for CompensationOutcome {
    type Error = AppError;

    fn try_from(req: CompensationOutcomeRequest) -> Result<Self, Self::Error> {
        let non_empty = |field: Option<String>, name: &str| {
            field
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppError::Validation(format!("{name} is required")))
        };
        match req.status.as_str() {
            "processed" => Ok(Self::Processed {
                settlement_ref: non_empty(req.settlement_ref, "settlement_ref")?,
            }),
            "failed" => Ok(Self::Failed {
                note: non_empty(req.note, "note")?,
            }),
            other => Err(AppError::Validation(format!(
                "unknown compensation status: '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the ratings, reputation and compensation router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/transactions/{id}/ratings",
            post(submit_rating).get(list_ratings),
        )
        .route("/v1/ratings/{id}/flag", post(flag_rating))
        .route("/v1/users/{id}/reputation", get(get_reputation))
        .route("/v1/users/{id}/verification", post(set_verification))
        .route("/v1/users/{id}/compensations", get(list_compensations))
        .route("/v1/compensations/{id}/outcome", post(record_outcome))
}

fn user_id(raw: String) -> Result<UserId, AppError> {
    UserId::new(raw).map_err(|e| AppError::Validation(e.to_string()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/transactions/{id}/ratings: Rate the counterparty.
#[utoipa::path(
    post,
    path = "/v1/transactions/{id}/ratings",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    request_body = RatingRequest,
    responses(
        (status = 201, description = "Rating recorded", body = serde_json::Value),
        (status = 409, description = "Already rated, or transaction not settled"),
        (status = 422, description = "Rating out of range"),
    ),
    tag = "ratings"
)]
pub(crate) async fn submit_rating(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<Uuid>,
    body: Result<Json<RatingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionRating>), AppError> {
    let req = extract_json(body)?;
    let rating = state
        .engine
        .submit_rating(
            &actor,
            TransactionId::from_uuid(id),
            SubmitRating {
                rating: req.rating,
                comment: req.comment,
            },
            idempotency.key(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

/// GET /v1/transactions/{id}/ratings: Ratings on a transaction.
#[utoipa::path(
    get,
    path = "/v1/transactions/{id}/ratings",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses((status = 200, description = "Ratings", body = serde_json::Value)),
    tag = "ratings"
)]
pub(crate) async fn list_ratings(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TransactionRating>>, AppError> {
    Ok(Json(
        state.engine.ratings(&actor, TransactionId::from_uuid(id))?,
    ))
}

/// POST /v1/ratings/{id}/flag: Operator flags a rating for moderation.
#[utoipa::path(
    post,
    path = "/v1/ratings/{id}/flag",
    params(("id" = Uuid, Path, description = "Rating ID")),
    responses(
        (status = 200, description = "Flagged rating", body = serde_json::Value),
        (status = 403, description = "Operators only"),
    ),
    tag = "ratings"
)]
pub(crate) async fn flag_rating(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionRating>, AppError> {
    let rating = state
        .engine
        .flag_rating(&actor, RatingId::from_uuid(id), idempotency.key())
        .await?;
    Ok(Json(rating))
}

/// GET /v1/users/{id}/reputation: A user's reputation.
#[utoipa::path(
    get,
    path = "/v1/users/{id}/reputation",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Reputation; a fresh record for unknown users", body = serde_json::Value),
        (status = 422, description = "Malformed user id"),
    ),
    tag = "reputation"
)]
pub(crate) async fn get_reputation(
    State(state): State<AppState>,
    Caller(_actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<UserReputation>, AppError> {
    let user = user_id(id)?;
    Ok(Json(state.engine.reputation(&user)?))
}

/// POST /v1/users/{id}/verification: Operator sets verification status.
#[utoipa::path(
    post,
    path = "/v1/users/{id}/verification",
    params(("id" = String, Path, description = "User ID")),
    request_body = VerificationRequest,
    responses(
        (status = 200, description = "Updated reputation", body = serde_json::Value),
        (status = 403, description = "Operators only"),
    ),
    tag = "reputation"
)]
pub(crate) async fn set_verification(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<String>,
    body: Result<Json<VerificationRequest>, JsonRejection>,
) -> Result<Json<UserReputation>, AppError> {
    let user = user_id(id)?;
    let req = extract_json(body)?;
    let updated = state
        .engine
        .set_verification(&actor, &user, req.status, idempotency.key())
        .await?;
    Ok(Json(updated))
}

/// GET /v1/users/{id}/compensations: Compensation records of a user.
#[utoipa::path(
    get,
    path = "/v1/users/{id}/compensations",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Compensation records", body = serde_json::Value),
        (status = 403, description = "Only the user or an operator"),
    ),
    tag = "compensation"
)]
pub(crate) async fn list_compensations(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<Vec<CompensationRecord>>, AppError> {
    let user = user_id(id)?;
    Ok(Json(state.engine.compensations_for(&actor, &user)?))
}

/// POST /v1/compensations/{id}/outcome: Settlement reports the payout.
#[utoipa::path(
    post,
    path = "/v1/compensations/{id}/outcome",
    params(("id" = Uuid, Path, description = "Compensation ID")),
    request_body = CompensationOutcomeRequest,
    responses(
        (status = 200, description = "Updated record", body = serde_json::Value),
        (status = 403, description = "Operators only"),
        (status = 409, description = "A different outcome is already recorded"),
    ),
    tag = "compensation"
)]
pub(crate) async fn record_outcome(
    State(state): State<AppState>,
    Caller(actor): Caller,
    idempotency: Idempotency,
    Path(id): Path<Uuid>,
    body: Result<Json<CompensationOutcomeRequest>, JsonRejection>,
) -> Result<Json<CompensationRecord>, AppError> {
    let outcome = CompensationOutcome::try_from(extract_json(body)?)?;
    let record = state
        .engine
        .record_compensation_outcome(
            &actor,
            CompensationId::from_uuid(id),
            outcome,
            idempotency.key(),
        )
        .await?;
    Ok(Json(record))
}
