//! # OpenAPI Document Assembly
//!
//! Assembles the utoipa-documented routes into one OpenAPI document, served
//! at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI document for the escrow API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Escrow API",
        version = "0.1.0",
        description = "Escrow transactions with delivery proofs, arbitrated disputes, reputation and compensation."
    ),
    paths(
        // Transactions
        crate::routes::transactions::create_transaction,
        crate::routes::transactions::get_transaction,
        crate::routes::transactions::get_audit,
        crate::routes::transactions::fund,
        crate::routes::transactions::transition,
        crate::routes::transactions::submit_proof,
        crate::routes::transactions::list_proofs,
        crate::routes::transactions::verify_proof,
        // Disputes
        crate::routes::disputes::open_dispute,
        crate::routes::disputes::list_disputes,
        crate::routes::disputes::get_dispute,
        crate::routes::disputes::submit_decision,
        crate::routes::disputes::request_evidence,
        crate::routes::disputes::resume_review,
        // Ratings, reputation, compensation
        crate::routes::users::submit_rating,
        crate::routes::users::list_ratings,
        crate::routes::users::flag_rating,
        crate::routes::users::get_reputation,
        crate::routes::users::set_verification,
        crate::routes::users::list_compensations,
        crate::routes::users::record_outcome,
        // Operations
        crate::routes::ops::trigger_sweep,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        crate::routes::transactions::CreateTransactionRequest,
        crate::routes::transactions::TransitionRequest,
        crate::routes::transactions::SubmitProofRequest,
        crate::routes::transactions::VerifyProofRequest,
        crate::routes::disputes::OpenDisputeRequest,
        crate::routes::disputes::DecisionRequest,
        crate::routes::disputes::EvidenceRequest,
        crate::routes::users::RatingRequest,
        crate::routes::users::VerificationRequest,
        crate::routes::users::CompensationOutcomeRequest,
    )),
    tags(
        (name = "transactions", description = "Escrow lifecycle and delivery proofs"),
        (name = "disputes", description = "Dispute opening, arbitration and operator review"),
        (name = "ratings", description = "Counterparty ratings and moderation"),
        (name = "reputation", description = "User reputation and identity verification"),
        (name = "compensation", description = "Compensation issued by arbitration"),
        (name = "operations", description = "Operator maintenance"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI document.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_family_is_documented() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        for path in [
            "/v1/transactions",
            "/v1/transactions/{id}/fund",
            "/v1/disputes/{id}/decision",
            "/v1/users/{id}/reputation",
            "/v1/compensations/{id}/outcome",
            "/v1/sweep",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
    }
}
