//! # Operator Routes

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use escrow_engine::SweepReport;

use crate::auth::Caller;
use crate::error::AppError;
use crate::state::AppState;

/// Build the operator router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/sweep", post(trigger_sweep))
}

/// POST /v1/sweep: Run one sweep pass now.
#[utoipa::path(
    post,
    path = "/v1/sweep",
    responses(
        (status = 200, description = "What the pass did", body = serde_json::Value),
        (status = 403, description = "Operators only"),
    ),
    tag = "operations"
)]
pub(crate) async fn trigger_sweep(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(state.engine.trigger_sweep(&actor).await?))
}
