//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Engine rejections keep their typed kind, and the unmodified transaction
//! snapshot travels in `details.current` so a client can reconcile without
//! a second read. Storage failures are logged and never shown to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use escrow_engine::{EngineError, Rejection};
use escrow_state::EscrowTransaction;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "INVALID_TRANSITION", "NOT_FOUND").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// `current` transaction snapshot and `retryable` flag for engine
    /// rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// The engine refused the request.
    #[error("{error}")]
    Rejected {
        error: EngineError,
        current: Option<Box<EscrowTransaction>>,
    },

    /// Request body is not well-formed JSON (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request content failed validation (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid credentials (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Service dependency not configured (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Rejected { error, .. } => match error {
                EngineError::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
                EngineError::ConflictingDispute(_) => (StatusCode::CONFLICT, "CONFLICTING_DISPUTE"),
                EngineError::StaleWrite(_) => (StatusCode::CONFLICT, "STALE_WRITE"),
                EngineError::IntegrityViolation(_) => (StatusCode::CONFLICT, "INTEGRITY_VIOLATION"),
                EngineError::AlreadyExists(_) => (StatusCode::CONFLICT, "ALREADY_EXISTS"),
                EngineError::Unauthorized(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                EngineError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
                EngineError::CollaboratorUnavailable { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "COLLABORATOR_UNAVAILABLE")
                }
                EngineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        }
    }
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        Self::Rejected {
            error: rejection.error,
            current: rejection.current,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Rejected {
                error: EngineError::Storage(_),
                ..
            } => "An internal error occurred".to_string(),
            Self::Rejected {
                error: EngineError::CollaboratorUnavailable { operation, .. },
                ..
            } => format!("{operation} is temporarily unavailable; retry later"),
            Self::Rejected { error, .. } => error.to_string(),
            other => other.to_string(),
        };

        match &self {
            Self::Rejected {
                error: EngineError::Storage(_),
                ..
            } => tracing::error!(error = %self, "internal server error"),
            Self::Rejected {
                error: EngineError::CollaboratorUnavailable { .. },
                ..
            } => tracing::warn!(error = %self, "collaborator unavailable"),
            Self::ServiceUnavailable(_) => tracing::warn!(error = %self, "service unavailable"),
            _ => {}
        }

        let details = match self {
            Self::Rejected {
                error: EngineError::Storage(_),
                ..
            } => None,
            Self::Rejected { error, current } => Some(serde_json::json!({
                "current": current,
                "retryable": error.is_retryable(),
            })),
            _ => None,
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn rejected(error: EngineError) -> AppError {
        AppError::Rejected {
            error,
            current: None,
        }
    }

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn conflicts_map_to_409() {
        for error in [
            EngineError::InvalidTransition("x".into()),
            EngineError::ConflictingDispute("x".into()),
            EngineError::StaleWrite("x".into()),
            EngineError::IntegrityViolation("x".into()),
            EngineError::AlreadyExists("x".into()),
        ] {
            assert_eq!(rejected(error).status_and_code().0, StatusCode::CONFLICT);
        }
    }

    #[test]
    fn unauthorized_actor_is_forbidden_not_unauthenticated() {
        let (status, code) = rejected(EngineError::Unauthorized("no".into())).status_and_code();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(code, "FORBIDDEN");
        let (status, _) = AppError::Unauthorized("no token".into()).status_and_code();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn malformed_body_is_400_and_invalid_content_is_422() {
        assert_eq!(
            AppError::BadRequest("eof".into()).status_and_code().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            rejected(EngineError::Validation("stars".into())).status_and_code().0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn storage_failure_hides_message_and_details() {
        let (status, body) = body_json(rejected(EngineError::Storage("disk on fire".into()))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert!(!body["error"]["message"].as_str().unwrap().contains("disk"));
        assert!(body["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn collaborator_outage_is_retryable_503() {
        let (status, body) = body_json(rejected(EngineError::CollaboratorUnavailable {
            operation: "confirm_deposit".into(),
            reason: "rail timeout at 10.0.0.7".into(),
        }))
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["details"]["retryable"], true);
        assert!(!body["error"]["message"].as_str().unwrap().contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn rejection_without_transaction_has_null_current() {
        let (status, body) = body_json(rejected(EngineError::NotFound {
            entity: "transaction",
            id: "abc".into(),
        }))
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"]["details"]["current"].is_null());
        assert_eq!(body["error"]["details"]["retryable"], false);
    }
}
