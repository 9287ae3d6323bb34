//! # Custom Extractors
//!
//! JSON body extraction with typed errors, and the optional
//! `idempotency-key` header.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::Json;

use escrow_core::IdempotencyKey;

use crate::error::AppError;

/// Header carrying the caller's idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Extract a JSON body. Syntax errors are 400; well-formed JSON that does
/// not fit the request type is 422.
///
/// ```ignore
/// async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
///     let req = extract_json(body)?;
/// }
/// ```
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result.map(|Json(v)| v).map_err(|err| match err {
        JsonRejection::JsonDataError(e) => AppError::Validation(e.body_text()),
        other => AppError::BadRequest(other.body_text()),
    })
}

/// The optional `idempotency-key` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Idempotency(pub Option<IdempotencyKey>);

impl Idempotency {
    /// The key, if one was sent.
    pub fn key(&self) -> Option<&IdempotencyKey> {
        self.0.as_ref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Idempotency {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IDEMPOTENCY_HEADER) else {
            return Ok(Self(None));
        };
        let raw = value
            .to_str()
            .map_err(|_| AppError::Validation(format!("{IDEMPOTENCY_HEADER} must be ASCII")))?;
        IdempotencyKey::new(raw)
            .map(|key| Self(Some(key)))
            .map_err(|e| AppError::Validation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn idempotency_of(header: Option<&str>) -> Result<Idempotency, AppError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(IDEMPOTENCY_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Idempotency::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn header_is_optional() {
        assert_eq!(idempotency_of(None).await.unwrap(), Idempotency(None));
    }

    #[tokio::test]
    async fn valid_key_is_extracted() {
        let got = idempotency_of(Some("fund-7f3a")).await.unwrap();
        assert_eq!(got.key().map(|k| k.as_str()), Some("fund-7f3a"));
    }

    #[tokio::test]
    async fn key_with_spaces_is_validation_error() {
        let err = idempotency_of(Some("two words")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
