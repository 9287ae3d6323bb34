//! # Authentication Middleware
//!
//! Bearer token middleware that resolves every request to an engine
//! [`Actor`]. Health checks and `/metrics` are mounted outside it.
//!
//! ## Token Format
//!
//! ```text
//! Bearer party:{user_id}:{secret}      # an end user (buyer or seller)
//! Bearer operator:{name}:{secret}      # an operator (arbiter, support, settlement)
//! ```
//!
//! The secret is compared in constant time against `AUTH_TOKEN`. When no
//! token is configured (development mode) the caller is taken from the
//! `x-user-id` header, or is the `dev` operator when the header is absent.
//!
//! The engine's own actor, `system`, is never reachable from HTTP.

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use subtle::ConstantTimeEq;

use escrow_core::{Actor, UserId};

use crate::error::{AppError, ErrorBody, ErrorDetail};

/// Development-mode header naming the calling user.
pub const USER_HEADER: &str = "x-user-id";

/// Operator name used when auth is disabled and no user is named.
const DEV_OPERATOR: &str = "dev";

// ── Caller ──────────────────────────────────────────────────────────────────

/// The authenticated caller, injected by [`auth_middleware`] and extracted
/// by handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

// ── Auth Configuration ──────────────────────────────────────────────────────

/// Auth configuration injected into request extensions.
///
/// Custom `Debug` redacts the token value.
#[derive(Clone)]
pub struct AuthConfig {
    pub token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── Token Validation ────────────────────────────────────────────────────────

/// Constant-time comparison of bearer secrets. On a length mismatch a dummy
/// comparison keeps timing independent of where the mismatch is.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Parse a bearer token of the form `{role}:{id}:{secret}`.
pub fn parse_bearer_token(provided: &str, expected_secret: &str) -> Result<Actor, String> {
    let parts: Vec<&str> = provided.splitn(3, ':').collect();
    let [role, id, secret] = parts.as_slice() else {
        return Err("invalid token format, expected {role}:{id}:{secret}".into());
    };

    if !constant_time_token_eq(secret, expected_secret) {
        return Err("invalid bearer token".into());
    }

    match *role {
        "party" => UserId::new(*id)
            .map(Actor::User)
            .map_err(|e| format!("invalid user id: {e}")),
        "operator" if id.trim().is_empty() => Err("operator name must not be empty".into()),
        "operator" => Ok(Actor::Operator((*id).to_string())),
        other => Err(format!("unknown role: {other}")),
    }
}

/// Resolve the caller when auth is disabled.
fn development_caller(headers: &HeaderMap) -> Result<Actor, String> {
    match headers.get(USER_HEADER) {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| format!("{USER_HEADER} must be visible ASCII"))?;
            UserId::new(raw)
                .map(Actor::User)
                .map_err(|e| format!("invalid {USER_HEADER}: {e}"))
        }
        None => Ok(Actor::Operator(DEV_OPERATOR.into())),
    }
}

// ── Middleware ──────────────────────────────────────────────────────────────

/// Resolve the caller and inject it into request extensions, or answer 401.
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let expected_token = request.extensions().get::<AuthConfig>().cloned();

    let resolved = match expected_token {
        Some(AuthConfig {
            token: Some(ref expected),
        }) => {
            let auth_header = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());

            match auth_header {
                Some(value) => match value.strip_prefix("Bearer ") {
                    Some(provided) => parse_bearer_token(provided, expected),
                    None => Err("authorization header must use Bearer scheme".into()),
                },
                None => Err("missing authorization header".into()),
            }
        }
        _ => development_caller(request.headers()),
    };

    match resolved {
        Ok(actor) => {
            request.extensions_mut().insert(Caller(actor));
            next.run(request).await
        }
        Err(msg) => {
            tracing::warn!(reason = %msg, "authentication failed");
            unauthorized_response(&msg)
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
