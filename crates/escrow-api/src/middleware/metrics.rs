//! # HTTP Metrics
//!
//! Request counts and latency recorded through the `metrics` facade. The
//! Prometheus recorder is installed by the binary; without one every call
//! here is a no-op.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

/// Path segments that follow one of these are identifiers.
const ID_PARENTS: &[&str] = &[
    "transactions",
    "disputes",
    "proofs",
    "ratings",
    "users",
    "compensations",
];

/// Replace identifier segments with `{id}` so label cardinality stays
/// bounded. UUIDs are replaced anywhere; user ids (free-form) are replaced
/// when they follow a collection name.
fn normalize_path(path: &str) -> String {
    let mut previous = "";
    path.split('/')
        .map(|segment| {
            let replaced = if is_uuid(segment) || (ID_PARENTS.contains(&previous) && !segment.is_empty())
            {
                "{id}"
            } else {
                segment
            };
            previous = segment;
            replaced
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_uuid(segment: &str) -> bool {
    segment.len() == 36
        && segment.chars().enumerate().all(|(i, c)| {
            if i == 8 || i == 13 || i == 18 || i == 23 {
                c == '-'
            } else {
                c.is_ascii_hexdigit()
            }
        })
}

/// Middleware that records `http_requests_total{method,path,status}` and
/// `http_request_duration_seconds{method,path}`.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method,
        "path" => path
    )
    .record(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_segments_are_replaced() {
        let path = "/v1/transactions/550e8400-e29b-41d4-a716-446655440000/proofs";
        assert_eq!(normalize_path(path), "/v1/transactions/{id}/proofs");
    }

    #[test]
    fn user_ids_are_replaced() {
        assert_eq!(
            normalize_path("/v1/users/alice/reputation"),
            "/v1/users/{id}/reputation"
        );
    }

    #[test]
    fn fixed_paths_are_preserved() {
        assert_eq!(normalize_path("/v1/transactions"), "/v1/transactions");
        assert_eq!(normalize_path("/v1/sweep"), "/v1/sweep");
        assert_eq!(normalize_path("/health/liveness"), "/health/liveness");
    }
}
