//! Prometheus metrics for bucketlens.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides an axum middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "bucketlens_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "bucketlens_http_request_duration_seconds";

/// Total storage API calls (counter). Labels: operation, status.
pub const STORAGE_OPERATIONS_TOTAL: &str = "bucketlens_storage_operations_total";

/// Calls retried against a bucket's own region (counter).
pub const REGION_REDIRECTS_TOTAL: &str = "bucketlens_region_redirects_total";

/// Bucket region lookups (counter). Labels: outcome (resolved, fallback).
pub const REGION_LOOKUPS_TOTAL: &str = "bucketlens_region_lookups_total";

/// Objects left out of a search because their metadata failed (counter).
pub const SEARCH_SKIPPED_TOTAL: &str = "bucketlens_search_skipped_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent; a failure to
/// install is returned on the first call only.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(STORAGE_OPERATIONS_TOTAL, "Total storage API calls by operation and outcome");
    describe_counter!(REGION_REDIRECTS_TOTAL, "Calls retried against the bucket's own region");
    describe_counter!(REGION_LOOKUPS_TOTAL, "Bucket region lookups by outcome");
    describe_counter!(SEARCH_SKIPPED_TOTAL, "Objects skipped during search after a metadata failure");
}

/// Count one storage API call.
pub fn record_storage_operation(operation: &'static str, status: &'static str) {
    counter!(STORAGE_OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path, "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// Examples:
/// - `/health` -> `/health`
/// - `/api/s3/buckets/photos/objects` -> `/api/s3/buckets/{bucket}/objects`
/// - `/api/s3/buckets/photos/objects/a%2Fb.jpg/metadata`
///   -> `/api/s3/buckets/{bucket}/objects/{key}/metadata`
fn normalize_path(path: &str) -> &'static str {
    const BUCKET_ROUTES: &[(&str, &str)] = &[
        ("objects", "/api/s3/buckets/{bucket}/objects"),
        ("search", "/api/s3/buckets/{bucket}/search"),
        (
            "objects-with-metadata",
            "/api/s3/buckets/{bucket}/objects-with-metadata",
        ),
    ];

    match path {
        "/" => return "/",
        "/health" => return "/health",
        "/metrics" => return "/metrics",
        "/api/s3/buckets" | "/api/s3/buckets/" => return "/api/s3/buckets",
        _ => {}
    }

    let Some(rest) = path.strip_prefix("/api/s3/buckets/") else {
        return "other";
    };
    let segments: Vec<&str> = rest.split('/').collect();
    match segments.as_slice() {
        [_bucket, route] => BUCKET_ROUTES
            .iter()
            .find(|(name, _)| name == route)
            .map(|(_, template)| *template)
            .unwrap_or("other"),
        [_bucket, "objects", _key, "metadata"] => {
            "/api/s3/buckets/{bucket}/objects/{key}/metadata"
        }
        _ => "other",
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics are disabled").into_response(),
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_fixed_routes() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/api/s3/buckets"), "/api/s3/buckets");
    }

    #[test]
    fn test_normalize_path_bucket_routes() {
        assert_eq!(
            normalize_path("/api/s3/buckets/photos/objects"),
            "/api/s3/buckets/{bucket}/objects"
        );
        assert_eq!(
            normalize_path("/api/s3/buckets/photos/search"),
            "/api/s3/buckets/{bucket}/search"
        );
        assert_eq!(
            normalize_path("/api/s3/buckets/photos/objects-with-metadata"),
            "/api/s3/buckets/{bucket}/objects-with-metadata"
        );
    }

    #[test]
    fn test_normalize_path_metadata_route() {
        assert_eq!(
            normalize_path("/api/s3/buckets/photos/objects/2024%2Fa.jpg/metadata"),
            "/api/s3/buckets/{bucket}/objects/{key}/metadata"
        );
    }

    #[test]
    fn test_normalize_path_unknown() {
        assert_eq!(normalize_path("/favicon.ico"), "other");
        assert_eq!(normalize_path("/api/s3/buckets/photos/nope"), "other");
    }
}
