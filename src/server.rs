//! Axum router construction.
//!
//! The [`app`] function wires every `/api/s3` endpoint to its handler and
//! returns a ready-to-serve [`axum::Router`].  Router-level functions here
//! only extract path, query and body; the work happens in
//! [`crate::handlers`].

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::errors::{generate_request_id, BrowseError};
use crate::handlers::object::{ListObjectsParams, TableParams};
use crate::handlers::search::SearchRequest;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Build the axum [`Router`] with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/buckets", get(handle_list_buckets))
        .route("/buckets/:bucket/objects", get(handle_list_objects))
        .route(
            "/buckets/:bucket/objects/:key/metadata",
            get(handle_object_metadata),
        )
        .route("/buckets/:bucket/search", post(handle_search))
        .route(
            "/buckets/:bucket/objects-with-metadata",
            get(handle_objects_with_metadata),
        );

    let mut router = Router::new()
        .route("/health", get(health_check))
        .nest("/api/s3", api);

    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    let router = router
        .with_state(state.clone())
        // Layer ordering: the last layer added is the outermost.
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    if state.config.observability.metrics {
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    }
}

// -- Request id middleware ---------------------------------------------------

/// Adds an `x-request-id` header to every response that lacks one.  Error
/// responses carry their own.
async fn request_id_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }

    response
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- liveness probe.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

// -- Route adapters ----------------------------------------------------------

/// `GET /api/s3/buckets`
async fn handle_list_buckets(State(state): State<Arc<AppState>>) -> Result<Response, BrowseError> {
    crate::handlers::bucket::list_buckets(state).await
}

/// `GET /api/s3/buckets/:bucket/objects`
async fn handle_list_objects(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    query: Result<Query<ListObjectsParams>, QueryRejection>,
) -> Result<Response, BrowseError> {
    let Query(params) = query.map_err(invalid_query)?;
    crate::handlers::object::list_objects(state, &bucket, params).await
}

/// `GET /api/s3/buckets/:bucket/objects/:key/metadata`
///
/// The key arrives percent-encoded so it can contain `/`; `Path` decodes it.
async fn handle_object_metadata(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, BrowseError> {
    crate::handlers::object::get_metadata(state, &bucket, &key).await
}

/// `POST /api/s3/buckets/:bucket/search`
async fn handle_search(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Response, BrowseError> {
    let Json(request) = body.map_err(|e| BrowseError::InvalidFilter {
        message: e.body_text(),
    })?;
    crate::handlers::search::search(state, &bucket, request).await
}

/// `GET /api/s3/buckets/:bucket/objects-with-metadata`
async fn handle_objects_with_metadata(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    query: Result<Query<TableParams>, QueryRejection>,
) -> Result<Response, BrowseError> {
    let Query(params) = query.map_err(invalid_query)?;
    crate::handlers::object::list_objects_with_metadata(state, &bucket, params).await
}

/// Render a malformed query string as a JSON error body.
fn invalid_query(rejection: QueryRejection) -> BrowseError {
    BrowseError::InvalidRequest {
        message: rejection.body_text(),
    }
}
