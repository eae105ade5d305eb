//! Metadata search handler.

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::browse::FilterSpec;
use crate::errors::BrowseError;
use crate::AppState;

/// Body of `POST .../search`.
#[derive(Debug, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub filters: FilterSpec,
    #[serde(default)]
    pub prefix: String,
}

/// `POST /api/s3/buckets/:bucket/search` -- every object under `prefix`
/// matching `filters`.
pub async fn search(
    state: Arc<AppState>,
    bucket: &str,
    request: SearchRequest,
) -> Result<Response, BrowseError> {
    info!(
        "Search bucket={} prefix='{}' filters={:?}",
        bucket, request.prefix, request.filters
    );
    let hits = state
        .service
        .search(bucket, &request.filters, &request.prefix)
        .await?;
    Ok(Json(hits).into_response())
}
