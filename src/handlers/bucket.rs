//! Bucket-level handlers.

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use crate::errors::BrowseError;
use crate::AppState;

/// `GET /api/s3/buckets` -- every bucket visible to the configured
/// credentials.
pub async fn list_buckets(state: Arc<AppState>) -> Result<Response, BrowseError> {
    let buckets = state.service.list_buckets().await?;
    debug!("ListBuckets returned {} buckets", buckets.len());
    Ok(Json(buckets).into_response())
}
