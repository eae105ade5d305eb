//! Object listing and metadata handlers.

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::browse::ListQuery;
use crate::errors::BrowseError;
use crate::storage::backend::PageCursor;
use crate::AppState;

/// Query string of `GET .../objects`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectsParams {
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_max_keys")]
    pub max_keys: i64,
    pub continuation_token: Option<String>,
    pub delimiter: Option<String>,
}

/// Query string of `GET .../objects-with-metadata`.
#[derive(Debug, Deserialize)]
pub struct TableParams {
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_table_limit")]
    pub limit: i64,
}

fn default_max_keys() -> i64 {
    100
}

fn default_table_limit() -> i64 {
    50
}

/// `GET /api/s3/buckets/:bucket/objects` -- one listing page.
pub async fn list_objects(
    state: Arc<AppState>,
    bucket: &str,
    params: ListObjectsParams,
) -> Result<Response, BrowseError> {
    let query = ListQuery {
        prefix: params.prefix,
        delimiter: params.delimiter.filter(|d| !d.is_empty()),
        max_keys: params.max_keys,
        cursor: params
            .continuation_token
            .filter(|t| !t.is_empty())
            .map(PageCursor::new),
    };
    let page = state.service.list_objects_page(bucket, &query).await?;
    Ok(Json(page).into_response())
}

/// `GET /api/s3/buckets/:bucket/objects/:key/metadata` -- normalized
/// metadata of one object.
pub async fn get_metadata(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
) -> Result<Response, BrowseError> {
    let metadata = state.service.fetch_metadata(bucket, key).await?;
    Ok(Json(metadata).into_response())
}

/// `GET /api/s3/buckets/:bucket/objects-with-metadata` -- table view.
pub async fn list_objects_with_metadata(
    state: Arc<AppState>,
    bucket: &str,
    params: TableParams,
) -> Result<Response, BrowseError> {
    let page = state
        .service
        .list_objects_with_metadata(bucket, &params.prefix, params.limit)
        .await?;
    Ok(Json(page).into_response())
}
