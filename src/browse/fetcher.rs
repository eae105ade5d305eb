//! Per-object metadata retrieval.
//!
//! One HeadObject per call, routed through the redirect-aware invoker.
//! The raw response is normalized into [`ObjectMetadata`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::invoker::RedirectAwareInvoker;
use crate::errors::{BrowseError, BrowseResult};
use crate::storage::backend::{ObjectHead, ObjectSummary, DEFAULT_STORAGE_CLASS};

/// One object tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectTag {
    pub key: String,
    pub value: String,
}

/// Normalized descriptive metadata of one object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub storage_class: String,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
    pub expires: Option<String>,
    pub website_redirect_location: Option<String>,
    pub server_side_encryption: Option<String>,
    /// User-defined metadata; keys are case-sensitive.
    #[serde(rename = "metadata")]
    pub custom_metadata: BTreeMap<String, String>,
    pub tags: Vec<ObjectTag>,
    /// Set only on placeholders built after a failed fetch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

impl ObjectMetadata {
    /// Normalize a raw HeadObject response.
    pub fn from_head(head: ObjectHead) -> Self {
        Self {
            content_type: non_empty(head.content_type),
            content_length: head.content_length,
            last_modified: head.last_modified,
            etag: non_empty(head.etag),
            storage_class: non_empty(head.storage_class)
                .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.to_string()),
            cache_control: non_empty(head.cache_control),
            content_encoding: non_empty(head.content_encoding),
            expires: non_empty(head.expires),
            website_redirect_location: non_empty(head.website_redirect_location),
            server_side_encryption: non_empty(head.server_side_encryption),
            custom_metadata: head.user_metadata,
            tags: head
                .tags
                .into_iter()
                .map(|(key, value)| ObjectTag { key, value })
                .collect(),
            fetch_error: None,
        }
    }

    /// Placeholder for an object whose metadata could not be fetched.
    ///
    /// Carries what the listing already knows (size, modification time,
    /// storage class) and the failure message.
    pub fn unavailable(summary: &ObjectSummary, error: &BrowseError) -> Self {
        Self {
            content_type: None,
            content_length: Some(summary.size),
            last_modified: summary.last_modified,
            etag: summary.etag.clone(),
            storage_class: summary.storage_class.clone(),
            cache_control: None,
            content_encoding: None,
            expires: None,
            website_redirect_location: None,
            server_side_encryption: None,
            custom_metadata: BTreeMap::new(),
            tags: Vec::new(),
            fetch_error: Some(error.to_string()),
        }
    }

    /// Whether this record is a failed-fetch placeholder.
    pub fn is_unavailable(&self) -> bool {
        self.fetch_error.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Retrieves [`ObjectMetadata`] for single keys.
#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    invoker: RedirectAwareInvoker,
}

impl MetadataFetcher {
    /// Create a fetcher that routes through `invoker`.
    pub fn new(invoker: RedirectAwareInvoker) -> Self {
        Self { invoker }
    }

    /// Fetch metadata for `bucket`/`key`.
    ///
    /// Fails with `NotFound` if the key is gone by the time of the call;
    /// that race is not retried.
    pub async fn fetch(&self, bucket: &str, key: &str) -> BrowseResult<ObjectMetadata> {
        let head = self
            .invoker
            .invoke(bucket, |client| {
                let bucket = bucket.to_string();
                let key = key.to_string();
                async move { client.head_object(&bucket, &key).await }
            })
            .await?;

        debug!("Fetched metadata for {}/{}", bucket, key);
        Ok(ObjectMetadata::from_head(head))
    }
}
