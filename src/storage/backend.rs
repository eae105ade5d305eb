//! Abstract storage API trait.
//!
//! Every regional client must implement [`StorageApi`].  A client is bound
//! to exactly one region; calls for a bucket owned by another region fail
//! with [`BrowseError::RegionMismatch`] and are re-routed by the
//! redirect-aware invoker, never by the client itself.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::BrowseResult;

/// Largest page the storage API hands out per listing call.
pub const MAX_PAGE_SIZE: i32 = 1000;

/// Storage class reported when the API omits one.
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";

/// Opaque continuation token returned by a listing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        PageCursor(token.into())
    }

    /// Borrow the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A bucket as returned by ListBuckets.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSummary {
    pub name: String,
    pub creation_date: Option<DateTime<Utc>>,
}

/// One listed object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub storage_class: String,
    pub etag: Option<String>,
}

/// Parameters of a single listing call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListObjectsRequest {
    /// Bucket to enumerate.
    pub bucket: String,
    /// Literal key prefix; empty lists the whole bucket.
    pub prefix: String,
    /// Optional delimiter for folder-style roll-up.
    pub delimiter: Option<String>,
    /// Page size, already clamped to `1..=MAX_PAGE_SIZE`.
    pub max_keys: i32,
    /// Cursor from the preceding page, `None` for the first page.
    pub cursor: Option<PageCursor>,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPage {
    pub objects: Vec<ObjectSummary>,
    #[serde(rename = "isTruncated")]
    pub truncated: bool,
    #[serde(rename = "nextContinuationToken")]
    pub next_cursor: Option<PageCursor>,
    pub common_prefixes: Vec<String>,
}

/// Raw HeadObject response, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectHead {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub storage_class: Option<String>,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
    pub expires: Option<String>,
    pub website_redirect_location: Option<String>,
    pub server_side_encryption: Option<String>,
    pub user_metadata: BTreeMap<String, String>,
    pub tags: Vec<(String, String)>,
}

/// Boxed future returned by every [`StorageApi`] method.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = BrowseResult<T>> + Send + 'a>>;

/// Async storage API contract, bound to one region.
pub trait StorageApi: Send + Sync + 'static {
    /// The region this client sends requests to.
    fn region(&self) -> &str;

    /// List every bucket visible to the configured credentials.
    fn list_buckets(&self) -> StorageFuture<'_, Vec<BucketSummary>>;

    /// Query the location constraint of `bucket`.
    ///
    /// Returns `None` when the API reports no constraint, which is how the
    /// historical default region is represented.
    fn bucket_location(&self, bucket: &str) -> StorageFuture<'_, Option<String>>;

    /// Fetch a single listing page.
    fn list_objects(&self, request: &ListObjectsRequest) -> StorageFuture<'_, ObjectPage>;

    /// Retrieve descriptive metadata for one key.
    fn head_object(&self, bucket: &str, key: &str) -> StorageFuture<'_, ObjectHead>;
}

/// Builds regional clients on demand.
pub trait ClientFactory: Send + Sync + 'static {
    /// Construct a client bound to `region`.
    fn create(&self, region: &str) -> Arc<dyn StorageApi>;
}
