//! In-memory storage cluster.
//!
//! [`MemoryCluster`] holds buckets in a `std::sync::RwLock<BTreeMap<...>>`,
//! each bucket pinned to one region.  Clients handed out by the cluster
//! ([`MemoryStorageApi`]) behave like regional S3 endpoints: any call for a
//! bucket owned by another region fails with
//! [`BrowseError::RegionMismatch`], and a location query for a bucket in
//! `us-east-1` reports no constraint, as the real API does.
//!
//! Every call is counted so tests can observe how many underlying
//! operations a higher-level operation issued.
//!
//! A cluster can be seeded from a YAML fixture file for local demos.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

use super::backend::{
    BucketSummary, ClientFactory, ListObjectsRequest, ObjectHead, ObjectPage, ObjectSummary,
    PageCursor, StorageApi, StorageFuture, DEFAULT_STORAGE_CLASS,
};
use crate::errors::{BrowseError, BrowseResult};

/// Region whose buckets report an empty location constraint.
const LEGACY_DEFAULT_REGION: &str = "us-east-1";

/// A stored object: its listing summary plus its head response.
#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub storage_class: Option<String>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
    pub user_metadata: BTreeMap<String, String>,
    pub tags: Vec<(String, String)>,
    /// When set, HeadObject on this key fails with AccessDenied.
    pub deny_head: bool,
}

impl MemoryObject {
    /// An object of `size` bytes with no content type.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            last_modified: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            storage_class: None,
            content_type: None,
            cache_control: None,
            content_encoding: None,
            user_metadata: BTreeMap::new(),
            tags: Vec::new(),
            deny_head: false,
        }
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// Set an explicit storage class.
    pub fn with_storage_class(mut self, storage_class: &str) -> Self {
        self.storage_class = Some(storage_class.to_string());
        self
    }

    /// Add one user metadata entry.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.user_metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Append one tag.
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    /// Make HeadObject on this object fail with AccessDenied.
    pub fn denied(mut self) -> Self {
        self.deny_head = true;
        self
    }

    fn etag(&self, key: &str) -> String {
        format!("\"{}\"", hex::encode(format!("{key}:{}", self.size)))
    }
}

#[derive(Debug)]
struct MemoryBucket {
    region: String,
    created: DateTime<Utc>,
    objects: BTreeMap<String, MemoryObject>,
}

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct CallCounters {
    pub list_buckets: AtomicUsize,
    pub location: AtomicUsize,
    pub list_objects: AtomicUsize,
    pub head_object: AtomicUsize,
    pub clients_created: AtomicUsize,
}

/// In-process stand-in for a multi-region object store.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    buckets: RwLock<BTreeMap<String, MemoryBucket>>,
    /// Buckets whose location query fails with a transport error.
    failing_location: RwLock<HashSet<String>>,
    /// While set, HeadObject calls park until [`MemoryCluster::release_heads`].
    heads_held: AtomicBool,
    heads_released: Notify,
    counters: CallCounters,
}

impl MemoryCluster {
    /// Create an empty cluster.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a bucket owned by `region`.  Replaces any existing bucket of
    /// the same name.
    pub fn create_bucket(&self, bucket: &str, region: &str) {
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        buckets.insert(
            bucket.to_string(),
            MemoryBucket {
                region: region.to_string(),
                created: Utc
                    .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                    .single()
                    .unwrap_or_default(),
                objects: BTreeMap::new(),
            },
        );
    }

    /// Store `object` under `key`.  The bucket must already exist.
    pub fn put_object(&self, bucket: &str, key: &str, object: MemoryObject) {
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        if let Some(b) = buckets.get_mut(bucket) {
            b.objects.insert(key.to_string(), object);
        }
    }

    /// Remove `key`, simulating a concurrent delete.
    pub fn remove_object(&self, bucket: &str, key: &str) {
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        if let Some(b) = buckets.get_mut(bucket) {
            b.objects.remove(key);
        }
    }

    /// Make location queries for `bucket` fail until cleared.
    pub fn fail_location(&self, bucket: &str, failing: bool) {
        let mut set = self
            .failing_location
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if failing {
            set.insert(bucket.to_string());
        } else {
            set.remove(bucket);
        }
    }

    /// Park every subsequent HeadObject call until [`Self::release_heads`].
    pub fn hold_heads(&self) {
        self.heads_held.store(true, Ordering::SeqCst);
    }

    /// Let parked and future HeadObject calls proceed.
    pub fn release_heads(&self) {
        self.heads_held.store(false, Ordering::SeqCst);
        self.heads_released.notify_waiters();
    }

    async fn wait_for_heads(&self) {
        let released = self.heads_released.notified();
        if self.heads_held.load(Ordering::SeqCst) {
            released.await;
        }
    }

    /// Call counters.
    pub fn counters(&self) -> &CallCounters {
        &self.counters
    }

    /// Convenience accessor for a counter value.
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Seed a cluster from a YAML fixture file.
    pub fn from_fixture<P: AsRef<Path>>(path: P) -> anyhow::Result<Arc<Self>> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_fixture_str(&contents)
    }

    /// Seed a cluster from YAML fixture text.
    pub fn from_fixture_str(contents: &str) -> anyhow::Result<Arc<Self>> {
        let fixture: Fixture = serde_yaml::from_str(contents)?;
        let cluster = Self::new();
        for bucket in fixture.buckets {
            cluster.create_bucket(&bucket.name, &bucket.region);
            for obj in bucket.objects {
                let mut object = MemoryObject::new(obj.size);
                object.content_type = obj.content_type;
                object.storage_class = obj.storage_class;
                object.user_metadata = obj.metadata;
                object.tags = obj.tags.into_iter().collect();
                object.deny_head = obj.deny_head;
                cluster.put_object(&bucket.name, &obj.key, object);
            }
        }
        Ok(cluster)
    }

    /// Look up a bucket as seen from `region`, enforcing region ownership.
    fn with_bucket<T>(
        &self,
        region: &str,
        bucket: &str,
        f: impl FnOnce(&MemoryBucket) -> BrowseResult<T>,
    ) -> BrowseResult<T> {
        let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
        let b = buckets
            .get(bucket)
            .ok_or_else(|| BrowseError::no_such_bucket(bucket))?;
        if b.region != region {
            return Err(BrowseError::RegionMismatch {
                bucket: bucket.to_string(),
                message: format!(
                    "bucket is in {} but the request was sent to {}",
                    b.region, region
                ),
            });
        }
        f(b)
    }
}

impl ClientFactory for Arc<MemoryCluster> {
    fn create(&self, region: &str) -> Arc<dyn StorageApi> {
        self.counters.clients_created.fetch_add(1, Ordering::SeqCst);
        Arc::new(MemoryStorageApi {
            cluster: Arc::clone(self),
            region: region.to_string(),
        })
    }
}

/// Regional client over a [`MemoryCluster`].
#[derive(Debug)]
pub struct MemoryStorageApi {
    cluster: Arc<MemoryCluster>,
    region: String,
}

impl MemoryStorageApi {
    fn list_page(&self, request: &ListObjectsRequest) -> BrowseResult<ObjectPage> {
        self.cluster
            .with_bucket(&self.region, &request.bucket, |b| {
                let max_keys = request.max_keys.max(1) as usize;
                let start_after = request.cursor.as_ref().map(|c| c.as_str().to_string());

                let mut objects = Vec::new();
                let mut common_prefixes: Vec<String> = Vec::new();
                let mut last_key: Option<String> = None;
                let mut truncated = false;

                let candidates = b
                    .objects
                    .iter()
                    .filter(|(k, _)| k.starts_with(&request.prefix))
                    .filter(|(k, _)| match &start_after {
                        Some(after) => k.as_str() > after.as_str(),
                        None => true,
                    });

                for (key, obj) in candidates {
                    let rolled = request
                        .delimiter
                        .as_deref()
                        .filter(|d| !d.is_empty())
                        .and_then(|delim| {
                            let rest = &key[request.prefix.len()..];
                            rest.find(delim).map(|pos| {
                                format!("{}{}", request.prefix, &rest[..pos + delim.len()])
                            })
                        });

                    // Keys sharing a rolled-up prefix are contiguous.
                    if rolled.is_some() && common_prefixes.last() == rolled.as_ref() {
                        last_key = Some(key.clone());
                        continue;
                    }

                    if objects.len() + common_prefixes.len() >= max_keys {
                        truncated = true;
                        break;
                    }

                    if let Some(rolled) = rolled {
                        common_prefixes.push(rolled);
                        last_key = Some(key.clone());
                        continue;
                    }

                    objects.push(ObjectSummary {
                        key: key.clone(),
                        size: obj.size,
                        last_modified: Some(obj.last_modified),
                        storage_class: obj
                            .storage_class
                            .clone()
                            .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.to_string()),
                        etag: Some(obj.etag(key)),
                    });
                    last_key = Some(key.clone());
                }

                Ok(ObjectPage {
                    objects,
                    truncated,
                    next_cursor: if truncated {
                        last_key.map(PageCursor::new)
                    } else {
                        None
                    },
                    common_prefixes,
                })
            })
    }

    fn head(&self, bucket: &str, key: &str) -> BrowseResult<ObjectHead> {
        self.cluster.with_bucket(&self.region, bucket, |b| {
            let obj = b
                .objects
                .get(key)
                .ok_or_else(|| BrowseError::no_such_key(bucket, key))?;
            if obj.deny_head {
                return Err(BrowseError::AccessDenied {
                    message: format!("HeadObject denied for {bucket}/{key}"),
                });
            }
            Ok(ObjectHead {
                content_type: obj.content_type.clone(),
                content_length: Some(obj.size),
                last_modified: Some(obj.last_modified),
                etag: Some(obj.etag(key)),
                // S3 omits the storage class header for STANDARD objects.
                storage_class: obj.storage_class.clone(),
                cache_control: obj.cache_control.clone(),
                content_encoding: obj.content_encoding.clone(),
                expires: None,
                website_redirect_location: None,
                server_side_encryption: None,
                user_metadata: obj.user_metadata.clone(),
                tags: obj.tags.clone(),
            })
        })
    }
}

impl StorageApi for MemoryStorageApi {
    fn region(&self) -> &str {
        &self.region
    }

    fn list_buckets(&self) -> StorageFuture<'_, Vec<BucketSummary>> {
        Box::pin(async move {
            let counters = &self.cluster.counters;
            counters.list_buckets.fetch_add(1, Ordering::SeqCst);
            let buckets = self
                .cluster
                .buckets
                .read()
                .unwrap_or_else(|e| e.into_inner());
            Ok(buckets
                .iter()
                .map(|(name, b)| BucketSummary {
                    name: name.clone(),
                    creation_date: Some(b.created),
                })
                .collect())
        })
    }

    fn bucket_location(&self, bucket: &str) -> StorageFuture<'_, Option<String>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.cluster
                .counters
                .location
                .fetch_add(1, Ordering::SeqCst);

            let failing = self
                .cluster
                .failing_location
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&bucket);
            if failing {
                return Err(BrowseError::Transport {
                    message: format!("location query for {bucket} timed out"),
                });
            }

            let buckets = self
                .cluster
                .buckets
                .read()
                .unwrap_or_else(|e| e.into_inner());
            let b = buckets
                .get(&bucket)
                .ok_or_else(|| BrowseError::no_such_bucket(&bucket))?;
            if b.region == LEGACY_DEFAULT_REGION {
                Ok(None)
            } else {
                Ok(Some(b.region.clone()))
            }
        })
    }

    fn list_objects(&self, request: &ListObjectsRequest) -> StorageFuture<'_, ObjectPage> {
        let request = request.clone();
        Box::pin(async move {
            self.cluster
                .counters
                .list_objects
                .fetch_add(1, Ordering::SeqCst);
            self.list_page(&request)
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> StorageFuture<'_, ObjectHead> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            self.cluster
                .counters
                .head_object
                .fetch_add(1, Ordering::SeqCst);
            // Yield so concurrent fetches actually interleave.
            tokio::task::yield_now().await;
            self.cluster.wait_for_heads().await;
            self.head(&bucket, &key)
        })
    }
}

// -- Fixture format -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    buckets: Vec<FixtureBucket>,
}

#[derive(Debug, Deserialize)]
struct FixtureBucket {
    name: String,
    #[serde(default = "default_fixture_region")]
    region: String,
    #[serde(default)]
    objects: Vec<FixtureObject>,
}

#[derive(Debug, Deserialize)]
struct FixtureObject {
    key: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    storage_class: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    deny_head: bool,
}

fn default_fixture_region() -> String {
    LEGACY_DEFAULT_REGION.to_string()
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request(bucket: &str, prefix: &str, max_keys: i32, cursor: Option<PageCursor>) -> ListObjectsRequest {
        ListObjectsRequest {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            delimiter: None,
            max_keys,
            cursor,
        }
    }

    fn seeded() -> Arc<MemoryCluster> {
        let cluster = MemoryCluster::new();
        cluster.create_bucket("local", "us-east-1");
        cluster.create_bucket("remote", "eu-west-1");
        for key in ["a.txt", "b.txt", "dir/c.txt", "dir/d.txt", "e.txt"] {
            cluster.put_object("local", key, MemoryObject::new(1));
        }
        cluster.put_object("remote", "x", MemoryObject::new(5));
        cluster
    }

    #[tokio::test]
    async fn test_wrong_region_is_region_mismatch() {
        let cluster = seeded();
        let client = cluster.create("us-east-1");
        let err = client
            .list_objects(&request("remote", "", 10, None))
            .await
            .unwrap_err();
        assert!(err.is_region_mismatch());

        let right = cluster.create("eu-west-1");
        let page = right.list_objects(&request("remote", "", 10, None)).await.unwrap();
        assert_eq!(page.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_location_of_legacy_region_is_empty() {
        let cluster = seeded();
        let client = cluster.create("us-east-1");
        assert_eq!(client.bucket_location("local").await.unwrap(), None);
        assert_eq!(
            client.bucket_location("remote").await.unwrap().as_deref(),
            Some("eu-west-1")
        );
        assert_eq!(MemoryCluster::count(&cluster.counters().location), 2);
    }

    #[tokio::test]
    async fn test_pagination_cursor_continues_after_last_key() {
        let cluster = seeded();
        let client = cluster.create("us-east-1");

        let first = client.list_objects(&request("local", "", 2, None)).await.unwrap();
        assert!(first.truncated);
        assert_eq!(first.objects.len(), 2);

        let second = client
            .list_objects(&request("local", "", 2, first.next_cursor.clone()))
            .await
            .unwrap();
        assert_eq!(second.objects[0].key, "dir/c.txt");
    }

    #[tokio::test]
    async fn test_delimiter_rolls_up_prefixes() {
        let cluster = seeded();
        let client = cluster.create("us-east-1");
        let mut req = request("local", "", 100, None);
        req.delimiter = Some("/".to_string());

        let page = client.list_objects(&req).await.unwrap();
        assert_eq!(page.common_prefixes, vec!["dir/".to_string()]);
        assert_eq!(page.objects.len(), 3);
        assert!(!page.truncated);
    }

    #[tokio::test]
    async fn test_head_missing_key_is_not_found() {
        let cluster = seeded();
        let client = cluster.create("us-east-1");
        let err = client.head_object("local", "nope").await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn test_head_omits_standard_storage_class() {
        let cluster = seeded();
        let client = cluster.create("us-east-1");
        let head = client.head_object("local", "a.txt").await.unwrap();
        assert_eq!(head.storage_class, None);
        assert_eq!(head.content_length, Some(1));
    }

    #[tokio::test]
    async fn test_held_heads_park_until_released() {
        let cluster = seeded();
        cluster.hold_heads();

        let client = cluster.create("us-east-1");
        let parked = tokio::spawn(async move { client.head_object("local", "a.txt").await });
        while MemoryCluster::count(&cluster.counters().head_object) == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!parked.is_finished());

        cluster.release_heads();
        let head = parked.await.unwrap().unwrap();
        assert_eq!(head.content_length, Some(1));
    }

    #[test]
    fn test_fixture_loading() {
        let yaml = r#"
buckets:
  - name: assets
    objects:
      - key: logo.png
        size: 2048
        content_type: image/png
        metadata:
          owner: design
  - name: photos
    region: eu-west-1
    objects:
      - key: cat.jpg
        size: 10
        deny_head: true
"#;
        let cluster = MemoryCluster::from_fixture_str(yaml).unwrap();
        let buckets = cluster.buckets.read().unwrap();
        assert_eq!(buckets["assets"].region, "us-east-1");
        assert_eq!(buckets["photos"].region, "eu-west-1");
        let logo = &buckets["assets"].objects["logo.png"];
        assert_eq!(logo.size, 2048);
        assert_eq!(logo.user_metadata["owner"], "design");
        assert!(buckets["photos"].objects["cat.jpg"].deny_head);
    }

    #[test]
    fn test_demo_fixture_loads() {
        let cluster = MemoryCluster::from_fixture_str(include_str!("../../fixtures/demo.yaml")).unwrap();
        let buckets = cluster.buckets.read().unwrap();
        assert_eq!(buckets["photos"].region, "eu-west-1");
        assert_eq!(buckets["assets"].objects.len(), 3);
    }
}
