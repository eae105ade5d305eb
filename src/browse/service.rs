//! The browse service: the operations request handlers call.
//!
//! Owns the region cache and client registry for the process and wires
//! them into the lister, fetcher and search orchestrator.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::fetcher::{MetadataFetcher, ObjectMetadata};
use super::filter::FilterSpec;
use super::invoker::RedirectAwareInvoker;
use super::lister::PaginatedLister;
use super::region::{ClientRegistry, RegionCache};
use super::search::{SearchHit, SearchOrchestrator};
use crate::config::SearchConfig;
use crate::errors::{BrowseError, BrowseResult};
use crate::storage::backend::{BucketSummary, ClientFactory, ObjectPage, ObjectSummary, PageCursor};

/// Parameters of a single listing request.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: i64,
    pub cursor: Option<PageCursor>,
}

/// An object row of the table view; `metadata` is present only for the
/// first rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    #[serde(flatten)]
    pub object: ObjectSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMetadata>,
}

/// One page of the table view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePage {
    pub objects: Vec<TableRow>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<PageCursor>,
    pub common_prefixes: Vec<String>,
}

/// Region-aware bucket browser.
#[derive(Debug)]
pub struct BrowserService {
    registry: Arc<ClientRegistry>,
    regions: Arc<RegionCache>,
    lister: PaginatedLister,
    fetcher: MetadataFetcher,
    orchestrator: SearchOrchestrator,
    settings: SearchConfig,
}

impl BrowserService {
    /// Build a service whose default client targets `default_region`.
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        default_region: &str,
        settings: SearchConfig,
    ) -> Self {
        let registry = Arc::new(ClientRegistry::new(factory, default_region));
        let regions = Arc::new(RegionCache::new(default_region));
        let invoker = RedirectAwareInvoker::new(Arc::clone(&registry), Arc::clone(&regions));
        let lister = PaginatedLister::new(invoker.clone());
        let fetcher = MetadataFetcher::new(invoker);
        let orchestrator =
            SearchOrchestrator::new(lister.clone(), fetcher.clone(), settings.concurrency);

        Self {
            registry,
            regions,
            lister,
            fetcher,
            orchestrator,
            settings,
        }
    }

    /// The process-wide region cache.
    pub fn regions(&self) -> &RegionCache {
        &self.regions
    }

    /// List every bucket visible to the configured credentials.
    ///
    /// ListBuckets is not bucket-scoped, so it never needs a redirect.
    pub async fn list_buckets(&self) -> BrowseResult<Vec<BucketSummary>> {
        self.registry.default_client().list_buckets().await
    }

    /// Fetch one listing page.
    pub async fn list_objects_page(&self, bucket: &str, query: &ListQuery) -> BrowseResult<ObjectPage> {
        self.lister
            .list_page_delimited(
                bucket,
                &query.prefix,
                query.delimiter.as_deref(),
                query.max_keys,
                query.cursor.clone(),
            )
            .await
    }

    /// Fetch normalized metadata for one key.
    pub async fn fetch_metadata(&self, bucket: &str, key: &str) -> BrowseResult<ObjectMetadata> {
        self.fetcher.fetch(bucket, key).await
    }

    /// Search `bucket` under `prefix`, bounded by the configured timeout.
    pub async fn search(
        &self,
        bucket: &str,
        spec: &FilterSpec,
        prefix: &str,
    ) -> BrowseResult<Vec<SearchHit>> {
        let cancel = CancellationToken::new();
        let timeout = Duration::from_secs(self.settings.timeout_secs);

        tokio::select! {
            result = self.orchestrator.search(bucket, spec, prefix, &cancel) => result,
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                Err(BrowseError::Cancelled {
                    message: format!(
                        "Search of bucket {bucket} exceeded {}s",
                        self.settings.timeout_secs
                    ),
                })
            }
        }
    }

    /// Search with a caller-owned cancellation token and no timeout.
    pub async fn search_with_cancel(
        &self,
        bucket: &str,
        spec: &FilterSpec,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> BrowseResult<Vec<SearchHit>> {
        self.orchestrator.search(bucket, spec, prefix, cancel).await
    }

    /// One page of up to `limit` objects, with metadata for the first
    /// `table_metadata_limit` of them.
    ///
    /// The whole page is returned; rows past `table_metadata_limit` carry
    /// no `metadata` field.  A caller that wants only fully populated rows
    /// should pass `limit` no larger than `table_metadata_limit` (20 by
    /// default).  A failed metadata fetch yields a placeholder row rather
    /// than an error.
    pub async fn list_objects_with_metadata(
        &self,
        bucket: &str,
        prefix: &str,
        limit: i64,
    ) -> BrowseResult<TablePage> {
        let page = self.lister.list_page(bucket, prefix, limit, None).await?;
        let with_metadata = page.objects.len().min(self.settings.table_metadata_limit);

        let mut objects = page.objects.into_iter();
        let head: Vec<ObjectSummary> = objects.by_ref().take(with_metadata).collect();

        let mut rows: Vec<TableRow> = stream::iter(head)
            .map(|object| async move {
                let metadata = match self.fetcher.fetch(bucket, &object.key).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!("Failed to get metadata for {}/{}: {}", bucket, object.key, e);
                        ObjectMetadata::unavailable(&object, &e)
                    }
                };
                TableRow {
                    object,
                    metadata: Some(metadata),
                }
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        rows.extend(objects.map(|object| TableRow {
            object,
            metadata: None,
        }));

        Ok(TablePage {
            objects: rows,
            is_truncated: page.truncated,
            next_continuation_token: page.next_cursor,
            common_prefixes: page.common_prefixes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryCluster, MemoryObject};

    fn service(cluster: &Arc<MemoryCluster>, settings: SearchConfig) -> BrowserService {
        BrowserService::new(Arc::new(cluster.clone()), "us-east-1", settings)
    }

    #[tokio::test]
    async fn test_list_buckets() {
        let cluster = MemoryCluster::new();
        cluster.create_bucket("alpha", "us-east-1");
        cluster.create_bucket("beta", "eu-west-1");

        let buckets = service(&cluster, SearchConfig::default())
            .list_buckets()
            .await
            .unwrap();
        let names: Vec<_> = buckets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_list_page_with_cursor() {
        let cluster = MemoryCluster::new();
        cluster.create_bucket("b", "eu-west-1");
        for i in 0..5 {
            cluster.put_object("b", &format!("k{i}"), MemoryObject::new(1));
        }
        let svc = service(&cluster, SearchConfig::default());

        let mut query = ListQuery {
            max_keys: 3,
            ..Default::default()
        };
        let first = svc.list_objects_page("b", &query).await.unwrap();
        assert!(first.truncated);
        query.cursor = first.next_cursor.clone();
        let second = svc.list_objects_page("b", &query).await.unwrap();
        assert_eq!(second.objects.len(), 2);
        assert!(!second.truncated);
        assert_eq!(svc.regions().cached("b").as_deref(), Some("eu-west-1"));
    }

    #[tokio::test]
    async fn test_table_view_limits_metadata_and_keeps_failures() {
        let cluster = MemoryCluster::new();
        cluster.create_bucket("t", "us-east-1");
        cluster.put_object("t", "a", MemoryObject::new(1).with_content_type("text/plain"));
        cluster.put_object("t", "b", MemoryObject::new(2).with_storage_class("GLACIER").denied());
        cluster.put_object("t", "c", MemoryObject::new(3));
        cluster.put_object("t", "d", MemoryObject::new(4));

        let settings = SearchConfig {
            table_metadata_limit: 2,
            ..SearchConfig::default()
        };
        let page = service(&cluster, settings)
            .list_objects_with_metadata("t", "", 3)
            .await
            .unwrap();

        assert_eq!(page.objects.len(), 3);
        assert!(page.is_truncated);

        let a = page.objects[0].metadata.as_ref().unwrap();
        assert_eq!(a.content_type.as_deref(), Some("text/plain"));

        let b = page.objects[1].metadata.as_ref().unwrap();
        assert!(b.is_unavailable());
        assert_eq!(b.content_length, Some(2));
        assert_eq!(b.storage_class, "GLACIER");

        assert!(page.objects[2].metadata.is_none());
        assert_eq!(MemoryCluster::count(&cluster.counters().head_object), 2);
    }

    #[tokio::test]
    async fn test_search_timeout_reports_cancelled() {
        let cluster = MemoryCluster::new();
        cluster.create_bucket("b", "us-east-1");
        cluster.put_object("b", "k", MemoryObject::new(1));
        // Parked heads keep the search from finishing before the deadline.
        cluster.hold_heads();
        let settings = SearchConfig {
            timeout_secs: 0,
            ..SearchConfig::default()
        };

        let err = service(&cluster, settings)
            .search("b", &FilterSpec::new(), "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
        assert!(err.to_string().contains("exceeded 0s"));
        assert!(MemoryCluster::count(&cluster.counters().head_object) <= 1);
    }

    #[tokio::test]
    async fn test_search_with_external_cancel() {
        let cluster = MemoryCluster::new();
        cluster.create_bucket("b", "us-east-1");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service(&cluster, SearchConfig::default())
            .search_with_cancel("b", &FilterSpec::new(), "", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
    }
}
