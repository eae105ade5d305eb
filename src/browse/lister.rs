//! Cursor-driven enumeration of a bucket's keys.
//!
//! [`PaginatedLister::list_page`] fetches one page.  [`PageWalker`] turns a
//! sequence of those calls into a lazy, finite walk that always starts from
//! the first page and stops at the first page without a continuation.

use tracing::{debug, warn};

use super::invoker::RedirectAwareInvoker;
use crate::errors::BrowseResult;
use crate::storage::backend::{ListObjectsRequest, ObjectPage, PageCursor, MAX_PAGE_SIZE};

/// Clamp a caller-supplied page size to what the storage API accepts.
pub fn clamp_max_keys(max_keys: i64) -> i32 {
    max_keys.clamp(1, i64::from(MAX_PAGE_SIZE)) as i32
}

/// Lists bucket contents one page at a time.
#[derive(Debug, Clone)]
pub struct PaginatedLister {
    invoker: RedirectAwareInvoker,
}

impl PaginatedLister {
    /// Create a lister that routes through `invoker`.
    pub fn new(invoker: RedirectAwareInvoker) -> Self {
        Self { invoker }
    }

    /// Fetch one page of `bucket` under `prefix`.
    ///
    /// `cursor` must be the `next_cursor` of the preceding page for the same
    /// bucket and prefix, or `None` for the first page.
    pub async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i64,
        cursor: Option<PageCursor>,
    ) -> BrowseResult<ObjectPage> {
        self.list_page_delimited(bucket, prefix, None, max_keys, cursor)
            .await
    }

    /// Like [`list_page`](Self::list_page), rolling keys up at `delimiter`.
    pub async fn list_page_delimited(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        max_keys: i64,
        cursor: Option<PageCursor>,
    ) -> BrowseResult<ObjectPage> {
        let request = ListObjectsRequest {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            delimiter: delimiter.filter(|d| !d.is_empty()).map(str::to_string),
            max_keys: clamp_max_keys(max_keys),
            cursor,
        };

        let mut page = self
            .invoker
            .invoke(bucket, |client| {
                let request = request.clone();
                async move { client.list_objects(&request).await }
            })
            .await?;

        if page.truncated && page.next_cursor.is_none() {
            warn!(
                "Listing of bucket {} reported truncation without a cursor; treating as final",
                bucket
            );
            page.truncated = false;
        }
        if !page.truncated {
            page.next_cursor = None;
        }

        debug!(
            "Listed {} objects from bucket {} (truncated={})",
            page.objects.len(),
            bucket,
            page.truncated
        );
        Ok(page)
    }

    /// Walk every page of `bucket` under `prefix`, starting from the first.
    pub fn pages<'a>(&'a self, bucket: &'a str, prefix: &'a str, max_keys: i64) -> PageWalker<'a> {
        PageWalker {
            lister: self,
            bucket,
            prefix,
            max_keys,
            state: WalkState::Start,
        }
    }
}

#[derive(Debug)]
enum WalkState {
    Start,
    Continue(PageCursor),
    Done,
}

/// Lazy sequence of listing pages.
///
/// Yields pages until one reports no continuation, then `None` forever.
/// A failed page is yielded once as an error and ends the walk.
#[derive(Debug)]
pub struct PageWalker<'a> {
    lister: &'a PaginatedLister,
    bucket: &'a str,
    prefix: &'a str,
    max_keys: i64,
    state: WalkState,
}

impl PageWalker<'_> {
    /// Fetch the next page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Option<BrowseResult<ObjectPage>> {
        let cursor = match std::mem::replace(&mut self.state, WalkState::Done) {
            WalkState::Start => None,
            WalkState::Continue(cursor) => Some(cursor),
            WalkState::Done => return None,
        };

        match self
            .lister
            .list_page(self.bucket, self.prefix, self.max_keys, cursor)
            .await
        {
            Ok(page) => {
                if let Some(next) = page.next_cursor.clone() {
                    self.state = WalkState::Continue(next);
                }
                Some(Ok(page))
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// Whether the walk has finished.
    pub fn is_done(&self) -> bool {
        matches!(self.state, WalkState::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browse::region::{ClientRegistry, RegionCache};
    use crate::storage::memory::{MemoryCluster, MemoryObject};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn lister(cluster: &Arc<MemoryCluster>) -> PaginatedLister {
        PaginatedLister::new(RedirectAwareInvoker::new(
            Arc::new(ClientRegistry::new(Arc::new(cluster.clone()), "us-east-1")),
            Arc::new(RegionCache::new("us-east-1")),
        ))
    }

    fn bucket_with(cluster: &Arc<MemoryCluster>, bucket: &str, region: &str, count: usize) {
        cluster.create_bucket(bucket, region);
        for i in 0..count {
            cluster.put_object(bucket, &format!("obj-{i:04}"), MemoryObject::new(i as u64));
        }
    }

    #[test]
    fn test_clamp_max_keys() {
        assert_eq!(clamp_max_keys(0), 1);
        assert_eq!(clamp_max_keys(-5), 1);
        assert_eq!(clamp_max_keys(50), 50);
        assert_eq!(clamp_max_keys(5000), 1000);
    }

    #[tokio::test]
    async fn test_walk_yields_ceil_k_over_p_pages() {
        for (k, p) in [(10usize, 3i64), (9, 3), (1, 1000), (0, 10), (2500, 1000)] {
            let cluster = MemoryCluster::new();
            bucket_with(&cluster, "b", "us-east-1", k);
            let lister = lister(&cluster);

            let mut walker = lister.pages("b", "", p);
            let mut pages = 0;
            let mut keys = HashSet::new();
            while let Some(page) = walker.next_page().await {
                let page = page.unwrap();
                pages += 1;
                for obj in page.objects {
                    assert!(keys.insert(obj.key));
                }
            }

            let expected_pages = if k == 0 { 1 } else { k.div_ceil(p as usize) };
            assert_eq!(pages, expected_pages, "k={k} p={p}");
            assert_eq!(keys.len(), k);
            assert!(walker.is_done());
            assert!(walker.next_page().await.is_none());
        }
    }

    #[tokio::test]
    async fn test_prefix_is_literal() {
        let cluster = MemoryCluster::new();
        cluster.create_bucket("b", "us-east-1");
        for key in ["logs/a", "logs/b", "logsX", "img/a", "l*gs/c"] {
            cluster.put_object("b", key, MemoryObject::new(1));
        }
        let lister = lister(&cluster);

        let page = lister.list_page("b", "logs/", 100, None).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["logs/a", "logs/b"]);

        let page = lister.list_page("b", "l*", 100, None).await.unwrap();
        assert_eq!(page.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_walk_across_regions() {
        let cluster = MemoryCluster::new();
        bucket_with(&cluster, "far", "ap-southeast-2", 7);
        let lister = lister(&cluster);

        let mut walker = lister.pages("far", "", 3);
        let mut total = 0;
        while let Some(page) = walker.next_page().await {
            total += page.unwrap().objects.len();
        }
        assert_eq!(total, 7);
        assert_eq!(MemoryCluster::count(&cluster.counters().location), 1);
    }

    #[tokio::test]
    async fn test_error_ends_walk() {
        let cluster = MemoryCluster::new();
        let lister = lister(&cluster);

        let mut walker = lister.pages("missing", "", 10);
        let first = walker.next_page().await.unwrap();
        assert_eq!(first.unwrap_err().kind(), "NotFound");
        assert!(walker.next_page().await.is_none());
    }

    #[tokio::test]
    async fn test_fresh_walker_restarts_from_first_page() {
        let cluster = MemoryCluster::new();
        bucket_with(&cluster, "b", "us-east-1", 5);
        let lister = lister(&cluster);

        let mut first = lister.pages("b", "", 2);
        let page = first.next_page().await.unwrap().unwrap();
        assert_eq!(page.objects[0].key, "obj-0000");

        let mut second = lister.pages("b", "", 2);
        let page = second.next_page().await.unwrap().unwrap();
        assert_eq!(page.objects[0].key, "obj-0000");
    }
}
