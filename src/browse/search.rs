//! Full-bucket metadata search.
//!
//! Pages are listed one after another; within a page, metadata fetches run
//! concurrently up to a fixed limit.  An object whose metadata cannot be
//! fetched is logged and left out of the results, so one bad object never
//! aborts the scan.  Only a listing failure fails the search.

use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fetcher::{MetadataFetcher, ObjectMetadata};
use super::filter::{matches_all, FilterSpec};
use super::lister::PaginatedLister;
use crate::errors::{BrowseError, BrowseResult};
use crate::metrics::SEARCH_SKIPPED_TOTAL;
use crate::storage::backend::{ObjectSummary, MAX_PAGE_SIZE};

/// A matching object: its listing entry plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub object: ObjectSummary,
    pub metadata: ObjectMetadata,
}

/// Drives lister, fetcher and filter over a whole bucket.
#[derive(Debug, Clone)]
pub struct SearchOrchestrator {
    lister: PaginatedLister,
    fetcher: MetadataFetcher,
    concurrency: usize,
}

impl SearchOrchestrator {
    /// Create an orchestrator fetching at most `concurrency` objects at once.
    pub fn new(lister: PaginatedLister, fetcher: MetadataFetcher, concurrency: usize) -> Self {
        Self {
            lister,
            fetcher,
            concurrency: concurrency.max(1),
        }
    }

    /// Return every object under `prefix` in `bucket` matching `spec`, in
    /// listing order.
    ///
    /// Cancelling `cancel` stops the page loop and drops in-flight fetches;
    /// the search then fails with [`BrowseError::Cancelled`].
    pub async fn search(
        &self,
        bucket: &str,
        spec: &FilterSpec,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> BrowseResult<Vec<SearchHit>> {
        let filters = spec.parse();
        let mut walker = self.lister.pages(bucket, prefix, i64::from(MAX_PAGE_SIZE));
        let mut hits = Vec::new();
        let mut scanned = 0usize;
        let mut skipped = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(bucket)),
                next = walker.next_page() => next,
            };
            let Some(page) = next else { break };
            let page = page?;
            scanned += page.objects.len();

            let fetches = stream::iter(page.objects)
                .map(|object| async move {
                    let result = self.fetcher.fetch(bucket, &object.key).await;
                    (object, result)
                })
                .buffered(self.concurrency)
                .collect::<Vec<_>>();

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(bucket)),
                fetched = fetches => fetched,
            };

            for (object, result) in fetched {
                match result {
                    Ok(metadata) => {
                        if matches_all(&metadata, &filters) {
                            hits.push(SearchHit { object, metadata });
                        }
                    }
                    Err(e) => {
                        skipped += 1;
                        counter!(SEARCH_SKIPPED_TOTAL).increment(1);
                        warn!("Skipping object {}/{}: {}", bucket, object.key, e);
                    }
                }
            }
            debug!(
                "Search of bucket {}: scanned={} matched={} so far",
                bucket,
                scanned,
                hits.len()
            );
        }

        info!(
            "Search of bucket {} prefix='{}' done: scanned={} matched={} skipped={}",
            bucket,
            prefix,
            scanned,
            hits.len(),
            skipped
        );
        Ok(hits)
    }
}

fn cancelled(bucket: &str) -> BrowseError {
    BrowseError::Cancelled {
        message: format!("Search of bucket {bucket} was cancelled"),
    }
}
