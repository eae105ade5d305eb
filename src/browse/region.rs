//! Bucket-to-region resolution and the per-region client pool.
//!
//! Both maps live for the lifetime of the owning service and are never
//! pruned: a bucket's region does not move, and a region's client is
//! reusable forever.  Writers racing on the same key compute the same
//! value, so whichever insert lands last is correct.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::metrics::REGION_LOOKUPS_TOTAL;
use crate::storage::backend::{ClientFactory, StorageApi};

/// Canonical name of the region that reports an empty location constraint.
pub const LEGACY_DEFAULT_REGION: &str = "us-east-1";

/// Map a raw location constraint to a canonical region name.
///
/// The API reports nothing for the historical default region and the
/// legacy alias `EU` for the first European region.
pub fn normalize_location(location: Option<&str>) -> String {
    match location {
        None | Some("") => LEGACY_DEFAULT_REGION.to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}

/// Memoized bucket → region answers.
///
/// Only successful lookups are cached; a failed lookup falls back to the
/// configured region for that one call and is retried next time.
#[derive(Debug)]
pub struct RegionCache {
    entries: DashMap<String, String>,
    fallback_region: String,
}

impl RegionCache {
    /// Create an empty cache that falls back to `fallback_region`.
    pub fn new(fallback_region: impl Into<String>) -> Self {
        Self {
            entries: DashMap::new(),
            fallback_region: fallback_region.into(),
        }
    }

    /// Cached region for `bucket`, without querying.
    pub fn cached(&self, bucket: &str) -> Option<String> {
        self.entries.get(bucket).map(|r| r.value().clone())
    }

    /// Number of cached buckets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the region that owns `bucket`.
    ///
    /// Uses the cache when possible, otherwise asks `client` for the
    /// bucket's location.
    pub async fn resolve(&self, bucket: &str, client: &dyn StorageApi) -> String {
        if let Some(region) = self.cached(bucket) {
            debug!("Region cache hit: bucket={} region={}", bucket, region);
            return region;
        }

        match client.bucket_location(bucket).await {
            Ok(location) => {
                let region = normalize_location(location.as_deref());
                counter!(REGION_LOOKUPS_TOTAL, "outcome" => "resolved").increment(1);
                info!("Resolved bucket {} to region {}", bucket, region);
                self.entries.insert(bucket.to_string(), region.clone());
                region
            }
            Err(e) => {
                counter!(REGION_LOOKUPS_TOTAL, "outcome" => "fallback").increment(1);
                warn!(
                    "Could not resolve region of bucket {} ({}); using {}",
                    bucket, e, self.fallback_region
                );
                self.fallback_region.clone()
            }
        }
    }
}

/// One storage client per region, created on first use.
pub struct ClientRegistry {
    clients: DashMap<String, Arc<dyn StorageApi>>,
    factory: Arc<dyn ClientFactory>,
    default_region: String,
}

impl ClientRegistry {
    /// Create a registry whose default client targets `default_region`.
    pub fn new(factory: Arc<dyn ClientFactory>, default_region: impl Into<String>) -> Self {
        Self {
            clients: DashMap::new(),
            factory,
            default_region: default_region.into(),
        }
    }

    /// Region of the default client.
    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    /// Client for the default region.
    pub fn default_client(&self) -> Arc<dyn StorageApi> {
        self.get_client(&self.default_region)
    }

    /// Client for `region`, created and cached on first request.
    ///
    /// Repeated calls with the same region return the same `Arc`.
    pub fn get_client(&self, region: &str) -> Arc<dyn StorageApi> {
        if let Some(client) = self.clients.get(region) {
            return Arc::clone(client.value());
        }
        self.clients
            .entry(region.to_string())
            .or_insert_with(|| self.factory.create(region))
            .value()
            .clone()
    }

    /// Number of regional clients built so far.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client has been built yet.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("default_region", &self.default_region)
            .field("regions", &self.clients.len())
            .finish()
    }
}
