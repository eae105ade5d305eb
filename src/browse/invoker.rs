//! Redirect-aware execution of storage operations.
//!
//! Every bucket-scoped call first goes to the default-region client.  If
//! that client answers with a wrong-region signal, the bucket's real
//! region is resolved (and cached) and the call is repeated exactly once
//! against that region's client.  Nothing else is retried.

use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use super::region::{ClientRegistry, RegionCache};
use crate::errors::BrowseResult;
use crate::metrics::REGION_REDIRECTS_TOTAL;
use crate::storage::backend::StorageApi;

/// Which client the next attempt runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// First try, against the default-region client.
    Default,
    /// The single retry, against the bucket's resolved region.
    Regional(String),
}

impl Attempt {
    /// Whether a region mismatch on this attempt may still be retried.
    pub fn may_redirect(&self) -> bool {
        matches!(self, Attempt::Default)
    }
}

/// Runs storage operations, recovering once from region mismatches.
#[derive(Debug, Clone)]
pub struct RedirectAwareInvoker {
    registry: Arc<ClientRegistry>,
    regions: Arc<RegionCache>,
}

impl RedirectAwareInvoker {
    /// Create an invoker over shared caches.
    pub fn new(registry: Arc<ClientRegistry>, regions: Arc<RegionCache>) -> Self {
        Self { registry, regions }
    }

    /// The client registry this invoker routes through.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Run `operation` for `bucket`.
    ///
    /// `operation` is called at most twice: once with the default client
    /// and, only after a region mismatch, once with the bucket's regional
    /// client.  Any error of the second attempt, including another
    /// mismatch, is returned as is.
    pub async fn invoke<T, F, Fut>(&self, bucket: &str, operation: F) -> BrowseResult<T>
    where
        F: Fn(Arc<dyn StorageApi>) -> Fut,
        Fut: Future<Output = BrowseResult<T>>,
    {
        let mut attempt = Attempt::Default;
        loop {
            let client = match &attempt {
                Attempt::Default => self.registry.default_client(),
                Attempt::Regional(region) => self.registry.get_client(region),
            };

            match operation(client).await {
                Err(e) if e.is_region_mismatch() && attempt.may_redirect() => {
                    let default_client = self.registry.default_client();
                    let region = self.regions.resolve(bucket, default_client.as_ref()).await;
                    counter!(REGION_REDIRECTS_TOTAL).increment(1);
                    debug!(
                        "Redirecting bucket {} from {} to {}",
                        bucket,
                        self.registry.default_region(),
                        region
                    );
                    attempt = Attempt::Regional(region);
                }
                other => return other,
            }
        }
    }
}
