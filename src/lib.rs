//! bucketlens library -- region-aware browsing and metadata search over S3
//! buckets.
//!
//! The crate is split into a storage layer (the S3 API boundary and an
//! in-memory stand-in), the browse core (region cache, redirect handling,
//! pagination, metadata fetch, filtering and search) and a thin axum HTTP
//! surface over it.

use std::sync::Arc;

pub mod browse;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod storage;

use crate::browse::BrowserService;
use crate::config::Config;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Region-aware browse service.
    pub service: Arc<BrowserService>,
}
