//! Region-aware, paginated, metadata-filtered browsing.
//!
//! Leaf-first: [`region`] caches bucket regions and regional clients,
//! [`invoker`] retries wrong-region calls once, [`lister`] pages through a
//! bucket, [`fetcher`] loads per-object metadata, [`filter`] evaluates
//! filter specs, [`search`] ties them into a full-bucket scan and
//! [`service`] exposes the result to request handlers.

pub mod fetcher;
pub mod filter;
pub mod invoker;
pub mod lister;
pub mod region;
pub mod search;
pub mod service;

pub use fetcher::ObjectMetadata;
pub use filter::FilterSpec;
pub use search::SearchHit;
pub use service::{BrowserService, ListQuery, TablePage};
