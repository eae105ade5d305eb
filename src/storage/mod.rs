//! Storage API clients.
//!
//! The [`backend::StorageApi`] trait abstracts over the remote object store
//! a regional client talks to.  Implementations include the AWS S3 SDK and
//! an in-memory multi-region cluster.

pub mod aws;
pub mod backend;
pub mod memory;
