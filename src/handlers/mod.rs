//! HTTP handlers for the `/api/s3` routes.
//!
//! Each handler takes already-extracted inputs from the router, calls the
//! [`crate::browse::BrowserService`] and serializes the result as JSON.

pub mod bucket;
pub mod object;
pub mod search;
