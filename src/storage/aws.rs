//! AWS S3 storage client.
//!
//! Wraps one `aws_sdk_s3::Client` per region.  All clients share a single
//! loaded [`SdkConfig`], so credentials are resolved once via the standard
//! AWS credential chain (env vars, `~/.aws/credentials`, IAM role, etc.)
//! and only the region differs between them.
//!
//! SDK failures are classified into [`BrowseError`] kinds here; a request
//! that reached the wrong regional endpoint surfaces as
//! [`BrowseError::RegionMismatch`].

use std::collections::BTreeMap;
use std::sync::Arc;

use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::DateTime as AwsDateTime;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::backend::{
    BucketSummary, ClientFactory, ListObjectsRequest, ObjectHead, ObjectPage, ObjectSummary,
    PageCursor, StorageApi, StorageFuture, DEFAULT_STORAGE_CLASS,
};
use crate::errors::BrowseError;
use crate::metrics::record_storage_operation;

/// Builds [`AwsStorageApi`] clients that share one SDK configuration.
pub struct AwsClientFactory {
    sdk_config: SdkConfig,
    force_path_style: bool,
}

impl AwsClientFactory {
    /// Load the shared SDK configuration.
    ///
    /// Credentials come from the default credential chain; the core never
    /// handles credential material itself.  `endpoint_url` points the
    /// clients at an S3-compatible service such as MinIO or LocalStack.
    pub async fn load(endpoint_url: Option<String>, force_path_style: bool) -> Self {
        let mut config_loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(ref endpoint) = endpoint_url {
            config_loader = config_loader.endpoint_url(endpoint);
        }

        let sdk_config = config_loader.load().await;

        info!(
            "AWS client factory initialized: endpoint={} path_style={}",
            endpoint_url.as_deref().unwrap_or("<default>"),
            force_path_style
        );

        Self::from_sdk_config(sdk_config, force_path_style)
    }

    /// Build a factory from an already loaded SDK configuration.
    pub fn from_sdk_config(sdk_config: SdkConfig, force_path_style: bool) -> Self {
        Self {
            sdk_config,
            force_path_style,
        }
    }
}

impl ClientFactory for AwsClientFactory {
    fn create(&self, region: &str) -> Arc<dyn StorageApi> {
        let s3_config = aws_sdk_s3::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .force_path_style(self.force_path_style)
            .build();

        debug!("Created S3 client for region {}", region);

        Arc::new(AwsStorageApi {
            client: Client::from_conf(s3_config),
            region: region.to_string(),
        })
    }
}

/// S3 client bound to a single region.
pub struct AwsStorageApi {
    client: Client,
    region: String,
}

impl StorageApi for AwsStorageApi {
    fn region(&self) -> &str {
        &self.region
    }

    fn list_buckets(&self) -> StorageFuture<'_, Vec<BucketSummary>> {
        Box::pin(async move {
            debug!("AWS list_buckets: region={}", self.region);

            let mut buckets = Vec::new();
            let mut continuation_token: Option<String> = None;
            loop {
                let resp = self
                    .client
                    .list_buckets()
                    .set_continuation_token(continuation_token.take())
                    .send()
                    .await
                    .map_err(|e| self.classify_sdk_error("list_buckets", "", None, e))?;

                buckets.extend(resp.buckets().iter().filter_map(|b| {
                    b.name().map(|name| BucketSummary {
                        name: name.to_string(),
                        creation_date: b.creation_date().and_then(to_utc),
                    })
                }));

                match resp.continuation_token() {
                    Some(token) if !token.is_empty() => {
                        continuation_token = Some(token.to_string());
                    }
                    _ => break,
                }
            }

            record_storage_operation("list_buckets", "ok");
            Ok(buckets)
        })
    }

    fn bucket_location(&self, bucket: &str) -> StorageFuture<'_, Option<String>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("AWS get_bucket_location: bucket={} region={}", bucket, self.region);

            let resp = self
                .client
                .get_bucket_location()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| self.classify_sdk_error("get_bucket_location", &bucket, None, e))?;

            record_storage_operation("get_bucket_location", "ok");
            Ok(resp
                .location_constraint()
                .map(|c| c.as_str().to_string())
                .filter(|c| !c.is_empty()))
        })
    }

    fn list_objects(&self, request: &ListObjectsRequest) -> StorageFuture<'_, ObjectPage> {
        let request = request.clone();
        Box::pin(async move {
            debug!(
                "AWS list_objects_v2: bucket={} prefix='{}' max_keys={} region={}",
                request.bucket, request.prefix, request.max_keys, self.region
            );

            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&request.bucket)
                .max_keys(request.max_keys)
                .set_delimiter(request.delimiter.clone())
                .set_continuation_token(request.cursor.as_ref().map(|c| c.as_str().to_string()));

            if !request.prefix.is_empty() {
                req = req.prefix(&request.prefix);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| {
                    self.classify_sdk_error("list_objects_v2", &request.bucket, None, e)
                })?;

            let objects = resp
                .contents()
                .iter()
                .filter_map(|obj| {
                    obj.key().map(|key| ObjectSummary {
                        key: key.to_string(),
                        size: obj.size().unwrap_or(0).max(0) as u64,
                        last_modified: obj.last_modified().and_then(to_utc),
                        storage_class: obj
                            .storage_class()
                            .map(|c| c.as_str().to_string())
                            .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.to_string()),
                        etag: obj.e_tag().map(str::to_string),
                    })
                })
                .collect();

            let common_prefixes = resp
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix().map(str::to_string))
                .collect();

            record_storage_operation("list_objects_v2", "ok");
            Ok(ObjectPage {
                objects,
                truncated: resp.is_truncated() == Some(true),
                next_cursor: resp.next_continuation_token().map(PageCursor::new),
                common_prefixes,
            })
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> StorageFuture<'_, ObjectHead> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            debug!(
                "AWS head_object: bucket={} key={} region={}",
                bucket, key, self.region
            );

            let resp = self
                .client
                .head_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| self.classify_sdk_error("head_object", &bucket, Some(&key), e))?;

            let user_metadata: BTreeMap<String, String> = resp
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();

            record_storage_operation("head_object", "ok");
            Ok(ObjectHead {
                content_type: resp.content_type().map(str::to_string),
                content_length: resp.content_length().map(|l| l.max(0) as u64),
                last_modified: resp.last_modified().and_then(to_utc),
                etag: resp.e_tag().map(str::to_string),
                storage_class: resp.storage_class().map(|c| c.as_str().to_string()),
                cache_control: resp.cache_control().map(str::to_string),
                content_encoding: resp.content_encoding().map(str::to_string),
                expires: resp.expires_string().map(str::to_string),
                website_redirect_location: resp.website_redirect_location().map(str::to_string),
                server_side_encryption: resp
                    .server_side_encryption()
                    .map(|s| s.as_str().to_string()),
                user_metadata,
                // HeadObject does not carry the tag set.
                tags: Vec::new(),
            })
        })
    }
}

// -- Conversions --------------------------------------------------------------

/// Convert an SDK timestamp into a chrono UTC timestamp.
fn to_utc(dt: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

// -- Error classification -----------------------------------------------------

/// Coarse failure class derived from an S3 status code and error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RegionMismatch,
    NotFound,
    AccessDenied,
    Transport,
    Other,
}

/// Classify a service error response.
///
/// The error code wins when present.  HEAD responses carry no body, so for
/// them only the status code is available: a wrong-region HEAD comes back
/// as a bare 301.
pub fn classify_status(status: u16, code: Option<&str>) -> FailureClass {
    match code {
        Some(
            "PermanentRedirect"
            | "AuthorizationHeaderMalformed"
            | "IllegalLocationConstraintException",
        ) => return FailureClass::RegionMismatch,
        Some("NoSuchKey" | "NoSuchBucket" | "NotFound") => return FailureClass::NotFound,
        Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "Forbidden") => {
            return FailureClass::AccessDenied
        }
        Some("RequestTimeout" | "SlowDown" | "ServiceUnavailable" | "InternalError") => {
            return FailureClass::Transport
        }
        _ => {}
    }

    match status {
        301 | 307 => FailureClass::RegionMismatch,
        404 => FailureClass::NotFound,
        401 | 403 => FailureClass::AccessDenied,
        408 | 429 | 500..=599 => FailureClass::Transport,
        _ => FailureClass::Other,
    }
}

/// Response header S3 sets to the region that owns the bucket.
const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

/// Classify a service error response, taking the bucket-region header into
/// account.
///
/// S3 may answer a misrouted HEAD with a bare 400 that has neither a body
/// nor a redirect status.  The `x-amz-bucket-region` header still names
/// the owning region; when it differs from the client's region the request
/// was misrouted regardless of status and code.
pub fn classify_response(
    status: u16,
    code: Option<&str>,
    bucket_region: Option<&str>,
    client_region: &str,
) -> FailureClass {
    match bucket_region {
        Some(region) if !region.is_empty() && region != client_region => {
            FailureClass::RegionMismatch
        }
        _ => classify_status(status, code),
    }
}

/// Build the [`BrowseError`] for a classified failure.
///
/// An empty `bucket` means the operation was not addressed to a bucket
/// (`ListBuckets`), so a not-found answer cannot name one and is reported
/// as a transport failure instead.
fn error_for_class(
    class: FailureClass,
    code: Option<&str>,
    bucket: &str,
    key: Option<&str>,
    message: String,
) -> BrowseError {
    match class {
        FailureClass::RegionMismatch => BrowseError::RegionMismatch {
            bucket: bucket.to_string(),
            message,
        },
        FailureClass::NotFound if bucket.is_empty() => BrowseError::Transport { message },
        FailureClass::NotFound => match key {
            Some(key) if code != Some("NoSuchBucket") => BrowseError::no_such_key(bucket, key),
            _ => BrowseError::no_such_bucket(bucket),
        },
        FailureClass::AccessDenied => BrowseError::AccessDenied { message },
        FailureClass::Transport => BrowseError::Transport { message },
        FailureClass::Other => BrowseError::Internal(anyhow::anyhow!(message)),
    }
}

impl AwsStorageApi {
    /// Map an AWS SDK error into a [`BrowseError`] with context.
    fn classify_sdk_error<E>(
        &self,
        operation: &'static str,
        bucket: &str,
        key: Option<&str>,
        err: SdkError<E, HttpResponse>,
    ) -> BrowseError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let (class, code) = match &err {
            SdkError::ServiceError(service) => {
                let code = service.err().code();
                let class = classify_response(
                    service.raw().status().as_u16(),
                    code,
                    service.raw().headers().get(BUCKET_REGION_HEADER),
                    &self.region,
                );
                (class, code.map(str::to_string))
            }
            SdkError::ResponseError(response) => {
                let class = classify_response(
                    response.raw().status().as_u16(),
                    None,
                    response.raw().headers().get(BUCKET_REGION_HEADER),
                    &self.region,
                );
                // An unreadable response is a transport failure unless it
                // points at another region.
                let class = match class {
                    FailureClass::RegionMismatch => class,
                    _ => FailureClass::Transport,
                };
                (class, None)
            }
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
                (FailureClass::Transport, None)
            }
            _ => (FailureClass::Other, None),
        };
        let message = format!("AWS S3 {operation}: {}", DisplayErrorContext(&err));

        if class == FailureClass::RegionMismatch {
            debug!(
                "{} on bucket {} misrouted to region {}",
                operation, bucket, self.region
            );
        }

        let error = error_for_class(class, code.as_deref(), bucket, key, message);
        record_storage_operation(operation, error.kind());
        error
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_permanent_redirect_code() {
        assert_eq!(
            classify_status(301, Some("PermanentRedirect")),
            FailureClass::RegionMismatch
        );
        assert_eq!(
            classify_status(400, Some("AuthorizationHeaderMalformed")),
            FailureClass::RegionMismatch
        );
    }

    #[test]
    fn test_classify_bare_head_redirect() {
        assert_eq!(classify_status(301, None), FailureClass::RegionMismatch);
    }

    #[test]
    fn test_classify_not_found() {
        assert_eq!(classify_status(404, None), FailureClass::NotFound);
        assert_eq!(
            classify_status(404, Some("NoSuchBucket")),
            FailureClass::NotFound
        );
    }

    #[test]
    fn test_classify_access_denied() {
        assert_eq!(classify_status(403, None), FailureClass::AccessDenied);
        assert_eq!(
            classify_status(403, Some("AccessDenied")),
            FailureClass::AccessDenied
        );
    }

    #[test]
    fn test_classify_transport() {
        assert_eq!(classify_status(503, None), FailureClass::Transport);
        assert_eq!(
            classify_status(400, Some("RequestTimeout")),
            FailureClass::Transport
        );
    }

    #[test]
    fn test_classify_unknown_is_other() {
        assert_eq!(
            classify_status(400, Some("InvalidArgument")),
            FailureClass::Other
        );
    }

    #[test]
    fn test_bare_400_with_foreign_region_header_is_mismatch() {
        assert_eq!(
            classify_response(400, None, Some("eu-west-1"), "us-east-1"),
            FailureClass::RegionMismatch
        );
        assert_eq!(
            classify_response(403, Some("AccessDenied"), Some("ap-south-1"), "us-east-1"),
            FailureClass::RegionMismatch
        );
    }

    #[test]
    fn test_matching_region_header_falls_back_to_status() {
        assert_eq!(
            classify_response(400, None, Some("us-east-1"), "us-east-1"),
            FailureClass::Other
        );
        assert_eq!(
            classify_response(404, None, Some("us-east-1"), "us-east-1"),
            FailureClass::NotFound
        );
        assert_eq!(
            classify_response(404, None, Some(""), "us-east-1"),
            FailureClass::NotFound
        );
        assert_eq!(
            classify_response(301, None, None, "us-east-1"),
            FailureClass::RegionMismatch
        );
    }

    #[test]
    fn test_not_found_without_bucket_is_transport() {
        let err = error_for_class(
            FailureClass::NotFound,
            None,
            "",
            None,
            "AWS S3 list_buckets: not found".into(),
        );
        assert_eq!(err.kind(), "TransportError");
        assert!(!err.to_string().contains("bucket ''"));
    }

    #[test]
    fn test_not_found_maps_to_bucket_or_key() {
        let key = error_for_class(
            FailureClass::NotFound,
            None,
            "photos",
            Some("a.jpg"),
            String::new(),
        );
        assert!(key.to_string().contains("key 'a.jpg'"));

        let bucket = error_for_class(
            FailureClass::NotFound,
            Some("NoSuchBucket"),
            "photos",
            Some("a.jpg"),
            String::new(),
        );
        assert!(bucket.to_string().contains("bucket 'photos' does not exist"));
    }

    #[test]
    fn test_to_utc_conversion() {
        let dt = AwsDateTime::from_secs(1_700_000_000);
        let utc = to_utc(&dt).unwrap();
        assert_eq!(utc.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_factory_binds_region() {
        let sdk_config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        let factory = AwsClientFactory::from_sdk_config(sdk_config, false);

        let client = factory.create("eu-west-1");
        assert_eq!(client.region(), "eu-west-1");
    }
}
