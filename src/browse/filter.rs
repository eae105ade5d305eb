//! Metadata filter predicates.
//!
//! A [`FilterSpec`] is a flat name → value map supplied per search request.
//! It is parsed into typed [`Filter`]s; every parsed filter must hold for an
//! object to match.  Unknown names and malformed values are dropped rather
//! than rejected.
//!
//! An object that lacks the field a filter refers to never matches that
//! filter.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use tracing::debug;

use super::fetcher::ObjectMetadata;

/// Raw filter map as received from the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec(BTreeMap<String, String>);

impl FilterSpec {
    /// An empty spec, which matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one entry.
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    /// Whether no entries are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the recognized entries into typed filters.
    pub fn parse(&self) -> Vec<Filter> {
        self.0
            .iter()
            .filter_map(|(name, value)| match Filter::parse(name, value) {
                Ok(filter) => filter,
                Err(reason) => {
                    debug!("Ignoring filter {}={:?}: {}", name, value, reason);
                    None
                }
            })
            .collect()
    }
}

impl FromIterator<(String, String)> for FilterSpec {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        FilterSpec(iter.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for FilterSpec {
    /// Accepts a JSON object whose values are strings, numbers or booleans.
    /// Nulls are dropped; other values are kept in their JSON text form and
    /// end up inert.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .filter_map(|(name, value)| {
                let text = match value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                Some((name, text))
            })
            .collect())
    }
}

/// One recognized filter predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Case-insensitive substring of the content type.
    ContentType(String),
    /// Inclusive lower bound on content length.
    MinSize(u64),
    /// Inclusive upper bound on content length.
    MaxSize(u64),
    /// Exact, case-sensitive storage class.
    StorageClass(String),
    /// User metadata `key` exists and its value contains `value`,
    /// case-insensitively.
    CustomMetadata { key: String, value: String },
}

impl Filter {
    /// Parse one entry.  `Ok(None)` means the name is not a filter.
    pub fn parse(name: &str, value: &str) -> Result<Option<Filter>, String> {
        let filter = match name {
            "contentType" => Filter::ContentType(value.to_lowercase()),
            "minSize" => Filter::MinSize(parse_size(value)?),
            "maxSize" => Filter::MaxSize(parse_size(value)?),
            "storageClass" => Filter::StorageClass(value.to_string()),
            "customMetadata" => {
                let (key, wanted) = value
                    .split_once('=')
                    .ok_or_else(|| "expected key=value".to_string())?;
                if key.is_empty() {
                    return Err("empty metadata key".to_string());
                }
                Filter::CustomMetadata {
                    key: key.to_string(),
                    value: wanted.to_lowercase(),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(filter))
    }

    /// Evaluate this predicate against `metadata`.
    pub fn matches(&self, metadata: &ObjectMetadata) -> bool {
        match self {
            Filter::ContentType(wanted) => metadata
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.to_lowercase().contains(wanted.as_str())),
            Filter::MinSize(min) => metadata.content_length.is_some_and(|len| len >= *min),
            Filter::MaxSize(max) => metadata.content_length.is_some_and(|len| len <= *max),
            Filter::StorageClass(wanted) => metadata.storage_class == *wanted,
            Filter::CustomMetadata { key, value } => metadata
                .custom_metadata
                .get(key)
                .is_some_and(|v| v.to_lowercase().contains(value.as_str())),
        }
    }
}

fn parse_size(value: &str) -> Result<u64, String> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("not a byte count: {e}"))
}

/// Whether `metadata` satisfies every recognized entry of `spec`.
pub fn matches(metadata: &ObjectMetadata, spec: &FilterSpec) -> bool {
    matches_all(metadata, &spec.parse())
}

/// Whether `metadata` satisfies every filter in `filters`.
pub fn matches_all(metadata: &ObjectMetadata, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::ObjectHead;

    fn meta(content_type: Option<&str>, len: Option<u64>) -> ObjectMetadata {
        ObjectMetadata::from_head(ObjectHead {
            content_type: content_type.map(str::to_string),
            content_length: len,
            ..Default::default()
        })
    }

    #[test]
    fn test_empty_spec_matches_everything() {
        let spec = FilterSpec::new();
        assert!(matches(&meta(None, None), &spec));
        assert!(matches(&meta(Some("x/y"), Some(0)), &spec));
    }

    #[test]
    fn test_min_equals_max_matches_exact_size_only() {
        let spec = FilterSpec::new().with("minSize", "500").with("maxSize", "500");
        assert!(matches(&meta(None, Some(500)), &spec));
        assert!(!matches(&meta(None, Some(499)), &spec));
        assert!(!matches(&meta(None, Some(501)), &spec));
    }

    #[test]
    fn test_content_type_substring_case_insensitive() {
        let spec = FilterSpec::new().with("contentType", "plain");
        assert!(matches(&meta(Some("text/plain"), None), &spec));
        assert!(!matches(&meta(Some("application/json"), None), &spec));

        let spec = FilterSpec::new().with("contentType", "TEXT/");
        assert!(matches(&meta(Some("text/html; charset=utf-8"), None), &spec));
    }

    #[test]
    fn test_absent_fields_never_match() {
        let spec = FilterSpec::new().with("contentType", "");
        assert!(!matches(&meta(None, Some(1)), &spec));
        assert!(matches(&meta(Some("anything"), Some(1)), &spec));

        let spec = FilterSpec::new().with("minSize", "0");
        assert!(!matches(&meta(None, None), &spec));
    }

    #[test]
    fn test_storage_class_exact() {
        let mut m = meta(None, None);
        m.storage_class = "GLACIER".to_string();
        assert!(matches(&m, &FilterSpec::new().with("storageClass", "GLACIER")));
        assert!(!matches(&m, &FilterSpec::new().with("storageClass", "glacier")));
        assert!(!matches(&m, &FilterSpec::new().with("storageClass", "GLAC")));
    }

    #[test]
    fn test_custom_metadata() {
        let mut m = meta(None, None);
        m.custom_metadata.insert("Project".into(), "Apollo-11".into());

        let hit = FilterSpec::new().with("customMetadata", "Project=apollo");
        assert!(matches(&m, &hit));

        let wrong_case_key = FilterSpec::new().with("customMetadata", "project=apollo");
        assert!(!matches(&m, &wrong_case_key));

        let key_only = FilterSpec::new().with("customMetadata", "Project=");
        assert!(matches(&m, &key_only));

        let value_with_equals = FilterSpec::new().with("customMetadata", "Project=a=b");
        assert!(!matches(&m, &value_with_equals));
    }

    #[test]
    fn test_malformed_entries_are_inert() {
        let m = meta(Some("text/plain"), Some(10));
        for (name, value) in [
            ("customMetadata", "no-equals-sign"),
            ("customMetadata", "=value"),
            ("minSize", "lots"),
            ("maxSize", ""),
            ("colour", "blue"),
        ] {
            let spec = FilterSpec::new().with(name, value);
            assert!(spec.parse().is_empty(), "{name}={value}");
            assert!(matches(&m, &spec));
        }
    }

    #[test]
    fn test_filters_are_anded() {
        let m = meta(Some("image/png"), Some(2048));
        let spec = FilterSpec::new()
            .with("contentType", "image")
            .with("minSize", "1000");
        assert!(matches(&m, &spec));

        let spec = spec.with("maxSize", "2000");
        assert!(!matches(&m, &spec));
    }

    #[test]
    fn test_deserialize_accepts_numbers() {
        let spec: FilterSpec =
            serde_json::from_str(r#"{"minSize": 100, "maxSize": "1000", "contentType": null}"#)
                .unwrap();
        assert_eq!(
            spec.parse(),
            vec![Filter::MaxSize(1000), Filter::MinSize(100)]
        );
    }
}
