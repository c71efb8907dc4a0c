//! Composite cache keys.
//!
//! A [`QueryKey`] is an ordered list of segments: the resource name first,
//! then identifiers, then (optionally) the canonical serialization of the
//! filter parameters. Prefix matching over segments drives invalidation, so
//! `["users"]` matches every cached users list regardless of filters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite identifier for a cached read result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    segments: Vec<String>,
}

impl QueryKey {
    /// Key for a resource with no identifiers or filters.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            segments: vec![resource.into()],
        }
    }

    /// The empty key. It is a prefix of every key.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Append an identifier segment.
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Append the canonical JSON form of `params`.
    ///
    /// Object keys come out sorted, so two filter values that serialize to the
    /// same fields always produce the same key.
    pub fn with_params<P: Serialize + ?Sized>(mut self, params: &P) -> Self {
        let value = serde_json::to_value(params).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Filter parameters did not serialize; keying on null");
            serde_json::Value::Null
        });
        self.segments.push(value.to_string());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Resource name (first segment), if any.
    pub fn resource(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when `prefix` is a leading slice of this key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("*");
        }
        f.write_str(&self.segments.join("/"))
    }
}

impl From<&str> for QueryKey {
    fn from(resource: &str) -> Self {
        Self::new(resource)
    }
}
