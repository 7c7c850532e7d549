//! Documents: immutable content + metadata records produced by ingestion.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scalar metadata value attached to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Int(i) => write!(f, "{i}"),
            MetadataValue::Float(x) => write!(f, "{x}"),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<usize> for MetadataValue {
    fn from(i: usize) -> Self {
        MetadataValue::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        MetadataValue::Float(x)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// An indexed unit of text. Fields are private: once built, a document never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    id: String,
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

impl Document {
    /// New document with a fresh random id.
    pub fn new(content: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), content)
    }

    /// New document with a caller-chosen id.
    ///
    /// Empty content is accepted, but it embeds poorly, so a warning is logged.
    pub fn with_id(id: impl Into<String>, content: impl Into<String>) -> Self {
        let id = id.into();
        let content = content.into();
        if content.trim().is_empty() {
            tracing::warn!(id = %id, "document has empty content; its embedding will carry little meaning");
        }
        Self {
            id,
            content,
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata setter, for use during construction.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replaces all metadata, for use during construction.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn meta(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_documents_get_distinct_ids() {
        let a = Document::new("alpha");
        let b = Document::new("alpha");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.content(), "alpha");
    }

    #[test]
    fn empty_content_is_allowed() {
        let d = Document::with_id("d0", "");
        assert_eq!(d.content(), "");
        assert_eq!(d.id(), "d0");
    }

    #[test]
    fn metadata_round_trips_through_json() {
        let d = Document::with_id("d1", "text")
            .with_meta("source", "report.pdf")
            .with_meta("page", 3usize)
            .with_meta("score", 0.5)
            .with_meta("table", true);
        let json = serde_json::to_string(&d).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
        assert_eq!(back.meta("page"), Some(&MetadataValue::Int(3)));
        assert_eq!(back.meta("source").map(|v| v.to_string()).as_deref(), Some("report.pdf"));
    }
}
