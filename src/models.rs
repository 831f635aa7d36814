//! Health record data model.

use serde::{Deserialize, Serialize};

/// A key/value annotation nested inside a record element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

impl MetadataEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One timestamped observation from a health export.
///
/// Built once by the streaming parser and never mutated afterwards.
/// `value` may be NaN when the source text was not numeric; such records
/// are rejected by [`HealthRecord::is_valid`] before insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub source_name: Option<String>,
    pub source_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub unit: Option<String>,
    pub value: f64,
    pub creation_date: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetadataEntry>,
}

impl HealthRecord {
    /// Whether the record carries an id, a type and a finite value.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && !self.record_type.is_empty() && self.value.is_finite()
    }
}
