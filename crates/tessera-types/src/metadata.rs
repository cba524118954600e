//! Metadata documents attached to each stored version.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TypesError};

/// Key/value document describing one `(name, version)`.
///
/// Serialized flat: the well-known fields sit next to any caller-supplied
/// keys, which are carried through untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Type tag of the archived value.
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Name of the archiver that wrote the payload.
    #[serde(default)]
    pub archiver: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// BLAKE3 digest (hex) over the payload files, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Commit position within the name, assigned under the name's lock.
    /// The version with the highest sequence is "latest".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Metadata {
    /// Fresh metadata stamped with the current time.
    pub fn new(type_tag: impl Into<String>, archiver: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            archiver: archiver.into(),
            created_at: Utc::now(),
            tags: Vec::new(),
            checksum: None,
            sequence: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Key ordering versions of one name by commit: sequence, then
    /// `created_at` for documents written without one.
    pub fn commit_order(&self) -> (u64, DateTime<Utc>) {
        (self.sequence.unwrap_or(0), self.created_at)
    }

    /// Merge caller-supplied keys. Well-known field names are not overridden.
    pub fn with_extra(mut self, extra: BTreeMap<String, Value>) -> Self {
        for (key, value) in extra {
            if !Self::is_reserved_key(&key) {
                self.extra.insert(key, value);
            }
        }
        self
    }

    /// Whether `key` names one of the fixed fields.
    pub fn is_reserved_key(key: &str) -> bool {
        matches!(key, "type" | "archiver" | "created_at" | "tags" | "checksum" | "sequence")
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| TypesError::Serialization(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| TypesError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_shape_is_flat() {
        let mut extra = BTreeMap::new();
        extra.insert("owner".to_string(), json!("vision-team"));
        let meta = Metadata::new("i64", "json")
            .with_tags(["prod", "v2"])
            .with_extra(extra);

        let value: Value = serde_json::from_slice(&meta.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "i64");
        assert_eq!(value["archiver"], "json");
        assert_eq!(value["tags"], json!(["prod", "v2"]));
        assert_eq!(value["owner"], "vision-team");
        assert!(value.get("created_at").is_some());
        assert!(value.get("checksum").is_none());
        assert!(value.get("sequence").is_none());
    }

    #[test]
    fn roundtrip_preserves_extra_keys() {
        let mut extra = BTreeMap::new();
        extra.insert("accuracy".to_string(), json!(0.93));
        let meta = Metadata::new("bytes", "bytes")
            .with_checksum("abcd")
            .with_extra(extra);
        let decoded = Metadata::from_json(&meta.to_json().unwrap()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn reserved_keys_are_not_overridden() {
        let mut extra = BTreeMap::new();
        extra.insert("type".to_string(), json!("spoofed"));
        let meta = Metadata::new("string", "text").with_extra(extra);
        assert_eq!(meta.type_tag, "string");
        assert!(meta.extra.is_empty());
    }

    #[test]
    fn minimal_document_parses() {
        let doc = br#"{"type": "bytes", "created_at": "2024-01-01T00:00:00Z"}"#;
        let meta = Metadata::from_json(doc).unwrap();
        assert_eq!(meta.type_tag, "bytes");
        assert!(meta.tags.is_empty());
        assert!(meta.archiver.is_empty());
    }

    #[test]
    fn commit_order_prefers_sequence_over_clock() {
        let early = Metadata::from_json(br#"{"type": "i64", "created_at": "2024-01-01T00:00:00Z", "sequence": 2}"#).unwrap();
        let late = Metadata::from_json(br#"{"type": "i64", "created_at": "2025-01-01T00:00:00Z", "sequence": 1}"#).unwrap();
        assert!(early.commit_order() > late.commit_order());

        let unsequenced = Metadata::from_json(br#"{"type": "i64", "created_at": "2025-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(unsequenced.sequence, None);
        assert!(unsequenced.commit_order() < late.commit_order());
    }

    #[test]
    fn sequence_is_reserved() {
        let mut extra = BTreeMap::new();
        extra.insert("sequence".to_string(), json!(99));
        let meta = Metadata::new("i64", "json").with_sequence(3).with_extra(extra);
        assert_eq!(meta.sequence, Some(3));
        let decoded = Metadata::from_json(&meta.to_json().unwrap()).unwrap();
        assert_eq!(decoded.sequence, Some(3));
        assert!(decoded.extra.is_empty());
    }

    #[test]
    fn has_tag() {
        let meta = Metadata::new("bytes", "bytes").with_tags(["a"]);
        assert!(meta.has_tag("a"));
        assert!(!meta.has_tag("b"));
    }
}
