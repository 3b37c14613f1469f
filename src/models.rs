//! Core data models used throughout Mail Insight.
//!
//! These types represent the attachments, analysis results, and joined
//! store records that flow through a single request. None of them outlive
//! the request that created them.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One uploaded file after validation and encoding.
///
/// `content` holds base64 for images and decoded UTF-8 text otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: String,
    pub is_image: bool,
}

/// Outcome tag of an [`AnalysisResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Success,
    Error,
}

/// Normalized result of one completion call.
///
/// Failures are carried as data (`status = error` plus a message) so the
/// HTTP layer can still answer 200 with the error embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub mail_id: String,
    pub extracted_data: Value,
    pub status: AnalysisStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn success(mail_id: impl Into<String>, extracted_data: Value) -> Self {
        Self {
            mail_id: mail_id.into(),
            extracted_data,
            status: AnalysisStatus::Success,
            error: None,
        }
    }

    pub fn failure(mail_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            mail_id: mail_id.into(),
            extracted_data: Value::Object(Map::new()),
            status: AnalysisStatus::Error,
            error: Some(error.into()),
        }
    }
}

/// Field name → exact-match value. An empty set matches every document.
pub type FilterSet = BTreeMap<String, Value>;

/// A document read from the backing store: its id plus its top-level fields.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl StoredDocument {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// True when every filter field is present with an equal value.
    pub fn matches(&self, filters: &FilterSet) -> bool {
        filters
            .iter()
            .all(|(field, expected)| self.fields.get(field) == Some(expected))
    }

    /// Flattens to `{"id": ..., <fields>}`. A stored field named `id` wins.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut out = Map::with_capacity(self.fields.len() + 1);
        out.insert("id".to_string(), Value::String(self.id.clone()));
        for (k, v) in &self.fields {
            out.insert(k.clone(), v.clone());
        }
        out
    }
}

impl Serialize for StoredDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// A parent document enriched with its (filtered) subcollection.
///
/// Serializes flat: the parent's id and fields, plus one key named after the
/// subcollection holding the ordered child documents.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRecord {
    pub parent: StoredDocument,
    pub subcollection: String,
    pub children: Vec<StoredDocument>,
}

impl JoinedRecord {
    pub fn to_json(&self) -> Map<String, Value> {
        let mut out = self.parent.to_json();
        let children = self
            .children
            .iter()
            .map(|c| Value::Object(c.to_json()))
            .collect();
        out.insert(self.subcollection.clone(), Value::Array(children));
        out
    }
}

impl Serialize for JoinedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, fields: Value) -> StoredDocument {
        StoredDocument::new(id, fields.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn failure_result_serializes_error_and_empty_data() {
        let r = AnalysisResult::failure("m1", "boom");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["error"], "boom");
        assert_eq!(v["extracted_data"], json!({}));
    }

    #[test]
    fn success_result_omits_error_key() {
        let r = AnalysisResult::success("m1", json!({"a": 1}));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "success");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn empty_filter_matches_everything() {
        let d = doc("a", json!({"status": "open"}));
        assert!(d.matches(&FilterSet::new()));
    }

    #[test]
    fn filter_requires_exact_value() {
        let d = doc("a", json!({"status": "open", "n": 3}));
        let mut f = FilterSet::new();
        f.insert("status".into(), json!("open"));
        assert!(d.matches(&f));
        f.insert("n".into(), json!("3"));
        assert!(!d.matches(&f), "string \"3\" must not equal number 3");
    }

    #[test]
    fn joined_record_flattens_parent_and_children() {
        let rec = JoinedRecord {
            parent: doc("o1", json!({"status": "open"})),
            subcollection: "items".into(),
            children: vec![doc("i1", json!({"sku": "x"}))],
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(
            v,
            json!({"id": "o1", "status": "open", "items": [{"id": "i1", "sku": "x"}]})
        );
    }
}
