use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::dao::document_store::{Document, DocumentPath};

pub const ID_SEPARATOR: &str = "::";
pub const END_SUFFIX: &str = "\u{ffff}";

/// CouchDB `_id` for a document path. Slashes in collection names are flattened so the id
/// stays a single URL segment.
pub fn doc_id(path: &DocumentPath) -> String {
    format!("{}{}", collection_prefix(&path.collection), path.id)
}

/// Common `_id` prefix of every document in `collection`.
pub fn collection_prefix(collection: &str) -> String {
    format!("{}{}", collection.replace('/', ":"), ID_SEPARATOR)
}

/// Document id inside its collection, given the CouchDB `_id`.
pub fn local_id<'a>(couch_id: &'a str, prefix: &str) -> Option<&'a str> {
    couch_id.strip_prefix(prefix)
}

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseInfo {
    pub update_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    #[serde(default)]
    pub results: Vec<ChangeRow>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
}

/// Body of a `_changes` POST narrowing the feed to the documents an observer cares about.
#[derive(Debug, Clone)]
pub enum ChangeFilter {
    /// A single document.
    Document(String),
    /// Every document whose `_id` starts with the prefix.
    Prefix(String),
}

impl ChangeFilter {
    /// Value of the `filter` query parameter.
    pub fn name(&self) -> &'static str {
        match self {
            ChangeFilter::Document(_) => "_doc_ids",
            ChangeFilter::Prefix(_) => "_selector",
        }
    }

    /// JSON body sent with the request.
    pub fn body(&self) -> Value {
        match self {
            ChangeFilter::Document(id) => json!({ "doc_ids": [id] }),
            ChangeFilter::Prefix(prefix) => json!({
                "selector": {
                    "_id": {
                        "$gt": prefix,
                        "$lt": format!("{prefix}{END_SUFFIX}"),
                    }
                }
            }),
        }
    }
}

/// Query-string form of a CouchDB sequence, which may be a number or an opaque string.
pub fn seq_param(seq: &Value) -> String {
    match seq {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub fields: Document,
}

impl CouchDocument {
    pub fn new(id: String, rev: Option<String>, fields: Document) -> Self {
        Self { id, rev, fields }
    }

    /// Body without CouchDB bookkeeping fields.
    pub fn into_fields(self) -> Document {
        self.fields
            .into_iter()
            .filter(|(key, _)| !key.starts_with('_'))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_flatten_nested_collections() {
        let path = DocumentPath::new("sessions/vibe-live/teams", "abc");
        assert_eq!(doc_id(&path), "sessions:vibe-live:teams::abc");

        let prefix = collection_prefix(&path.collection);
        assert_eq!(local_id(&doc_id(&path), &prefix), Some("abc"));
        assert_eq!(local_id("system::config", &prefix), None);
    }

    #[test]
    fn bookkeeping_fields_are_stripped() {
        let raw = json!({"_id": "system::config", "_rev": "1-a", "_conflicts": [], "status": "idle"});
        let document: CouchDocument = serde_json::from_value(raw).unwrap();

        assert_eq!(document.rev.as_deref(), Some("1-a"));
        let fields = document.into_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("status"), Some(&json!("idle")));
    }

    #[test]
    fn sequences_render_without_quotes() {
        assert_eq!(seq_param(&json!("12-g1AAAA")), "12-g1AAAA");
        assert_eq!(seq_param(&json!(42)), "42");
    }
}
