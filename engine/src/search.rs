//! Search indexing pipeline contract. `Search` is the
//! abstract full-text engine; the tantivy-backed implementation lives in
//! the server crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::query::Where;

/// What gets indexed for one `(collection, record, locale)` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDocument {
    pub collection: String,
    pub record_id: String,
    pub locale: String,
    pub title: String,
    pub content: String,
    pub metadata: Option<Value>,
    pub embeddings: Option<Vec<f32>>,
}

/// Build the default "`k: v, ...`" content string from a record's primitive
/// fields, excluding structural/synthesised columns.
pub fn auto_content(record: &Value) -> String {
    const EXCLUDED: &[&str] = &["id", "createdAt", "updatedAt", "deletedAt", "locale", "parentId"];
    let Some(obj) = record.as_object() else {
        return String::new();
    };
    obj.iter()
        .filter(|(k, _)| !EXCLUDED.contains(&k.as_str()))
        .filter(|(_, v)| v.is_string() || v.is_number() || v.is_boolean())
        .map(|(k, v)| format!("{k}: {}", scalar_to_string(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchQuery {
    pub query: String,
    pub collections: Option<Vec<String>>,
    pub locale: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Per-collection access-derived predicates, ANDed into that
    /// collection's portion of the query (never serialised off the wire;
    /// the search endpoint populates this from access evaluation).
    #[serde(skip)]
    pub access_filters: std::collections::BTreeMap<String, Where>,
    pub highlights: Option<bool>,
    pub facets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub collection: String,
    pub record_id: String,
    pub score: f32,
    pub indexed_title: String,
    pub highlights: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub total: usize,
    pub facets: Option<Value>,
}

#[async_trait]
pub trait Search: Send + Sync {
    async fn index(&self, doc: SearchDocument) -> Result<()>;
    /// Remove every locale's document for a record.
    async fn delete_record(&self, collection: &str, record_id: &str) -> Result<()>;
    async fn query(&self, query: SearchQuery) -> Result<SearchResults>;
    /// Rebuild a collection's index from scratch.
    async fn reindex_collection(&self, collection: &str, docs: Vec<SearchDocument>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auto_content_excludes_structural_columns() {
        let record = json!({
            "id": "abc",
            "title": "Hello",
            "count": 3,
            "createdAt": "2024-01-01T00:00:00Z",
        });
        let content = auto_content(&record);
        assert!(content.contains("title: Hello"));
        assert!(content.contains("count: 3"));
        assert!(!content.contains("id:"));
        assert!(!content.contains("createdAt"));
    }
}
