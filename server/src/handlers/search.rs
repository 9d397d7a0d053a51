//! `/search` and `/search/reindex/{c}` handlers.

use axum::extract::{Path, State};
use axum::Json;
use headway_core::search::auto_content;
use headway_core::{FindOptions, Search, SearchDocument, SearchQuery};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::RequireAdmin;
use crate::error::{AppError, Result};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBody {
    pub query: String,
    pub collections: Option<Vec<String>>,
    pub locale: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn search(State(state): State<AppState>, Json(body): Json<SearchBody>) -> Result<Json<Value>> {
    let query = SearchQuery {
        query: body.query,
        collections: body.collections,
        locale: body.locale,
        limit: body.limit,
        offset: body.offset,
        access_filters: Default::default(),
        highlights: None,
        facets: None,
    };
    let results = state
        .search
        .query(query)
        .await
        .map_err(|e| AppError::Search(e.to_string()))?;
    Ok(Json(json!(results)))
}

/// Rebuild a collection's tantivy index from its current rows, restricted
/// to admins since it runs a full table scan.
pub async fn reindex(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    RequireAdmin(session): RequireAdmin,
) -> Result<Json<Value>> {
    let schema = state.schema.collection(&collection)?;
    let title_field = match &schema.searchable {
        Some(headway_core::SearchableConfig::Enabled { title_field, .. }) => title_field.clone(),
        _ => None,
    };

    let ctx = headway_core::AppContext::anonymous("en").with_session(session);
    let result = state
        .crud
        .find(&collection, FindOptions { include_deleted: true, ..Default::default() }, &ctx)
        .await?;

    let docs: Vec<SearchDocument> = result
        .docs
        .into_iter()
        .map(|record| {
            let title = title_field
                .as_deref()
                .and_then(|field| record.data.get(field))
                .and_then(|v| v.as_str())
                .unwrap_or(&record.id)
                .to_string();
            SearchDocument {
                collection: collection.clone(),
                record_id: record.id,
                locale: ctx.locale.clone(),
                title,
                content: auto_content(&record.data),
                metadata: Some(record.data),
                embeddings: None,
            }
        })
        .collect();

    let count = docs.len();
    state
        .search
        .reindex_collection(&collection, docs)
        .await
        .map_err(|e| AppError::Search(e.to_string()))?;

    Ok(Json(json!({ "collection": collection, "indexed": count })))
}
