//! `/collections/{c}` handlers: find/create/findOne/
//! updateById/deleteById/restore/findVersions/revertToVersion/
//! transitionStage.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use headway_core::{FindOptions, OrderBy, Pagination, Predicate, Where};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Session;
use crate::error::Result;
use crate::AppState;

use super::context;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(rename = "where")]
    pub where_: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub stage: Option<String>,
    pub include_deleted: Option<bool>,
    pub locale: Option<String>,
}

impl ListQuery {
    fn into_opts(self) -> Result<FindOptions> {
        let where_ = self
            .where_
            .map(|raw| serde_json::from_str::<Where>(&raw))
            .transpose()
            .map_err(|e| crate::error::AppError::BadRequest(format!("invalid where: {e}")))?;
        let order_by = self
            .order_by
            .map(|raw| serde_json::from_str::<Vec<OrderBy>>(&raw))
            .transpose()
            .map_err(|e| crate::error::AppError::BadRequest(format!("invalid orderBy: {e}")))?
            .unwrap_or_default();
        Ok(FindOptions {
            where_,
            order_by,
            pagination: Pagination {
                limit: self.limit,
                offset: self.offset,
            },
            stage: self.stage,
            include_deleted: self.include_deleted.unwrap_or(false),
        })
    }
}

fn id_filter(id: &str) -> Where {
    let mut map = BTreeMap::new();
    map.insert("id".to_string(), Predicate::Scalar(Value::String(id.to_string())));
    Where::Field(map)
}

pub async fn find(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
) -> Result<Json<Value>> {
    let locale = query.locale.clone();
    let ctx = context(session, locale);
    let opts = query.into_opts()?;
    let result = state.crud.find(&collection, opts, &ctx).await?;
    Ok(Json(json!(result)))
}

pub async fn count(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
) -> Result<Json<Value>> {
    let locale = query.locale.clone();
    let ctx = context(session, locale);
    let mut opts = query.into_opts()?;
    opts.pagination = Pagination { limit: Some(0), offset: None };
    let result = state.crud.find(&collection, opts, &ctx).await?;
    Ok(Json(json!({ "count": result.total })))
}

pub async fn schema_introspection(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<Value>> {
    let schema = state.schema.collection(&collection)?;
    let fields: Vec<_> = schema.fields.iter().map(|f| f.metadata()).collect();
    Ok(Json(json!({
        "name": schema.name,
        "fields": fields,
        "timestamps": schema.options.timestamps,
        "softDelete": schema.options.soft_delete,
        "versioning": schema.options.versioning,
        "workflow": schema.options.workflow,
    })))
}

pub async fn create(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let ctx = context(session, query.locale);
    let record = state.crud.create(&collection, payload, &ctx).await?;
    Ok(Json(json!(record)))
}

pub async fn find_one(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
) -> Result<Json<Value>> {
    let locale = query.locale.clone();
    let ctx = context(session, locale);
    let mut opts = query.into_opts()?;
    opts.where_ = Some(id_filter(&id));
    let record = state
        .crud
        .find_one(&collection, opts, &ctx)
        .await?
        .ok_or_else(|| headway_core::Error::RecordNotFound { collection: collection.clone(), id: id.clone() })?;
    Ok(Json(json!(record)))
}

pub async fn update_by_id(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let ctx = context(session, query.locale);
    let record = state.crud.update_by_id(&collection, &id, payload, &ctx).await?;
    Ok(Json(json!(record)))
}

pub async fn delete_by_id(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
) -> Result<Json<Value>> {
    let ctx = context(session, query.locale);
    state.crud.delete_by_id(&collection, &id, &ctx).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn restore(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
) -> Result<Json<Value>> {
    let ctx = context(session, query.locale);
    let record = state.crud.restore(&collection, &id, &ctx).await?;
    Ok(Json(json!(record)))
}

pub async fn find_versions(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
) -> Result<Json<Value>> {
    let ctx = context(session, query.locale);
    let versions = state.crud.find_versions(&collection, &id, &ctx).await?;
    Ok(Json(json!(versions)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertBody {
    pub version_number: i64,
}

pub async fn revert_to_version(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
    Json(body): Json<RevertBody>,
) -> Result<Json<Value>> {
    let ctx = context(session, query.locale);
    let record = state
        .crud
        .revert_to_version(&collection, &id, body.version_number, &ctx)
        .await?;
    Ok(Json(json!(record)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionBody {
    pub stage: String,
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn transition_stage(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
    Json(body): Json<TransitionBody>,
) -> Result<Json<Value>> {
    let ctx = context(session, query.locale);
    let record = state
        .crud
        .transition_stage(&collection, &id, &body.stage, body.scheduled_at, &ctx)
        .await?;
    Ok(Json(json!(record)))
}
