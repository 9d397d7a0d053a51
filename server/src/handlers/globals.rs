//! `/globals/{g}` handlers. A global is modelled as a singleton collection
//! row addressed by the fixed id `"global"`.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::{json, Value};

use crate::auth::Session;
use crate::error::Result;
use crate::AppState;

use super::collections::ListQuery;
use super::context;

const GLOBAL_ROW_ID: &str = "global";

pub async fn get(
    State(state): State<AppState>,
    Path(global): Path<String>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
) -> Result<Json<Value>> {
    let target = state.schema.global(&global)?.collection.name.clone();
    let ctx = context(session, query.locale);
    let record = state
        .crud
        .find_one(&target, Default::default(), &ctx)
        .await?;
    Ok(Json(match record {
        Some(record) => json!(record),
        None => json!({ "id": GLOBAL_ROW_ID, "collection": target, "data": {} }),
    }))
}

pub async fn update(
    State(state): State<AppState>,
    Path(global): Path<String>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
    Json(mut payload): Json<Value>,
) -> Result<Json<Value>> {
    let target = state.schema.global(&global)?.collection.name.clone();
    let ctx = context(session, query.locale);

    let existing = state.crud.find_one(&target, Default::default(), &ctx).await?;
    let record = match existing {
        Some(_) => state.crud.update_by_id(&target, GLOBAL_ROW_ID, payload, &ctx).await?,
        None => {
            if let Value::Object(ref mut map) = payload {
                map.insert("id".to_string(), Value::String(GLOBAL_ROW_ID.to_string()));
            }
            state.crud.create(&target, payload, &ctx).await?
        }
    };
    Ok(Json(json!(record)))
}

pub async fn find_versions(
    State(state): State<AppState>,
    Path(global): Path<String>,
    Query(query): Query<ListQuery>,
    Session(session): Session,
) -> Result<Json<Value>> {
    let target = state.schema.global(&global)?.collection.name.clone();
    let ctx = context(session, query.locale);
    let versions = state.crud.find_versions(&target, GLOBAL_ROW_ID, &ctx).await?;
    Ok(Json(json!(versions)))
}
