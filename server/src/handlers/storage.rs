//! `/storage/upload/{c}` and `/storage/files/{key}`.
//! Uploaded files are persisted through the `Storage` adapter and
//! registered as a row in the target collection's `Upload` field; reads
//! are open by default and only checked against a signed token when the
//! request includes one.

use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use headway_core::storage::verify_storage_url;
use headway_core::Storage;
use serde_json::json;

use crate::auth::Session;
use crate::error::{AppError, Result};
use crate::AppState;

use super::context;

pub async fn upload(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Session(session): Session,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    else {
        return Err(AppError::BadRequest("no file field in upload".to_string()));
    };

    let filename = field.file_name().unwrap_or("upload.bin").to_string();
    let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
    let bytes = field.bytes().await.map_err(|e| AppError::BadRequest(e.to_string()))?;

    let key = format!("{collection}/{}-{filename}", uuid::Uuid::new_v4());
    let stored = state
        .storage
        .put(&key, &content_type, &bytes)
        .await
        .map_err(|e| AppError::Storage(e.to_string()))?;

    let ctx = context(session, None);
    let record = state
        .crud
        .create(
            &collection,
            json!({
                "filename": stored.key,
                "url": format!("{}/{}", state.config.storage.public_url_prefix, stored.key),
                "contentType": stored.content_type,
                "size": stored.size,
            }),
            &ctx,
        )
        .await?;

    Ok(Json(json!(record)))
}

pub async fn get_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    axum::extract::Query(params): axum::extract::Query<std::collections::HashMap<String, String>>,
) -> Result<impl IntoResponse> {
    if let Some(token) = params.get("token") {
        let now = chrono::Utc::now().timestamp();
        let verified_key = verify_storage_url(state.config.secret.as_bytes(), token, now)
            .map_err(|e| AppError::Storage(e.to_string()))?;
        if verified_key != key {
            return Err(AppError::Forbidden);
        }
    }

    let bytes = state
        .storage
        .get(&key)
        .await
        .map_err(|e| AppError::Storage(e.to_string()))?;
    let content_type = crate::storage::guess_content_type(std::path::Path::new(&key));

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}
