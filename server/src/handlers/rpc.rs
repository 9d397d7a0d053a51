//! `POST /rpc/jobs/{name}` and the small set of admin-only operational
//! endpoints that don't fit the collection/global CRUD surface: queueing a
//! job by name and inspecting/running pending migrations.

use axum::extract::{Path, State};
use axum::Json;
use headway_core::{JobOptions, Queue};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::RequireAdmin;
use crate::error::{AppError, Result};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishJobBody {
    #[serde(default)]
    pub payload: Value,
    pub priority: Option<i32>,
    pub retry_limit: Option<u32>,
    pub start_after: Option<chrono::DateTime<chrono::Utc>>,
    pub cron: Option<String>,
}

/// Enqueues a job by name against the server's queue adapter. Restricted to
/// admins since job handlers run with full database access and no per-job
/// access control exists at this boundary.
pub async fn publish_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
    RequireAdmin(_session): RequireAdmin,
    Json(body): Json<PublishJobBody>,
) -> Result<Json<Value>> {
    let opts = JobOptions {
        priority: body.priority,
        retry_limit: body.retry_limit,
        retry_delay_seconds: None,
        retry_backoff: None,
        expire_in_seconds: None,
        start_after: body.start_after,
        cron: body.cron.clone(),
    };

    let job_id = if let Some(cron) = &body.cron {
        state
            .queue
            .schedule(&name, body.payload, cron, opts)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        None
    } else {
        state
            .queue
            .publish(&name, body.payload, opts)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
    };

    Ok(Json(json!({ "name": name, "jobId": job_id })))
}

/// Reports the migration files discovered on disk and which have applied,
/// mirroring `headway-cli migrate status`.
pub async fn migration_status(
    State(state): State<AppState>,
    RequireAdmin(_session): RequireAdmin,
) -> Result<Json<Value>> {
    let runner = crate::db::MigrationRunner::new(&state.pool, &state.config.migrations.directory);
    let status = runner.status().await?;
    Ok(Json(json!(status)))
}

/// Runs any pending migrations, equivalent to `headway-cli migrate up`.
pub async fn migration_up(
    State(state): State<AppState>,
    RequireAdmin(_session): RequireAdmin,
) -> Result<Json<Value>> {
    let runner = crate::db::MigrationRunner::new(&state.pool, &state.config.migrations.directory);
    runner.up(None).await?;
    Ok(Json(json!({ "status": "ok" })))
}
