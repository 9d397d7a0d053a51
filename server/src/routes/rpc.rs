//! `/rpc/...` operational endpoints: job publishing and migration control.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::rpc;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rpc/jobs/{name}", post(rpc::publish_job))
        .route("/rpc/migrations/status", get(rpc::migration_status))
        .route("/rpc/migrations/up", post(rpc::migration_up))
}
