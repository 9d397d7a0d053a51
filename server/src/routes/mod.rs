//! HTTP route definitions.

mod collections;
mod globals;
mod health;
mod realtime;
mod rpc;
mod search;
mod storage;

use axum::Router;

use crate::AppState;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(collections::routes())
        .merge(globals::routes())
        .merge(search::routes())
        .merge(storage::routes())
        .merge(realtime::routes())
        .merge(rpc::routes())
}
