//! `/storage` upload and file-serving routes.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::storage;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/storage/upload/{collection}", post(storage::upload))
        .route("/storage/files/{*key}", get(storage::get_file))
}
