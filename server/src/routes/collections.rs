//! `/collections/{collection}` CRUD and workflow routes.

use axum::routing::{get, patch, post};
use axum::Router;

use crate::handlers::collections;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/collections/{collection}", get(collections::find).post(collections::create))
        .route("/collections/{collection}/count", get(collections::count))
        .route("/collections/{collection}/schema", get(collections::schema_introspection))
        .route(
            "/collections/{collection}/{id}",
            get(collections::find_one)
                .patch(collections::update_by_id)
                .delete(collections::delete_by_id),
        )
        .route("/collections/{collection}/{id}/restore", post(collections::restore))
        .route("/collections/{collection}/{id}/versions", get(collections::find_versions))
        .route("/collections/{collection}/{id}/revert", post(collections::revert_to_version))
        .route("/collections/{collection}/{id}/transition", patch(collections::transition_stage))
}
