//! `/search` routes.

use axum::routing::post;
use axum::Router;

use crate::handlers::search;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/search", post(search::search))
        .route("/search/reindex/{collection}", post(search::reindex))
}
