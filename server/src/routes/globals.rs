//! `/globals/{global}` routes.

use axum::routing::get;
use axum::Router;

use crate::handlers::globals;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/globals/{global}", get(globals::get).patch(globals::update))
        .route("/globals/{global}/versions", get(globals::find_versions))
}
