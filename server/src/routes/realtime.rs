//! `/realtime` multiplexed SSE route.

use axum::routing::post;
use axum::Router;

use crate::handlers::realtime;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/realtime", post(realtime::subscribe))
}
