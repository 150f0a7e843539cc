//! Unauthenticated liveness probe; clients check it before replaying
//! queued writes.

use axum::{Router, response::Json as ResponseJson, routing::get};
use models::ServerStatus;

use crate::state::AppState;

pub async fn status() -> ResponseJson<ServerStatus> {
    ResponseJson(ServerStatus::online(env!("CARGO_PKG_VERSION")))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/status", get(status))
}
