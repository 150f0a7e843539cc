//! HTTP API for the ledgerline backend: JWT-authenticated per-user CRUD
//! over transactions and clients, a bulk sync endpoint for offline replay,
//! and a public status probe.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;

use axum::{Json, Router, http::StatusCode};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use auth::AuthKeys;
pub use state::AppState;
pub use store::{JsonDb, StoredUser};

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::router())
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "route not found" })),
    )
}
