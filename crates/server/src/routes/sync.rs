//! Full-state reconcile endpoint for clients returning from offline work.

use axum::{Json, Router, extract::State, response::Json as ResponseJson, routing::post};
use chrono::Utc;
use models::{SyncRequest, SyncResponse};

use crate::{auth::AuthUser, error::ApiError, state::AppState};

pub async fn sync(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SyncRequest>,
) -> Result<ResponseJson<SyncResponse>, ApiError> {
    let merged = state.db.sync(user.id, request, Utc::now()).await?;
    Ok(ResponseJson(merged))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/sync", post(sync))
}
