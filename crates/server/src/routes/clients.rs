//! CRUD over the per-user client roster.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, put},
};
use chrono::Utc;
use models::{Client, ClientDraft};
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

pub async fn list_clients(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<ResponseJson<Vec<Client>>, ApiError> {
    Ok(ResponseJson(state.db.clients_for(user.id).await))
}

pub async fn create_client(
    State(state): State<AppState>,
    user: AuthUser,
    Json(draft): Json<ClientDraft>,
) -> Result<(StatusCode, ResponseJson<Client>), ApiError> {
    draft.validate()?;
    let record = state.db.create_client(user.id, &draft, Utc::now()).await?;
    Ok((StatusCode::CREATED, ResponseJson(record)))
}

/// Renames propagate to the denormalized `clientName` on linked
/// transactions.
pub async fn update_client(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(draft): Json<ClientDraft>,
) -> Result<ResponseJson<Client>, ApiError> {
    draft.validate()?;
    let record = state
        .db
        .update_client(user.id, id, &draft, Utc::now())
        .await?
        .ok_or(ApiError::NotFound("client"))?;
    Ok(ResponseJson(record))
}

pub async fn delete_client(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.db.delete_client(user.id, id).await? {
        return Err(ApiError::NotFound("client"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/clients", get(list_clients).post(create_client))
        .route(
            "/api/clients/{id}",
            put(update_client).delete(delete_client),
        )
}
