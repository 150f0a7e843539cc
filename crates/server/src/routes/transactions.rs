//! CRUD over the per-user transaction ledger.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, put},
};
use chrono::Utc;
use models::{Transaction, TransactionDraft};
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Rows come back newest first: by date, then by creation time.
pub async fn list_transactions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<ResponseJson<Vec<Transaction>>, ApiError> {
    Ok(ResponseJson(state.db.transactions_for(user.id).await))
}

pub async fn create_transaction(
    State(state): State<AppState>,
    user: AuthUser,
    Json(draft): Json<TransactionDraft>,
) -> Result<(StatusCode, ResponseJson<Transaction>), ApiError> {
    draft.validate()?;
    let record = state
        .db
        .create_transaction(user.id, &draft, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, ResponseJson(record)))
}

pub async fn update_transaction(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(draft): Json<TransactionDraft>,
) -> Result<ResponseJson<Transaction>, ApiError> {
    draft.validate()?;
    let record = state
        .db
        .update_transaction(user.id, id, &draft, Utc::now())
        .await?
        .ok_or(ApiError::NotFound("transaction"))?;
    Ok(ResponseJson(record))
}

pub async fn delete_transaction(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.db.delete_transaction(user.id, id).await? {
        return Err(ApiError::NotFound("transaction"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route(
            "/api/transactions/{id}",
            put(update_transaction).delete(delete_transaction),
        )
}
