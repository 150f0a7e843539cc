//! Login and account registration.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::Json as ResponseJson,
    routing::post,
};
use chrono::Utc;
use models::{AuthSession, LoginRequest, RegisterRequest};
use uuid::Uuid;

use crate::{auth, error::ApiError, state::AppState, store::StoredUser};

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<ResponseJson<AuthSession>, ApiError> {
    request.validate()?;
    let user = state
        .db
        .find_user_by_email(&request.email)
        .await
        .ok_or(ApiError::InvalidCredentials)?;
    if !auth::verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::InvalidCredentials);
    }
    let token = state.auth.issue(&user)?;
    Ok(ResponseJson(AuthSession {
        user: user.profile(),
        token,
    }))
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, ResponseJson<AuthSession>), ApiError> {
    request.validate()?;
    let user = StoredUser {
        id: Uuid::new_v4(),
        email: request.email.clone(),
        password_hash: auth::hash_password(&request.password)?,
        name: request.name.clone(),
        role: request.role.unwrap_or_default(),
        created_at: Utc::now(),
    };
    let user = state
        .db
        .create_user(user)
        .await?
        .ok_or(ApiError::EmailTaken)?;
    let token = state.auth.issue(&user)?;
    Ok((
        StatusCode::CREATED,
        ResponseJson(AuthSession {
            user: user.profile(),
            token,
        }),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/api/auth",
        Router::new()
            .route("/login", post(login))
            .route("/register", post(register)),
    )
}
