pub mod auth;
pub mod clients;
pub mod status;
pub mod sync;
pub mod transactions;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(transactions::router())
        .merge(clients::router())
        .merge(sync::router())
        .merge(status::router())
}
