use std::sync::Arc;

use crate::auth::AuthKeys;
use crate::store::JsonDb;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<JsonDb>,
    pub auth: AuthKeys,
}

impl AppState {
    pub fn new(db: JsonDb, auth: AuthKeys) -> Self {
        Self {
            db: Arc::new(db),
            auth,
        }
    }
}
