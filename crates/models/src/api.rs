//! Request and response bodies of the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::client::Client;
use crate::error::ValidationError;
use crate::transaction::Transaction;
use crate::user::{User, UserRole};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.email.trim().is_empty() {
            return Err(ValidationError::missing("email"));
        }
        if self.password.is_empty() {
            return Err(ValidationError::missing("password"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Option<UserRole>,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err(ValidationError::invalid("email", "must be an email address"));
        }
        if self.password.len() < 6 {
            return Err(ValidationError::invalid("password", "must be at least 6 characters"));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::missing("name"));
        }
        Ok(())
    }
}

/// Successful login/register payload: the identity plus its bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user: User,
    pub token: String,
}

/// Full-state reconcile payload: the caller's local collections.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub transactions: Vec<Transaction>,
    pub clients: Vec<Client>,
}

/// Merged server-side state after an insert-only, server-priority merge.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub transactions: Vec<Transaction>,
    pub clients: Vec<Client>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl ServerStatus {
    pub const ONLINE: &'static str = "online";

    pub fn online(version: &str) -> Self {
        Self {
            status: Self::ONLINE.to_string(),
            timestamp: Utc::now(),
            version: version.to_string(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == Self::ONLINE
    }
}
