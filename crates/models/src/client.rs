use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::ValidationError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ClientStatus {
    #[default]
    Active,
    Inactive,
    Prospect,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContractType {
    Fixed,
    #[default]
    Project,
    Both,
}

/// A billable customer.
///
/// `total_revenue` is a projection over the user's income transactions and is
/// never taken from user input; see [`crate::summary::recompute_total_revenue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: Option<String>,
    pub address: String,
    #[ts(type = "string")]
    pub total_revenue: Decimal,
    pub last_project: String,
    pub status: ClientStatus,
    pub contract_type: ContractType,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Editable client fields; `total_revenue` is deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ClientDraft {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: Option<String>,
    pub address: String,
    pub last_project: String,
    pub status: ClientStatus,
    pub contract_type: ContractType,
}

impl ClientDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::missing("name"));
        }
        if !self.email.contains('@') {
            return Err(ValidationError::invalid("email", "must be an email address"));
        }
        Ok(())
    }
}

impl Client {
    pub fn from_draft(id: Uuid, user_id: Uuid, draft: &ClientDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name.clone(),
            email: draft.email.clone(),
            phone: draft.phone.clone(),
            company: draft.company.clone(),
            address: draft.address.clone(),
            total_revenue: Decimal::ZERO,
            last_project: draft.last_project.clone(),
            status: draft.status,
            contract_type: draft.contract_type,
            user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites the editable fields, preserving the revenue projection.
    pub fn apply_draft(&mut self, draft: &ClientDraft, now: DateTime<Utc>) {
        self.name = draft.name.clone();
        self.email = draft.email.clone();
        self.phone = draft.phone.clone();
        self.company = draft.company.clone();
        self.address = draft.address.clone();
        self.last_project = draft.last_project.clone();
        self.status = draft.status;
        self.contract_type = draft.contract_type;
        self.updated_at = now;
    }

    pub fn to_draft(&self) -> ClientDraft {
        ClientDraft {
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            company: self.company.clone(),
            address: self.address.clone(),
            last_project: self.last_project.clone(),
            status: self.status,
            contract_type: self.contract_type,
        }
    }
}
