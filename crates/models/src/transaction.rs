use chrono::{DateTime, NaiveDate, Utc};
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
pub enum TransactionKind {
    #[default]
    Income,
    Expense,
}

/// A single money movement recorded by a user.
///
/// `amount` is always positive; the direction comes from `kind`. Income
/// entries may link a [`crate::Client`] by id, with `client_name` kept as a
/// denormalized display copy that is refreshed when the client is renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub description: String,
    #[ts(type = "string")]
    pub amount: Decimal,
    pub category: String,
    pub date: NaiveDate,
    pub client_id: Option<Uuid>,
    pub client_name: Option<String>,
    /// Free-text counterparty, used where no tracked client applies.
    pub person: Option<String>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The editable field set, shared by create and update calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDraft {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub description: String,
    #[ts(type = "string")]
    pub amount: Decimal,
    pub category: String,
    pub date: NaiveDate,
    pub client_id: Option<Uuid>,
    pub client_name: Option<String>,
    pub person: Option<String>,
}

impl TransactionDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::missing("description"));
        }
        if self.amount <= Decimal::ZERO {
            return Err(ValidationError::invalid("amount", "must be greater than zero"));
        }
        if self.category.trim().is_empty() {
            return Err(ValidationError::missing("category"));
        }
        Ok(())
    }
}

impl Transaction {
    /// Materializes a draft into a full record. The server does this on
    /// create; the coordinator does the same with a provisional id when a
    /// write is applied before the server has seen it.
    pub fn from_draft(id: Uuid, user_id: Uuid, draft: &TransactionDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: draft.kind,
            description: draft.description.clone(),
            amount: draft.amount,
            category: draft.category.clone(),
            date: draft.date,
            client_id: draft.client_id,
            client_name: draft.client_name.clone(),
            person: draft.person.clone(),
            user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites the editable fields in place, leaving id, owner and
    /// `created_at` untouched.
    pub fn apply_draft(&mut self, draft: &TransactionDraft, now: DateTime<Utc>) {
        self.kind = draft.kind;
        self.description = draft.description.clone();
        self.amount = draft.amount;
        self.category = draft.category.clone();
        self.date = draft.date;
        self.client_id = draft.client_id;
        self.client_name = draft.client_name.clone();
        self.person = draft.person.clone();
        self.updated_at = now;
    }

    /// The editable fields of this record, for replaying a local copy
    /// against the server.
    pub fn to_draft(&self) -> TransactionDraft {
        TransactionDraft {
            kind: self.kind,
            description: self.description.clone(),
            amount: self.amount,
            category: self.category.clone(),
            date: self.date,
            client_id: self.client_id,
            client_name: self.client_name.clone(),
            person: self.person.clone(),
        }
    }
}
