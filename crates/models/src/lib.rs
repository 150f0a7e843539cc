//! Domain records and wire types for the ledgerline data layer.
//!
//! Everything here serializes with the camelCase field names the HTTP API
//! uses, so the same structs travel through the gateway, the local cache and
//! the server's JSON store.

pub mod api;
pub mod client;
pub mod error;
pub mod summary;
pub mod transaction;
pub mod user;

pub use api::{AuthSession, LoginRequest, RegisterRequest, ServerStatus, SyncRequest, SyncResponse};
pub use client::{Client, ClientDraft, ClientStatus, ContractType};
pub use error::ValidationError;
pub use summary::{FinancialSummary, recompute_total_revenue};
pub use transaction::{Transaction, TransactionDraft, TransactionKind};
pub use user::{User, UserRole};
