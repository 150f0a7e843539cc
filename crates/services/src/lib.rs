//! The data layer behind the ledgerline app: a remote API gateway, the
//! reconciliation coordinator that keeps the local cache and the server in
//! agreement, and the background service that drains deferred writes.

pub mod services;

pub use services::config::Config;
pub use services::coordinator::{
    Coordinator, CoordinatorError, FlushReport, MutationOutcome, ReadyMode, SessionPhase,
};
pub use services::gateway::{ApiClient, GatewayError, RemoteGateway};
pub use services::notification::{Notifications, RecordKind, SyncEvent};
pub use services::pending::{PendingOp, PendingQueue};
pub use services::sync::SyncService;
