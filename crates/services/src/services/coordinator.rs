//! Reconciliation coordinator: the single owner of a session's working set.
//!
//! Every read and write of transaction/client data goes through here. Writes
//! try the server first and fall back to an optimistic local apply plus a
//! durable queue entry when the server is unreachable; the queue is replayed
//! in order once connectivity returns. Reads are snapshots and never wait on
//! in-flight writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use models::{
    Client, ClientDraft, FinancialSummary, SyncRequest, Transaction, TransactionDraft, User,
    ValidationError, recompute_total_revenue,
};
use secrecy::SecretString;
use serde::Serialize;
use store::{API_TOKEN_KEY, CURRENT_USER_KEY, CacheStore, DataKind, StorageInfo, collection_key};
use strum_macros::Display;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::gateway::{GatewayError, RemoteGateway};
use super::notification::{Notifications, RecordKind, SyncEvent};
use super::pending::{PendingOp, PendingQueue};

/// Where the current working set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReadyMode {
    /// Loaded from the server; cache is a mirror.
    Online,
    /// Server unreachable at load time; serving the cached copy.
    Degraded,
    /// Server unreachable and nothing cached; starting from scratch.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    Ready(ReadyMode),
    LoggedOut,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no active session")]
    NotLoggedIn,
    #[error("session expired, log in again")]
    AuthExpired,
    #[error("unknown record {0}")]
    UnknownRecord(Uuid),
    #[error("record {0} was changed elsewhere and no longer exists")]
    Conflict(Uuid),
    #[error("the session changed while the operation was in flight")]
    Superseded,
    #[error(transparent)]
    Gateway(GatewayError),
}

/// How a write landed: confirmed by the server, or held locally until the
/// queue drains.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
    Synced(T),
    SavedLocally(T),
}

impl<T> MutationOutcome<T> {
    pub fn record(&self) -> &T {
        match self {
            Self::Synced(record) | Self::SavedLocally(record) => record,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Operations drained from the queue, whether applied or rejected.
    pub flushed: usize,
    pub remaining: usize,
}

struct Session {
    /// Bumped on every login/logout; in-flight work that captured an older
    /// value must not touch the session when it completes.
    epoch: u64,
    phase: SessionPhase,
    user: Option<User>,
    transactions: Vec<Transaction>,
    clients: Vec<Client>,
    pending: PendingQueue,
}

impl Session {
    fn new() -> Self {
        Self {
            epoch: 0,
            phase: SessionPhase::Uninitialized,
            user: None,
            transactions: Vec::new(),
            clients: Vec::new(),
            pending: PendingQueue::default(),
        }
    }
}

enum StepOutcome {
    /// The server accepted the queued write.
    Applied,
    /// The server rejected it for good; it was removed so the rest can move.
    Dropped,
    /// Still unreachable; stop and try again next tick.
    Halted,
}

pub struct Coordinator {
    gateway: Arc<dyn RemoteGateway>,
    cache: CacheStore,
    notifications: Notifications,
    session: RwLock<Session>,
    /// Serializes every mutation, queue replay included, so writes reach the
    /// server in the order the caller issued them.
    write_gate: Mutex<()>,
    online: AtomicBool,
}

impl Coordinator {
    pub fn new(gateway: Arc<dyn RemoteGateway>, cache: CacheStore) -> Self {
        Self {
            gateway,
            cache,
            notifications: Notifications::new(),
            session: RwLock::new(Session::new()),
            write_gate: Mutex::new(()),
            online: AtomicBool::new(true),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.notifications.subscribe()
    }

    // ---- session lifecycle ----

    /// Authenticates against the server. There is no offline login: without
    /// a reachable server there is no way to verify credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, CoordinatorError> {
        let auth = match self.gateway.login(email, password).await {
            Ok(auth) => auth,
            Err(err) => {
                if err.is_connectivity() {
                    self.note_connectivity(false);
                }
                return Err(CoordinatorError::Gateway(err));
            }
        };
        info!(email, "login accepted");
        self.begin_session(auth).await
    }

    pub async fn register(
        &self,
        request: &models::RegisterRequest,
    ) -> Result<User, CoordinatorError> {
        request.validate()?;
        let auth = self
            .gateway
            .register(request)
            .await
            .map_err(CoordinatorError::Gateway)?;
        info!(email = %auth.user.email, "account registered");
        self.begin_session(auth).await
    }

    /// Re-adopts the identity a previous run left in the cache, then loads
    /// the working set (from the server when reachable, the cache
    /// otherwise). `Ok(None)` means there was nothing to restore.
    pub async fn restore_session(&self) -> Result<Option<User>, CoordinatorError> {
        let token: Option<String> = self.cache.get(API_TOKEN_KEY);
        let user: Option<User> = self.cache.get(CURRENT_USER_KEY);
        let (Some(token), Some(user)) = (token, user) else {
            debug!("no stored session to restore");
            return Ok(None);
        };
        info!(email = %user.email, "restoring stored session");
        self.adopt_identity(&user, &token).await;
        self.load_working_set(&user).await?;
        Ok(Some(user))
    }

    /// Ends the session. The per-user cache entries survive, so the next
    /// login warm-starts even when the server is down; only the identity and
    /// its token are removed.
    pub async fn logout(&self) {
        {
            let mut session = self.session.write().await;
            session.epoch += 1;
            session.phase = SessionPhase::LoggedOut;
            session.user = None;
            session.transactions.clear();
            session.clients.clear();
            session.pending = PendingQueue::default();
        }
        self.gateway.set_token(None);
        self.cache.remove(API_TOKEN_KEY);
        self.cache.remove(CURRENT_USER_KEY);
        info!("session closed");
    }

    async fn begin_session(&self, auth: models::AuthSession) -> Result<User, CoordinatorError> {
        let user = auth.user.clone();
        self.adopt_identity(&user, &auth.token).await;
        self.cache.set(API_TOKEN_KEY, &auth.token);
        self.cache.set(CURRENT_USER_KEY, &user);
        self.load_working_set(&user).await?;
        Ok(user)
    }

    async fn adopt_identity(&self, user: &User, token: &str) {
        self.gateway
            .set_token(Some(SecretString::from(token.to_string())));
        let mut session = self.session.write().await;
        session.epoch += 1;
        session.phase = SessionPhase::Loading;
        session.user = Some(user.clone());
        session.transactions.clear();
        session.clients.clear();
        session.pending = self
            .cache
            .get(&collection_key(DataKind::PendingOps, user.id))
            .unwrap_or_default();
    }

    /// Remote-first load with cache fallback.
    async fn load_working_set(&self, user: &User) -> Result<(), CoordinatorError> {
        let epoch = self.session.read().await.epoch;
        self.cache.migrate_unscoped(user.id);

        let remote = match self.fetch_both().await {
            Ok(collections) => Some(collections),
            Err(err) if err.is_auth() => return Err(self.expire_session().await),
            Err(err) => {
                warn!(%err, "could not load from server, falling back to cache");
                None
            }
        };

        match remote {
            Some((transactions, mut clients)) => {
                self.note_connectivity(true);
                recompute_total_revenue(&mut clients, &transactions);
                self.with_current_session(epoch, |session| {
                    session.transactions = transactions;
                    session.clients = clients;
                    session.phase = SessionPhase::Ready(ReadyMode::Online);
                })
                .await?;
                info!(user = %user.email, "working set loaded from server");
                self.notifications.notify(SyncEvent::SessionLoaded {
                    mode: ReadyMode::Online,
                });
            }
            None => {
                self.note_connectivity(false);
                let tx_key = collection_key(DataKind::Transactions, user.id);
                let client_key = collection_key(DataKind::Clients, user.id);
                let warm = self.cache.contains(&tx_key) || self.cache.contains(&client_key);
                let transactions: Vec<Transaction> = self.cache.get(&tx_key).unwrap_or_default();
                let mut clients: Vec<Client> = self.cache.get(&client_key).unwrap_or_default();
                recompute_total_revenue(&mut clients, &transactions);
                let mode = if warm {
                    ReadyMode::Degraded
                } else {
                    ReadyMode::Empty
                };
                let mut session = self.session.write().await;
                if session.epoch != epoch {
                    return Err(CoordinatorError::Superseded);
                }
                session.transactions = transactions;
                session.clients = clients;
                session.phase = SessionPhase::Ready(mode);
                drop(session);
                warn!(user = %user.email, %mode, "starting from local cache");
                self.notifications.notify(SyncEvent::SessionLoaded { mode });
            }
        }
        Ok(())
    }

    async fn fetch_both(&self) -> Result<(Vec<Transaction>, Vec<Client>), GatewayError> {
        let transactions = self.gateway.fetch_transactions().await?;
        let clients = self.gateway.fetch_clients().await?;
        Ok((transactions, clients))
    }

    // ---- snapshot reads ----

    pub async fn phase(&self) -> SessionPhase {
        self.session.read().await.phase
    }

    pub async fn current_user(&self) -> Option<User> {
        self.session.read().await.user.clone()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.session.read().await.transactions.clone()
    }

    pub async fn clients(&self) -> Vec<Client> {
        self.session.read().await.clients.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.session.read().await.pending.len()
    }

    pub async fn pending_ops(&self) -> PendingQueue {
        self.session.read().await.pending.clone()
    }

    pub async fn summary(&self) -> FinancialSummary {
        let session = self.session.read().await;
        FinancialSummary::compute(&session.transactions, &session.clients, session.pending.len())
    }

    pub fn storage_info(&self) -> StorageInfo {
        self.cache.describe()
    }

    // ---- transaction writes ----

    pub async fn add_transaction(
        &self,
        draft: TransactionDraft,
    ) -> Result<MutationOutcome<Transaction>, CoordinatorError> {
        draft.validate()?;
        let _gate = self.write_gate.lock().await;
        let (user, epoch) = self.require_ready().await?;
        let draft = self.resolve_client_name(draft).await;

        if self.queue_clear().await {
            match self.gateway.create_transaction(&draft).await {
                Ok(record) => {
                    self.note_connectivity(true);
                    let adopted = record.clone();
                    self.with_current_session(epoch, |session| {
                        session.transactions.push(record);
                        refresh_revenue(session);
                    })
                    .await?;
                    self.notifications.notify(SyncEvent::SavedToCloud {
                        record: RecordKind::Transaction,
                        id: adopted.id,
                    });
                    return Ok(MutationOutcome::Synced(adopted));
                }
                Err(err) if err.is_connectivity() => self.note_connectivity(false),
                Err(err) => return Err(self.explicit_failure(err).await),
            }
        }

        let record = Transaction::from_draft(Uuid::new_v4(), user.id, &draft, Utc::now());
        let local = record.clone();
        self.with_current_session(epoch, |session| {
            session.pending.push_create_transaction(record.id, draft);
            session.transactions.push(record);
            refresh_revenue(session);
            self.persist_pending(session);
        })
        .await?;
        self.notifications.notify(SyncEvent::SavedLocally {
            record: RecordKind::Transaction,
            id: local.id,
        });
        Ok(MutationOutcome::SavedLocally(local))
    }

    pub async fn update_transaction(
        &self,
        id: Uuid,
        draft: TransactionDraft,
    ) -> Result<MutationOutcome<Transaction>, CoordinatorError> {
        draft.validate()?;
        let _gate = self.write_gate.lock().await;
        let (_user, epoch) = self.require_ready().await?;
        self.require_transaction(id).await?;
        let draft = self.resolve_client_name(draft).await;

        if self.queue_clear().await {
            match self.gateway.update_transaction(id, &draft).await {
                Ok(record) => {
                    self.note_connectivity(true);
                    let adopted = record.clone();
                    self.with_current_session(epoch, |session| {
                        if let Some(local) = session.transactions.iter_mut().find(|t| t.id == id) {
                            *local = record;
                        }
                        refresh_revenue(session);
                    })
                    .await?;
                    self.notifications.notify(SyncEvent::SavedToCloud {
                        record: RecordKind::Transaction,
                        id,
                    });
                    return Ok(MutationOutcome::Synced(adopted));
                }
                Err(err) if err.is_connectivity() => self.note_connectivity(false),
                Err(err) if err.is_not_found() => {
                    self.drop_stale_transaction(epoch, id).await?;
                    return Err(CoordinatorError::Conflict(id));
                }
                Err(err) => return Err(self.explicit_failure(err).await),
            }
        }

        let now = Utc::now();
        let updated = self
            .with_current_session(epoch, |session| {
                let record = session.transactions.iter_mut().find(|t| t.id == id)?;
                record.apply_draft(&draft, now);
                let updated = record.clone();
                session.pending.fold_update_transaction(id, &draft);
                refresh_revenue(session);
                self.persist_pending(session);
                Some(updated)
            })
            .await?
            .ok_or(CoordinatorError::UnknownRecord(id))?;
        self.notifications.notify(SyncEvent::SavedLocally {
            record: RecordKind::Transaction,
            id,
        });
        Ok(MutationOutcome::SavedLocally(updated))
    }

    pub async fn delete_transaction(
        &self,
        id: Uuid,
    ) -> Result<MutationOutcome<Uuid>, CoordinatorError> {
        let _gate = self.write_gate.lock().await;
        let (_user, epoch) = self.require_ready().await?;
        self.require_transaction(id).await?;

        if self.queue_clear().await {
            match self.gateway.delete_transaction(id).await {
                Ok(()) => {
                    self.note_connectivity(true);
                    self.with_current_session(epoch, |session| {
                        session.transactions.retain(|t| t.id != id);
                        refresh_revenue(session);
                    })
                    .await?;
                    self.notifications.notify(SyncEvent::SavedToCloud {
                        record: RecordKind::Transaction,
                        id,
                    });
                    return Ok(MutationOutcome::Synced(id));
                }
                Err(err) if err.is_connectivity() => self.note_connectivity(false),
                Err(err) if err.is_not_found() => {
                    // already gone on the server; dropping our copy finishes the job
                    self.drop_stale_transaction(epoch, id).await?;
                    return Ok(MutationOutcome::Synced(id));
                }
                Err(err) => return Err(self.explicit_failure(err).await),
            }
        }

        self.with_current_session(epoch, |session| {
            session.transactions.retain(|t| t.id != id);
            session.pending.fold_delete_transaction(id);
            refresh_revenue(session);
            self.persist_pending(session);
        })
        .await?;
        self.notifications.notify(SyncEvent::SavedLocally {
            record: RecordKind::Transaction,
            id,
        });
        Ok(MutationOutcome::SavedLocally(id))
    }

    // ---- client writes ----

    pub async fn add_client(
        &self,
        draft: ClientDraft,
    ) -> Result<MutationOutcome<Client>, CoordinatorError> {
        draft.validate()?;
        let _gate = self.write_gate.lock().await;
        let (user, epoch) = self.require_ready().await?;

        if self.queue_clear().await {
            match self.gateway.create_client(&draft).await {
                Ok(record) => {
                    self.note_connectivity(true);
                    let adopted = record.clone();
                    self.with_current_session(epoch, |session| {
                        session.clients.push(record);
                        refresh_revenue(session);
                    })
                    .await?;
                    self.notifications.notify(SyncEvent::SavedToCloud {
                        record: RecordKind::Client,
                        id: adopted.id,
                    });
                    return Ok(MutationOutcome::Synced(adopted));
                }
                Err(err) if err.is_connectivity() => self.note_connectivity(false),
                Err(err) => return Err(self.explicit_failure(err).await),
            }
        }

        let record = Client::from_draft(Uuid::new_v4(), user.id, &draft, Utc::now());
        let local = record.clone();
        self.with_current_session(epoch, |session| {
            session.pending.push_create_client(record.id, draft);
            session.clients.push(record);
            refresh_revenue(session);
            self.persist_pending(session);
        })
        .await?;
        self.notifications.notify(SyncEvent::SavedLocally {
            record: RecordKind::Client,
            id: local.id,
        });
        Ok(MutationOutcome::SavedLocally(local))
    }

    pub async fn update_client(
        &self,
        id: Uuid,
        draft: ClientDraft,
    ) -> Result<MutationOutcome<Client>, CoordinatorError> {
        draft.validate()?;
        let _gate = self.write_gate.lock().await;
        let (_user, epoch) = self.require_ready().await?;
        self.require_client(id).await?;

        if self.queue_clear().await {
            match self.gateway.update_client(id, &draft).await {
                Ok(record) => {
                    self.note_connectivity(true);
                    let adopted = record.clone();
                    self.with_current_session(epoch, |session| {
                        let name = record.name.clone();
                        if let Some(local) = session.clients.iter_mut().find(|c| c.id == id) {
                            *local = record;
                        }
                        rename_linked_transactions(session, id, &name);
                        refresh_revenue(session);
                    })
                    .await?;
                    self.notifications.notify(SyncEvent::SavedToCloud {
                        record: RecordKind::Client,
                        id,
                    });
                    return Ok(MutationOutcome::Synced(adopted));
                }
                Err(err) if err.is_connectivity() => self.note_connectivity(false),
                Err(err) if err.is_not_found() => {
                    self.drop_stale_client(epoch, id).await?;
                    return Err(CoordinatorError::Conflict(id));
                }
                Err(err) => return Err(self.explicit_failure(err).await),
            }
        }

        let now = Utc::now();
        let updated = self
            .with_current_session(epoch, |session| {
                let record = session.clients.iter_mut().find(|c| c.id == id)?;
                record.apply_draft(&draft, now);
                let updated = record.clone();
                let name = updated.name.clone();
                session.pending.fold_update_client(id, &draft);
                rename_linked_transactions(session, id, &name);
                refresh_revenue(session);
                self.persist_pending(session);
                Some(updated)
            })
            .await?
            .ok_or(CoordinatorError::UnknownRecord(id))?;
        self.notifications.notify(SyncEvent::SavedLocally {
            record: RecordKind::Client,
            id,
        });
        Ok(MutationOutcome::SavedLocally(updated))
    }

    pub async fn delete_client(&self, id: Uuid) -> Result<MutationOutcome<Uuid>, CoordinatorError> {
        let _gate = self.write_gate.lock().await;
        let (_user, epoch) = self.require_ready().await?;
        self.require_client(id).await?;

        if self.queue_clear().await {
            match self.gateway.delete_client(id).await {
                Ok(()) => {
                    self.note_connectivity(true);
                    self.with_current_session(epoch, |session| {
                        remove_client_locally(session, id);
                    })
                    .await?;
                    self.notifications.notify(SyncEvent::SavedToCloud {
                        record: RecordKind::Client,
                        id,
                    });
                    return Ok(MutationOutcome::Synced(id));
                }
                Err(err) if err.is_connectivity() => self.note_connectivity(false),
                Err(err) if err.is_not_found() => {
                    self.drop_stale_client(epoch, id).await?;
                    return Ok(MutationOutcome::Synced(id));
                }
                Err(err) => return Err(self.explicit_failure(err).await),
            }
        }

        self.with_current_session(epoch, |session| {
            remove_client_locally(session, id);
            session.pending.fold_delete_client(id);
            self.persist_pending(session);
        })
        .await?;
        self.notifications.notify(SyncEvent::SavedLocally {
            record: RecordKind::Client,
            id,
        });
        Ok(MutationOutcome::SavedLocally(id))
    }

    // ---- maintenance ----

    /// Cheap reachability probe against the status endpoint. Updates the
    /// connectivity flag as a side effect.
    pub async fn server_reachable(&self) -> bool {
        let online = self.gateway.is_online().await;
        self.note_connectivity(online);
        online
    }

    /// Recomputes the revenue projection and persists only when a value
    /// moved, so repeated calls against unchanged data write nothing.
    pub async fn recompute_revenue(&self) -> Result<bool, CoordinatorError> {
        let _gate = self.write_gate.lock().await;
        let (_user, epoch) = self.require_ready().await?;
        let mut session = self.session.write().await;
        if session.epoch != epoch {
            return Err(CoordinatorError::Superseded);
        }
        let changed = refresh_revenue(&mut session);
        if changed {
            self.persist_working_set(&session);
        }
        Ok(changed)
    }

    /// Replays queued writes in FIFO order, stopping at the first
    /// connectivity failure. When the queue drains and the session was
    /// working from cache, a full reconcile brings it back online.
    pub async fn flush_pending(&self) -> Result<FlushReport, CoordinatorError> {
        let _gate = self.write_gate.lock().await;
        let Ok((_user, epoch)) = self.require_ready().await else {
            return Ok(FlushReport::default());
        };

        let mut report = FlushReport::default();
        loop {
            let op = {
                let session = self.session.read().await;
                if session.epoch != epoch {
                    return Ok(report);
                }
                let Some(op) = session.pending.front().cloned() else {
                    break;
                };
                op
            };
            match self.replay_op(epoch, &op).await {
                Ok(StepOutcome::Applied) | Ok(StepOutcome::Dropped) => report.flushed += 1,
                Ok(StepOutcome::Halted) => break,
                Err(CoordinatorError::Superseded) => return Ok(report),
                Err(err) => return Err(err),
            }
        }

        report.remaining = self.pending_count().await;
        if report.flushed > 0 {
            info!(flushed = report.flushed, remaining = report.remaining, "pending queue drained");
            self.notifications.notify(SyncEvent::QueueFlushed {
                flushed: report.flushed,
                remaining: report.remaining,
            });
        }

        if report.remaining == 0 {
            let mode = match self.phase().await {
                SessionPhase::Ready(mode) => Some(mode),
                _ => None,
            };
            if matches!(mode, Some(ReadyMode::Degraded | ReadyMode::Empty)) {
                self.reconcile(epoch).await?;
            }
        }
        Ok(report)
    }

    async fn replay_op(&self, epoch: u64, op: &PendingOp) -> Result<StepOutcome, CoordinatorError> {
        match op {
            PendingOp::CreateTransaction {
                provisional_id,
                draft,
            } => match self.gateway.create_transaction(draft).await {
                Ok(record) => {
                    let id = record.id;
                    self.with_current_session(epoch, |session| {
                        if let Some(local) = session
                            .transactions
                            .iter_mut()
                            .find(|t| t.id == *provisional_id)
                        {
                            *local = record;
                        } else {
                            session.transactions.push(record);
                        }
                        refresh_revenue(session);
                        session.pending.pop_front();
                        self.persist_pending(session);
                    })
                    .await?;
                    self.notifications.notify(SyncEvent::RecordSynced {
                        record: RecordKind::Transaction,
                        provisional_id: *provisional_id,
                        id,
                    });
                    Ok(StepOutcome::Applied)
                }
                Err(err) => self.queue_failure(epoch, op, err).await,
            },
            PendingOp::UpdateTransaction { id, draft } => {
                match self.gateway.update_transaction(*id, draft).await {
                    Ok(record) => {
                        self.with_current_session(epoch, |session| {
                            if let Some(local) =
                                session.transactions.iter_mut().find(|t| t.id == *id)
                            {
                                *local = record;
                            }
                            refresh_revenue(session);
                            session.pending.pop_front();
                            self.persist_pending(session);
                        })
                        .await?;
                        self.notifications.notify(SyncEvent::SavedToCloud {
                            record: RecordKind::Transaction,
                            id: *id,
                        });
                        Ok(StepOutcome::Applied)
                    }
                    Err(err) => self.queue_failure(epoch, op, err).await,
                }
            }
            PendingOp::DeleteTransaction { id } => {
                match self.gateway.delete_transaction(*id).await {
                    Ok(()) => {
                        self.finish_queued_delete(epoch).await?;
                        self.notifications.notify(SyncEvent::SavedToCloud {
                            record: RecordKind::Transaction,
                            id: *id,
                        });
                        Ok(StepOutcome::Applied)
                    }
                    Err(err) => self.queue_failure(epoch, op, err).await,
                }
            }
            PendingOp::CreateClient {
                provisional_id,
                draft,
            } => match self.gateway.create_client(draft).await {
                Ok(record) => {
                    let id = record.id;
                    self.with_current_session(epoch, |session| {
                        let name = record.name.clone();
                        if let Some(local) =
                            session.clients.iter_mut().find(|c| c.id == *provisional_id)
                        {
                            *local = record;
                        } else {
                            session.clients.push(record);
                        }
                        // provisional transactions may point at the old id
                        for tx in session
                            .transactions
                            .iter_mut()
                            .filter(|t| t.client_id == Some(*provisional_id))
                        {
                            tx.client_id = Some(id);
                            tx.client_name = Some(name.clone());
                        }
                        session.pending.retarget_client(*provisional_id, id);
                        refresh_revenue(session);
                        session.pending.pop_front();
                        self.persist_pending(session);
                    })
                    .await?;
                    self.notifications.notify(SyncEvent::RecordSynced {
                        record: RecordKind::Client,
                        provisional_id: *provisional_id,
                        id,
                    });
                    Ok(StepOutcome::Applied)
                }
                Err(err) => self.queue_failure(epoch, op, err).await,
            },
            PendingOp::UpdateClient { id, draft } => {
                match self.gateway.update_client(*id, draft).await {
                    Ok(record) => {
                        self.with_current_session(epoch, |session| {
                            let name = record.name.clone();
                            if let Some(local) = session.clients.iter_mut().find(|c| c.id == *id) {
                                *local = record;
                            }
                            rename_linked_transactions(session, *id, &name);
                            refresh_revenue(session);
                            session.pending.pop_front();
                            self.persist_pending(session);
                        })
                        .await?;
                        self.notifications.notify(SyncEvent::SavedToCloud {
                            record: RecordKind::Client,
                            id: *id,
                        });
                        Ok(StepOutcome::Applied)
                    }
                    Err(err) => self.queue_failure(epoch, op, err).await,
                }
            }
            PendingOp::DeleteClient { id } => match self.gateway.delete_client(*id).await {
                Ok(()) => {
                    self.finish_queued_delete(epoch).await?;
                    self.notifications.notify(SyncEvent::SavedToCloud {
                        record: RecordKind::Client,
                        id: *id,
                    });
                    Ok(StepOutcome::Applied)
                }
                Err(err) => self.queue_failure(epoch, op, err).await,
            },
        }
    }

    async fn finish_queued_delete(&self, epoch: u64) -> Result<(), CoordinatorError> {
        self.with_current_session(epoch, |session| {
            session.pending.pop_front();
            self.persist_pending(session);
        })
        .await
    }

    async fn queue_failure(
        &self,
        epoch: u64,
        op: &PendingOp,
        err: GatewayError,
    ) -> Result<StepOutcome, CoordinatorError> {
        if err.is_connectivity() {
            self.note_connectivity(false);
            debug!(%err, "server still unreachable, keeping queue");
            return Ok(StepOutcome::Halted);
        }
        if err.is_auth() {
            return Err(self.expire_session().await);
        }

        let id = op.target_id();
        let kind = op.record_kind();
        if err.is_not_found() {
            // the record vanished on the server; drop the op and any stale
            // local copy rather than resurrecting it
            self.with_current_session(epoch, |session| {
                match kind {
                    RecordKind::Transaction => {
                        session.transactions.retain(|t| t.id != id);
                        refresh_revenue(session);
                    }
                    RecordKind::Client => remove_client_locally(session, id),
                }
                session.pending.pop_front();
                self.persist_pending(session);
            })
            .await?;
            warn!(%id, %kind, "queued write targeted a record deleted elsewhere");
            self.notifications
                .notify(SyncEvent::ConflictDropped { record: kind, id });
            return Ok(StepOutcome::Dropped);
        }

        warn!(%id, %kind, %err, "server rejected queued write, dropping it");
        self.with_current_session(epoch, |session| {
            session.pending.pop_front();
            self.persist_pending(session);
        })
        .await?;
        self.notifications.notify(SyncEvent::QueueRejected {
            record: kind,
            id,
            status: err.status().unwrap_or(0),
        });
        Ok(StepOutcome::Dropped)
    }

    /// Pushes the local snapshot through the bulk sync endpoint and adopts
    /// the merged result, moving the session back to online.
    async fn reconcile(&self, epoch: u64) -> Result<(), CoordinatorError> {
        let snapshot = {
            let session = self.session.read().await;
            if session.epoch != epoch {
                return Ok(());
            }
            SyncRequest {
                transactions: session.transactions.clone(),
                clients: session.clients.clone(),
            }
        };
        match self.gateway.sync(&snapshot).await {
            Ok(merged) => {
                self.note_connectivity(true);
                self.with_current_session(epoch, |session| {
                    session.transactions = merged.transactions;
                    session.clients = merged.clients;
                    refresh_revenue(session);
                    session.phase = SessionPhase::Ready(ReadyMode::Online);
                })
                .await?;
                info!("working set reconciled with server");
                self.notifications.notify(SyncEvent::SessionLoaded {
                    mode: ReadyMode::Online,
                });
                Ok(())
            }
            Err(err) if err.is_connectivity() => {
                self.note_connectivity(false);
                Ok(())
            }
            Err(err) if err.is_auth() => Err(self.expire_session().await),
            Err(err) => {
                warn!(%err, "full reconcile rejected");
                Ok(())
            }
        }
    }

    // ---- internals ----

    async fn require_ready(&self) -> Result<(User, u64), CoordinatorError> {
        let session = self.session.read().await;
        match (&session.phase, &session.user) {
            (SessionPhase::Ready(_), Some(user)) => Ok((user.clone(), session.epoch)),
            _ => Err(CoordinatorError::NotLoggedIn),
        }
    }

    async fn require_transaction(&self, id: Uuid) -> Result<(), CoordinatorError> {
        let session = self.session.read().await;
        if session.transactions.iter().any(|t| t.id == id) {
            Ok(())
        } else {
            Err(CoordinatorError::UnknownRecord(id))
        }
    }

    async fn require_client(&self, id: Uuid) -> Result<(), CoordinatorError> {
        let session = self.session.read().await;
        if session.clients.iter().any(|c| c.id == id) {
            Ok(())
        } else {
            Err(CoordinatorError::UnknownRecord(id))
        }
    }

    /// New writes join the queue whenever older ones are waiting, keeping
    /// the server-visible order identical to the caller's.
    async fn queue_clear(&self) -> bool {
        self.session.read().await.pending.is_empty()
    }

    async fn with_current_session<R>(
        &self,
        epoch: u64,
        apply: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, CoordinatorError> {
        let mut session = self.session.write().await;
        if session.epoch != epoch {
            debug!("session changed mid-flight, dropping result");
            return Err(CoordinatorError::Superseded);
        }
        let result = apply(&mut session);
        self.persist_working_set(&session);
        Ok(result)
    }

    fn persist_working_set(&self, session: &Session) {
        let Some(user) = &session.user else {
            return;
        };
        self.cache.set(
            &collection_key(DataKind::Transactions, user.id),
            &session.transactions,
        );
        self.cache
            .set(&collection_key(DataKind::Clients, user.id), &session.clients);
    }

    fn persist_pending(&self, session: &Session) {
        let Some(user) = &session.user else {
            return;
        };
        self.cache.set(
            &collection_key(DataKind::PendingOps, user.id),
            &session.pending,
        );
    }

    async fn resolve_client_name(&self, mut draft: TransactionDraft) -> TransactionDraft {
        if let Some(client_id) = draft.client_id {
            let session = self.session.read().await;
            if let Some(client) = session.clients.iter().find(|c| c.id == client_id) {
                draft.client_name = Some(client.name.clone());
            }
        }
        draft
    }

    async fn drop_stale_transaction(&self, epoch: u64, id: Uuid) -> Result<(), CoordinatorError> {
        self.with_current_session(epoch, |session| {
            session.transactions.retain(|t| t.id != id);
            refresh_revenue(session);
        })
        .await?;
        warn!(%id, "transaction was deleted elsewhere, dropping local copy");
        self.notifications.notify(SyncEvent::ConflictDropped {
            record: RecordKind::Transaction,
            id,
        });
        Ok(())
    }

    async fn drop_stale_client(&self, epoch: u64, id: Uuid) -> Result<(), CoordinatorError> {
        self.with_current_session(epoch, |session| {
            remove_client_locally(session, id);
        })
        .await?;
        warn!(%id, "client was deleted elsewhere, dropping local copy");
        self.notifications.notify(SyncEvent::ConflictDropped {
            record: RecordKind::Client,
            id,
        });
        Ok(())
    }

    async fn explicit_failure(&self, err: GatewayError) -> CoordinatorError {
        if err.is_auth() {
            self.expire_session().await
        } else {
            CoordinatorError::Gateway(err)
        }
    }

    /// The server no longer accepts our token; only a fresh login helps.
    async fn expire_session(&self) -> CoordinatorError {
        {
            let mut session = self.session.write().await;
            session.epoch += 1;
            session.phase = SessionPhase::LoggedOut;
            session.user = None;
            session.transactions.clear();
            session.clients.clear();
            session.pending = PendingQueue::default();
        }
        self.gateway.set_token(None);
        self.cache.remove(API_TOKEN_KEY);
        self.cache.remove(CURRENT_USER_KEY);
        warn!("bearer token rejected, session needs a fresh login");
        self.notifications.notify(SyncEvent::AuthExpired);
        CoordinatorError::AuthExpired
    }

    fn note_connectivity(&self, online: bool) {
        let was = self.online.swap(online, Ordering::Relaxed);
        if was != online {
            info!(online, "connectivity changed");
            self.notifications
                .notify(SyncEvent::ConnectivityChanged { online });
        }
    }
}

fn refresh_revenue(session: &mut Session) -> bool {
    recompute_total_revenue(&mut session.clients, &session.transactions)
}

fn rename_linked_transactions(session: &mut Session, client_id: Uuid, name: &str) {
    for tx in session
        .transactions
        .iter_mut()
        .filter(|t| t.client_id == Some(client_id))
    {
        if tx.client_name.as_deref() != Some(name) {
            tx.client_name = Some(name.to_string());
        }
    }
}

/// Deleting a client keeps its transactions, detached from the id but still
/// carrying the last known name for display.
fn remove_client_locally(session: &mut Session, id: Uuid) {
    session.clients.retain(|c| c.id != id);
    for tx in session
        .transactions
        .iter_mut()
        .filter(|t| t.client_id == Some(id))
    {
        tx.client_id = None;
    }
    refresh_revenue(session);
}

