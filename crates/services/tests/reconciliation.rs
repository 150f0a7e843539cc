//! Coordinator behavior against a scripted in-memory server: remote-first
//! loads with cache fallback, optimistic writes, queue replay, conflict
//! handling and session expiry.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use models::{
    AuthSession, Client, ClientDraft, ClientStatus, ContractType, RegisterRequest, ServerStatus,
    SyncRequest, SyncResponse, Transaction, TransactionDraft, TransactionKind, User, UserRole,
};
use rust_decimal::Decimal;
use secrecy::SecretString;
use services::{
    Coordinator, CoordinatorError, GatewayError, ReadyMode, RemoteGateway, SessionPhase, SyncEvent,
};
use store::{
    API_TOKEN_KEY, CURRENT_USER_KEY, CacheStore, SessionBackend, StorageBackend, StorageKind,
};
use tokio::sync::{Mutex, Notify, broadcast};
use uuid::Uuid;

const PASSWORD: &str = "secret123";

fn test_user() -> User {
    User {
        id: Uuid::from_u128(1),
        email: "pat@example.com".to_string(),
        name: "Pat".to_string(),
        role: UserRole::User,
    }
}

fn second_user() -> User {
    User {
        id: Uuid::from_u128(2),
        email: "sam@example.com".to_string(),
        name: "Sam".to_string(),
        role: UserRole::User,
    }
}

fn tx_draft(description: &str, amount: i64) -> TransactionDraft {
    TransactionDraft {
        kind: TransactionKind::Income,
        description: description.to_string(),
        amount: Decimal::new(amount, 0),
        category: "filming".to_string(),
        date: chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        client_id: None,
        client_name: None,
        person: Some("walk-in".to_string()),
    }
}

fn client_draft(name: &str) -> ClientDraft {
    ClientDraft {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        phone: "555-0100".to_string(),
        company: None,
        address: "10 Main St".to_string(),
        last_project: "launch video".to_string(),
        status: ClientStatus::Active,
        contract_type: ContractType::Project,
    }
}

/// Pause point inside the fake's create handler, used to order a logout
/// between a request going out and its response coming back.
struct Gate {
    entered: Notify,
    release: Notify,
}

#[derive(Default)]
struct Remote {
    transactions: Vec<Transaction>,
    clients: Vec<Client>,
}

struct FakeServer {
    online: AtomicBool,
    auth_ok: AtomicBool,
    /// Who the last login authenticated; fetches and creates are scoped to it.
    current: StdMutex<Uuid>,
    data: Mutex<Remote>,
    /// Requests received, counted at entry so failed attempts show up too.
    tx_creates: AtomicUsize,
    client_creates: AtomicUsize,
    syncs: AtomicUsize,
    hold_create: Mutex<Option<Arc<Gate>>>,
}

impl FakeServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(true),
            auth_ok: AtomicBool::new(true),
            current: StdMutex::new(test_user().id),
            data: Mutex::new(Remote::default()),
            tx_creates: AtomicUsize::new(0),
            client_creates: AtomicUsize::new(0),
            syncs: AtomicUsize::new(0),
            hold_create: Mutex::new(None),
        })
    }

    fn current_user_id(&self) -> Uuid {
        *self.current.lock().unwrap()
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn reject_auth(&self) {
        self.auth_ok.store(false, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), GatewayError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::Transport("connection refused".to_string()))
        }
    }

    fn check_auth(&self) -> Result<(), GatewayError> {
        if self.auth_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::Unauthorized)
        }
    }

    async fn seed_transaction(&self, description: &str, amount: i64) -> Transaction {
        let record = Transaction::from_draft(
            Uuid::new_v4(),
            test_user().id,
            &tx_draft(description, amount),
            Utc::now(),
        );
        self.data.lock().await.transactions.push(record.clone());
        record
    }

    async fn remove_transaction(&self, id: Uuid) {
        self.data.lock().await.transactions.retain(|t| t.id != id);
    }

    async fn transactions(&self) -> Vec<Transaction> {
        self.data.lock().await.transactions.clone()
    }
}

#[async_trait]
impl RemoteGateway for FakeServer {
    fn set_token(&self, _token: Option<SecretString>) {}

    async fn login(&self, email: &str, password: &str) -> Result<AuthSession, GatewayError> {
        self.check_online()?;
        let user = [test_user(), second_user()]
            .into_iter()
            .find(|u| u.email == email);
        match user {
            Some(user) if password == PASSWORD => {
                *self.current.lock().unwrap() = user.id;
                Ok(AuthSession {
                    user,
                    token: "fake-token".to_string(),
                })
            }
            _ => Err(GatewayError::Unauthorized),
        }
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthSession, GatewayError> {
        self.check_online()?;
        let user = User {
            id: Uuid::new_v4(),
            email: request.email.clone(),
            name: request.name.clone(),
            role: request.role.unwrap_or_default(),
        };
        *self.current.lock().unwrap() = user.id;
        Ok(AuthSession {
            user,
            token: "fake-token".to_string(),
        })
    }

    async fn fetch_transactions(&self) -> Result<Vec<Transaction>, GatewayError> {
        self.check_online()?;
        self.check_auth()?;
        let uid = self.current_user_id();
        Ok(self
            .data
            .lock()
            .await
            .transactions
            .iter()
            .filter(|t| t.user_id == uid)
            .cloned()
            .collect())
    }

    async fn create_transaction(
        &self,
        draft: &TransactionDraft,
    ) -> Result<Transaction, GatewayError> {
        self.tx_creates.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.check_auth()?;
        let gate = self.hold_create.lock().await.clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let record =
            Transaction::from_draft(Uuid::new_v4(), self.current_user_id(), draft, Utc::now());
        self.data.lock().await.transactions.push(record.clone());
        Ok(record)
    }

    async fn update_transaction(
        &self,
        id: Uuid,
        draft: &TransactionDraft,
    ) -> Result<Transaction, GatewayError> {
        self.check_online()?;
        self.check_auth()?;
        let mut data = self.data.lock().await;
        let Some(record) = data.transactions.iter_mut().find(|t| t.id == id) else {
            return Err(GatewayError::NotFound);
        };
        record.apply_draft(draft, Utc::now());
        Ok(record.clone())
    }

    async fn delete_transaction(&self, id: Uuid) -> Result<(), GatewayError> {
        self.check_online()?;
        self.check_auth()?;
        let mut data = self.data.lock().await;
        let before = data.transactions.len();
        data.transactions.retain(|t| t.id != id);
        if data.transactions.len() == before {
            return Err(GatewayError::NotFound);
        }
        Ok(())
    }

    async fn fetch_clients(&self) -> Result<Vec<Client>, GatewayError> {
        self.check_online()?;
        self.check_auth()?;
        let uid = self.current_user_id();
        Ok(self
            .data
            .lock()
            .await
            .clients
            .iter()
            .filter(|c| c.user_id == uid)
            .cloned()
            .collect())
    }

    async fn create_client(&self, draft: &ClientDraft) -> Result<Client, GatewayError> {
        self.client_creates.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.check_auth()?;
        let record = Client::from_draft(Uuid::new_v4(), self.current_user_id(), draft, Utc::now());
        self.data.lock().await.clients.push(record.clone());
        Ok(record)
    }

    async fn update_client(&self, id: Uuid, draft: &ClientDraft) -> Result<Client, GatewayError> {
        self.check_online()?;
        self.check_auth()?;
        let mut data = self.data.lock().await;
        let Some(record) = data.clients.iter_mut().find(|c| c.id == id) else {
            return Err(GatewayError::NotFound);
        };
        record.apply_draft(draft, Utc::now());
        Ok(record.clone())
    }

    async fn delete_client(&self, id: Uuid) -> Result<(), GatewayError> {
        self.check_online()?;
        self.check_auth()?;
        let mut data = self.data.lock().await;
        let before = data.clients.len();
        data.clients.retain(|c| c.id != id);
        if data.clients.len() == before {
            return Err(GatewayError::NotFound);
        }
        Ok(())
    }

    async fn sync(&self, snapshot: &SyncRequest) -> Result<SyncResponse, GatewayError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.check_auth()?;
        let uid = self.current_user_id();
        let mut data = self.data.lock().await;
        for incoming in &snapshot.transactions {
            if !data.transactions.iter().any(|t| t.id == incoming.id) {
                data.transactions.push(incoming.clone());
            }
        }
        for incoming in &snapshot.clients {
            if !data.clients.iter().any(|c| c.id == incoming.id) {
                data.clients.push(incoming.clone());
            }
        }
        Ok(SyncResponse {
            transactions: data
                .transactions
                .iter()
                .filter(|t| t.user_id == uid)
                .cloned()
                .collect(),
            clients: data
                .clients
                .iter()
                .filter(|c| c.user_id == uid)
                .cloned()
                .collect(),
        })
    }

    async fn status(&self) -> Result<ServerStatus, GatewayError> {
        self.check_online()?;
        Ok(ServerStatus::online("test"))
    }
}

async fn ready_coordinator(server: &Arc<FakeServer>) -> Coordinator {
    let coordinator = Coordinator::new(server.clone(), CacheStore::session_only());
    coordinator
        .login(&test_user().email, PASSWORD)
        .await
        .expect("login");
    coordinator
}

async fn next_event(rx: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a sync event")
        .expect("event channel closed")
}

async fn wait_for(
    rx: &mut broadcast::Receiver<SyncEvent>,
    matches: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    loop {
        let event = next_event(rx).await;
        if matches(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn login_loads_the_working_set_from_the_server() {
    let server = FakeServer::new();
    server.seed_transaction("existing job", 400).await;

    let coordinator = ready_coordinator(&server).await;

    assert_eq!(coordinator.phase().await, SessionPhase::Ready(ReadyMode::Online));
    let rows = coordinator.transactions().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].description, "existing job");
}

#[tokio::test]
async fn bad_password_leaves_no_session_behind() {
    let server = FakeServer::new();
    let coordinator = Coordinator::new(server.clone(), CacheStore::session_only());

    let err = coordinator
        .login(&test_user().email, "wrong")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Gateway(GatewayError::Unauthorized)
    ));
    assert_eq!(coordinator.phase().await, SessionPhase::Uninitialized);
}

#[tokio::test]
async fn restore_with_warm_cache_degrades_when_server_is_down() {
    let server = FakeServer::new();
    server.seed_transaction("cached job", 250).await;
    let dir = tempfile::tempdir().unwrap();

    // first run: online login fills the cache
    {
        let coordinator = Coordinator::new(server.clone(), CacheStore::open(dir.path()));
        coordinator
            .login(&test_user().email, PASSWORD)
            .await
            .unwrap();
    }

    server.set_online(false);
    let coordinator = Coordinator::new(server.clone(), CacheStore::open(dir.path()));
    let restored = coordinator.restore_session().await.unwrap();

    assert_eq!(restored, Some(test_user()));
    assert_eq!(
        coordinator.phase().await,
        SessionPhase::Ready(ReadyMode::Degraded)
    );
    let rows = coordinator.transactions().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].description, "cached job");
}

#[tokio::test]
async fn restore_with_cold_cache_starts_empty() {
    let server = FakeServer::new();
    server.set_online(false);

    // identity survived but the data directory did not
    let cache = CacheStore::session_only();
    cache.set(CURRENT_USER_KEY, &test_user());
    cache.set(API_TOKEN_KEY, &"stale-token".to_string());

    let coordinator = Coordinator::new(server.clone(), cache);
    let restored = coordinator.restore_session().await.unwrap();

    assert_eq!(restored, Some(test_user()));
    assert_eq!(
        coordinator.phase().await,
        SessionPhase::Ready(ReadyMode::Empty)
    );
    assert!(coordinator.transactions().await.is_empty());
}

#[tokio::test]
async fn working_sets_never_mix_across_users() {
    let server = FakeServer::new();
    let dir = tempfile::tempdir().unwrap();

    let coordinator = Coordinator::new(server.clone(), CacheStore::open(dir.path()));
    coordinator
        .login(&test_user().email, PASSWORD)
        .await
        .unwrap();
    server.set_online(false);
    coordinator
        .add_transaction(tx_draft("pat private", 40))
        .await
        .unwrap();
    coordinator.logout().await;
    server.set_online(true);

    // the second account starts clean on the same machine
    let coordinator = Coordinator::new(server.clone(), CacheStore::open(dir.path()));
    coordinator
        .login(&second_user().email, PASSWORD)
        .await
        .unwrap();
    assert!(coordinator.transactions().await.is_empty());
    assert_eq!(coordinator.pending_count().await, 0);
    coordinator
        .add_transaction(tx_draft("sam public", 90))
        .await
        .unwrap();
    coordinator.logout().await;

    // the first account's deferred write waited under its own cache key
    let coordinator = Coordinator::new(server.clone(), CacheStore::open(dir.path()));
    coordinator
        .login(&test_user().email, PASSWORD)
        .await
        .unwrap();
    assert_eq!(coordinator.pending_count().await, 1);
    assert!(coordinator.transactions().await.is_empty());

    let report = coordinator.flush_pending().await.unwrap();
    assert_eq!(report.flushed, 1);
    let rows = coordinator.transactions().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].description, "pat private");
    assert_eq!(rows[0].user_id, test_user().id);
}

#[tokio::test]
async fn deleted_records_stay_deleted_across_reloads() {
    let server = FakeServer::new();
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::new(server.clone(), CacheStore::open(dir.path()));
    coordinator
        .login(&test_user().email, PASSWORD)
        .await
        .unwrap();

    let created = coordinator
        .add_transaction(tx_draft("short lived", 20))
        .await
        .unwrap();
    coordinator
        .delete_transaction(created.record().id)
        .await
        .unwrap();
    assert!(coordinator.transactions().await.is_empty());
    assert!(server.transactions().await.is_empty());

    let coordinator = Coordinator::new(server.clone(), CacheStore::open(dir.path()));
    coordinator.restore_session().await.unwrap();
    assert!(coordinator.transactions().await.is_empty());
}

#[tokio::test]
async fn restore_without_stored_identity_is_a_no_op() {
    let server = FakeServer::new();
    let coordinator = Coordinator::new(server.clone(), CacheStore::session_only());

    assert_eq!(coordinator.restore_session().await.unwrap(), None);
    assert_eq!(coordinator.phase().await, SessionPhase::Uninitialized);
}

#[tokio::test]
async fn online_create_reaches_the_server_immediately() {
    let server = FakeServer::new();
    let coordinator = ready_coordinator(&server).await;
    let mut events = coordinator.subscribe();

    let outcome = coordinator
        .add_transaction(tx_draft("new shoot", 800))
        .await
        .unwrap();

    assert!(outcome.is_synced());
    assert_eq!(coordinator.pending_count().await, 0);
    assert_eq!(server.transactions().await.len(), 1);
    let event = wait_for(&mut events, |e| matches!(e, SyncEvent::SavedToCloud { .. })).await;
    assert_eq!(
        event,
        SyncEvent::SavedToCloud {
            record: services::RecordKind::Transaction,
            id: outcome.record().id,
        }
    );
}

#[tokio::test]
async fn offline_create_is_held_locally() {
    let server = FakeServer::new();
    let coordinator = ready_coordinator(&server).await;
    server.set_online(false);

    let outcome = coordinator
        .add_transaction(tx_draft("offline shoot", 300))
        .await
        .unwrap();

    assert!(!outcome.is_synced());
    assert_eq!(coordinator.pending_count().await, 1);
    assert_eq!(coordinator.transactions().await.len(), 1);
    assert!(server.transactions().await.is_empty());
    // the one failed attempt went out; connectivity errors are not retried
    assert_eq!(server.tx_creates.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.summary().await.pending_operations, 1);
}

#[tokio::test]
async fn a_non_empty_queue_blocks_direct_writes() {
    let server = FakeServer::new();
    let coordinator = ready_coordinator(&server).await;

    server.set_online(false);
    coordinator
        .add_transaction(tx_draft("first", 100))
        .await
        .unwrap();

    // connectivity is back, but the queue must drain before new writes go
    // direct or the server would see them out of order
    server.set_online(true);
    let outcome = coordinator
        .add_transaction(tx_draft("second", 200))
        .await
        .unwrap();

    assert!(!outcome.is_synced());
    assert_eq!(coordinator.pending_count().await, 2);
    // only the first write's failed attempt; the second never touched the wire
    assert_eq!(server.tx_creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn create_update_delete_offline_cancels_out() {
    let server = FakeServer::new();
    let coordinator = ready_coordinator(&server).await;
    server.set_online(false);

    let created = coordinator
        .add_transaction(tx_draft("ephemeral", 100))
        .await
        .unwrap();
    let id = created.record().id;
    coordinator
        .update_transaction(id, tx_draft("ephemeral edited", 150))
        .await
        .unwrap();
    coordinator.delete_transaction(id).await.unwrap();

    assert_eq!(coordinator.pending_count().await, 0);
    assert!(coordinator.transactions().await.is_empty());

    server.set_online(true);
    let report = coordinator.flush_pending().await.unwrap();
    assert_eq!(report.flushed, 0);
    // nothing left to replay beyond the first write's failed attempt
    assert_eq!(server.tx_creates.load(Ordering::SeqCst), 1);
    assert!(server.transactions().await.is_empty());
}

#[tokio::test]
async fn flush_replays_in_order_and_adopts_server_ids() {
    let server = FakeServer::new();
    let coordinator = ready_coordinator(&server).await;
    server.set_online(false);

    let first = coordinator
        .add_transaction(tx_draft("first offline", 100))
        .await
        .unwrap();
    coordinator
        .add_transaction(tx_draft("second offline", 200))
        .await
        .unwrap();
    // folds into the queued create instead of adding a new op
    coordinator
        .update_transaction(first.record().id, tx_draft("first offline edited", 120))
        .await
        .unwrap();
    assert_eq!(coordinator.pending_count().await, 2);

    let mut events = coordinator.subscribe();
    server.set_online(true);
    let report = coordinator.flush_pending().await.unwrap();

    assert_eq!(report.flushed, 2);
    assert_eq!(report.remaining, 0);
    // the first write's failed attempt plus one replay per queued create
    assert_eq!(server.tx_creates.load(Ordering::SeqCst), 3);

    // the queue drained in order and every provisional id was replaced
    let local = coordinator.transactions().await;
    let remote = server.transactions().await;
    assert_eq!(remote.len(), 2);
    assert_eq!(remote[0].description, "first offline edited");
    assert_eq!(remote[1].description, "second offline");
    for row in &local {
        assert!(remote.iter().any(|r| r.id == row.id));
    }
    assert_eq!(coordinator.pending_count().await, 0);

    let mut synced = 0;
    loop {
        match next_event(&mut events).await {
            SyncEvent::RecordSynced {
                provisional_id, id, ..
            } => {
                assert_ne!(provisional_id, id);
                synced += 1;
            }
            SyncEvent::QueueFlushed { flushed, remaining } => {
                assert_eq!(flushed, 2);
                assert_eq!(remaining, 0);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(synced, 2);

    // the session was loaded online, so no full reconcile was needed
    assert_eq!(server.syncs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn flush_reconciles_a_degraded_session_back_online() {
    let server = FakeServer::new();
    server.seed_transaction("old job", 500).await;
    let dir = tempfile::tempdir().unwrap();
    {
        let coordinator = Coordinator::new(server.clone(), CacheStore::open(dir.path()));
        coordinator
            .login(&test_user().email, PASSWORD)
            .await
            .unwrap();
    }

    server.set_online(false);
    let coordinator = Coordinator::new(server.clone(), CacheStore::open(dir.path()));
    coordinator.restore_session().await.unwrap();
    assert_eq!(
        coordinator.phase().await,
        SessionPhase::Ready(ReadyMode::Degraded)
    );
    coordinator
        .add_transaction(tx_draft("offline work", 75))
        .await
        .unwrap();

    server.set_online(true);
    let report = coordinator.flush_pending().await.unwrap();

    assert_eq!(report.flushed, 1);
    assert_eq!(server.syncs.load(Ordering::SeqCst), 1);
    assert_eq!(
        coordinator.phase().await,
        SessionPhase::Ready(ReadyMode::Online)
    );
    assert!(
        server
            .transactions()
            .await
            .iter()
            .any(|t| t.description == "offline work")
    );
}

#[tokio::test]
async fn updating_a_record_deleted_elsewhere_drops_the_stale_copy() {
    let server = FakeServer::new();
    let coordinator = ready_coordinator(&server).await;
    let created = coordinator
        .add_transaction(tx_draft("contested", 900))
        .await
        .unwrap();
    let id = created.record().id;

    server.remove_transaction(id).await;
    let mut events = coordinator.subscribe();

    let err = coordinator
        .update_transaction(id, tx_draft("contested edit", 950))
        .await
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::Conflict(conflicted) if conflicted == id));
    assert!(coordinator.transactions().await.is_empty());
    wait_for(&mut events, |e| {
        matches!(e, SyncEvent::ConflictDropped { id: dropped, .. } if *dropped == id)
    })
    .await;
}

#[tokio::test]
async fn deleting_a_record_deleted_elsewhere_is_already_done() {
    let server = FakeServer::new();
    let coordinator = ready_coordinator(&server).await;
    let created = coordinator
        .add_transaction(tx_draft("double delete", 60))
        .await
        .unwrap();
    let id = created.record().id;

    server.remove_transaction(id).await;
    let outcome = coordinator.delete_transaction(id).await.unwrap();

    assert!(outcome.is_synced());
    assert!(coordinator.transactions().await.is_empty());
    assert_eq!(coordinator.pending_count().await, 0);
}

#[tokio::test]
async fn a_conflicted_queued_update_does_not_block_the_rest() {
    let server = FakeServer::new();
    let coordinator = ready_coordinator(&server).await;
    let a = coordinator
        .add_transaction(tx_draft("job a", 100))
        .await
        .unwrap();
    let b = coordinator
        .add_transaction(tx_draft("job b", 200))
        .await
        .unwrap();

    server.set_online(false);
    coordinator
        .update_transaction(a.record().id, tx_draft("job a edited", 110))
        .await
        .unwrap();
    coordinator
        .update_transaction(b.record().id, tx_draft("job b edited", 210))
        .await
        .unwrap();
    assert_eq!(coordinator.pending_count().await, 2);

    server.remove_transaction(a.record().id).await;
    server.set_online(true);
    let mut events = coordinator.subscribe();
    let report = coordinator.flush_pending().await.unwrap();

    assert_eq!(report.flushed, 2);
    assert_eq!(report.remaining, 0);
    let local = coordinator.transactions().await;
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].description, "job b edited");
    assert!(
        server
            .transactions()
            .await
            .iter()
            .any(|t| t.description == "job b edited")
    );
    wait_for(&mut events, |e| {
        matches!(e, SyncEvent::ConflictDropped { id, .. } if *id == a.record().id)
    })
    .await;
}

#[tokio::test]
async fn auth_rejection_expires_the_session() {
    let server = FakeServer::new();
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::new(server.clone(), CacheStore::open(dir.path()));
    coordinator
        .login(&test_user().email, PASSWORD)
        .await
        .unwrap();
    let mut events = coordinator.subscribe();

    server.reject_auth();
    let err = coordinator
        .add_transaction(tx_draft("too late", 10))
        .await
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::AuthExpired));
    assert_eq!(coordinator.phase().await, SessionPhase::LoggedOut);
    wait_for(&mut events, |e| matches!(e, SyncEvent::AuthExpired)).await;

    // the stored identity is gone, so the next start cannot resurrect it
    let fresh = CacheStore::open(dir.path());
    assert!(fresh.get::<String>(API_TOKEN_KEY).is_none());
    assert!(fresh.get::<User>(CURRENT_USER_KEY).is_none());
}

#[tokio::test]
async fn results_from_a_closed_session_are_discarded() {
    let server = FakeServer::new();
    let coordinator = Arc::new(ready_coordinator(&server).await);

    let gate = Arc::new(Gate {
        entered: Notify::new(),
        release: Notify::new(),
    });
    *server.hold_create.lock().await = Some(gate.clone());

    let task = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.add_transaction(tx_draft("late arrival", 40)).await }
    });

    gate.entered.notified().await;
    coordinator.logout().await;
    gate.release.notify_one();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(CoordinatorError::Superseded)));
    assert!(coordinator.transactions().await.is_empty());
    assert_eq!(coordinator.pending_count().await, 0);
}

struct CountingBackend {
    inner: SessionBackend,
    writes: Arc<AtomicUsize>,
}

impl StorageBackend for CountingBackend {
    fn kind(&self) -> StorageKind {
        self.inner.kind()
    }

    fn read(&self, key: &str) -> Option<String> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, value: &str) -> bool {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(key, value)
    }

    fn remove(&self, key: &str) -> bool {
        self.inner.remove(key)
    }

    fn clear(&self) {
        self.inner.clear()
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }
}

#[tokio::test]
async fn recompute_without_changes_writes_nothing() {
    let server = FakeServer::new();
    {
        // server-side revenue is stale on purpose; the load fixes it
        let mut data = server.data.lock().await;
        let client = Client::from_draft(
            Uuid::new_v4(),
            test_user().id,
            &client_draft("Acme"),
            Utc::now(),
        );
        let mut draft = tx_draft("acme shoot", 700);
        draft.client_id = Some(client.id);
        let tx = Transaction::from_draft(Uuid::new_v4(), test_user().id, &draft, Utc::now());
        data.clients.push(client);
        data.transactions.push(tx);
    }

    let writes = Arc::new(AtomicUsize::new(0));
    let cache = CacheStore::with_backend(Box::new(CountingBackend {
        inner: SessionBackend::new(),
        writes: writes.clone(),
    }));
    let coordinator = Coordinator::new(server.clone(), cache);
    coordinator
        .login(&test_user().email, PASSWORD)
        .await
        .unwrap();

    let clients = coordinator.clients().await;
    assert_eq!(clients[0].total_revenue, Decimal::new(700, 0));

    let before = writes.load(Ordering::SeqCst);
    assert!(!coordinator.recompute_revenue().await.unwrap());
    assert!(!coordinator.recompute_revenue().await.unwrap());
    assert_eq!(writes.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn client_rename_and_delete_flow_through_linked_transactions() {
    let server = FakeServer::new();
    let coordinator = ready_coordinator(&server).await;

    let client = coordinator.add_client(client_draft("Acme")).await.unwrap();
    let client_id = client.record().id;
    let mut draft = tx_draft("acme spot", 1200);
    draft.client_id = Some(client_id);
    coordinator.add_transaction(draft).await.unwrap();

    let rows = coordinator.transactions().await;
    assert_eq!(rows[0].client_name.as_deref(), Some("Acme"));
    assert_eq!(
        coordinator.clients().await[0].total_revenue,
        Decimal::new(1200, 0)
    );

    coordinator
        .update_client(client_id, client_draft("Acme Studios"))
        .await
        .unwrap();
    let rows = coordinator.transactions().await;
    assert_eq!(rows[0].client_name.as_deref(), Some("Acme Studios"));

    coordinator.delete_client(client_id).await.unwrap();
    let rows = coordinator.transactions().await;
    assert_eq!(rows[0].client_id, None);
    assert_eq!(rows[0].client_name.as_deref(), Some("Acme Studios"));
    assert!(coordinator.clients().await.is_empty());
}
