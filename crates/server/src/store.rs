//! File-backed JSON store, one file per collection.
//!
//! Small enough data that every mutation rewrites the whole collection file.
//! Writes go through a temp file in the same directory so a crash never
//! leaves a half-written file behind; an unreadable file is treated as empty
//! rather than taking the server down.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use models::{
    Client, ClientDraft, SyncRequest, SyncResponse, Transaction, TransactionDraft, User, UserRole,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

const USERS_FILE: &str = "users.json";
const TRANSACTIONS_FILE: &str = "transactions.json";
const CLIENTS_FILE: &str = "clients.json";

/// Account row as stored on disk. The password hash never leaves this type;
/// [`StoredUser::profile`] strips it for wire responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl StoredUser {
    pub fn profile(&self) -> User {
        User {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role,
        }
    }
}

pub struct JsonDb {
    dir: PathBuf,
    users: RwLock<Vec<StoredUser>>,
    transactions: RwLock<Vec<Transaction>>,
    clients: RwLock<Vec<Client>>,
}

impl JsonDb {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let users = read_collection(&dir.join(USERS_FILE));
        let transactions = read_collection(&dir.join(TRANSACTIONS_FILE));
        let clients = read_collection(&dir.join(CLIENTS_FILE));
        Ok(Self {
            dir,
            users: RwLock::new(users),
            transactions: RwLock::new(transactions),
            clients: RwLock::new(clients),
        })
    }

    /// Creates the two default accounts on first run so a fresh install is
    /// immediately usable.
    pub async fn seed_default_users(&self) -> anyhow::Result<()> {
        let mut users = self.users.write().await;
        if !users.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let defaults = [
            ("admin@audiovisual.com", "admin123", "Administrator", UserRole::Admin),
            ("user@audiovisual.com", "user123", "Standard User", UserRole::User),
        ];
        for (email, password, name, role) in defaults {
            users.push(StoredUser {
                id: Uuid::new_v4(),
                email: email.to_string(),
                password_hash: crate::auth::hash_password(password)?,
                name: name.to_string(),
                role,
                created_at: now,
            });
        }
        write_collection(&self.dir, USERS_FILE, &users)?;
        info!("seeded default accounts");
        Ok(())
    }

    // ---- users ----

    pub async fn find_user_by_email(&self, email: &str) -> Option<StoredUser> {
        self.users
            .read()
            .await
            .iter()
            .find(|u| u.email == email)
            .cloned()
    }

    /// Returns `None` when the email is already taken.
    pub async fn create_user(&self, user: StoredUser) -> io::Result<Option<StoredUser>> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.email == user.email) {
            return Ok(None);
        }
        users.push(user.clone());
        write_collection(&self.dir, USERS_FILE, &users)?;
        Ok(Some(user))
    }

    // ---- transactions ----

    pub async fn transactions_for(&self, user_id: Uuid) -> Vec<Transaction> {
        let mut rows: Vec<Transaction> = self
            .transactions
            .read()
            .await
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        sort_transactions(&mut rows);
        rows
    }

    pub async fn create_transaction(
        &self,
        user_id: Uuid,
        draft: &TransactionDraft,
        now: DateTime<Utc>,
    ) -> io::Result<Transaction> {
        let resolved = self.linked_client_name(user_id, draft.client_id).await;
        let mut record = Transaction::from_draft(Uuid::new_v4(), user_id, draft, now);
        if resolved.is_some() {
            record.client_name = resolved;
        }
        let mut transactions = self.transactions.write().await;
        transactions.push(record.clone());
        write_collection(&self.dir, TRANSACTIONS_FILE, &transactions)?;
        Ok(record)
    }

    pub async fn update_transaction(
        &self,
        user_id: Uuid,
        id: Uuid,
        draft: &TransactionDraft,
        now: DateTime<Utc>,
    ) -> io::Result<Option<Transaction>> {
        let resolved = self.linked_client_name(user_id, draft.client_id).await;
        let mut transactions = self.transactions.write().await;
        let Some(record) = transactions
            .iter_mut()
            .find(|t| t.id == id && t.user_id == user_id)
        else {
            return Ok(None);
        };
        record.apply_draft(draft, now);
        if resolved.is_some() {
            record.client_name = resolved;
        }
        let updated = record.clone();
        write_collection(&self.dir, TRANSACTIONS_FILE, &transactions)?;
        Ok(Some(updated))
    }

    pub async fn delete_transaction(&self, user_id: Uuid, id: Uuid) -> io::Result<bool> {
        let mut transactions = self.transactions.write().await;
        let before = transactions.len();
        transactions.retain(|t| !(t.id == id && t.user_id == user_id));
        if transactions.len() == before {
            return Ok(false);
        }
        write_collection(&self.dir, TRANSACTIONS_FILE, &transactions)?;
        Ok(true)
    }

    // ---- clients ----

    pub async fn clients_for(&self, user_id: Uuid) -> Vec<Client> {
        let mut rows: Vec<Client> = self
            .clients
            .read()
            .await
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        sort_clients(&mut rows);
        rows
    }

    pub async fn create_client(
        &self,
        user_id: Uuid,
        draft: &ClientDraft,
        now: DateTime<Utc>,
    ) -> io::Result<Client> {
        let record = Client::from_draft(Uuid::new_v4(), user_id, draft, now);
        let mut clients = self.clients.write().await;
        clients.push(record.clone());
        write_collection(&self.dir, CLIENTS_FILE, &clients)?;
        Ok(record)
    }

    /// Updates a client and refreshes the denormalized name on every
    /// transaction that links it.
    pub async fn update_client(
        &self,
        user_id: Uuid,
        id: Uuid,
        draft: &ClientDraft,
        now: DateTime<Utc>,
    ) -> io::Result<Option<Client>> {
        let updated = {
            let mut clients = self.clients.write().await;
            let Some(record) = clients.iter_mut().find(|c| c.id == id && c.user_id == user_id)
            else {
                return Ok(None);
            };
            record.apply_draft(draft, now);
            let updated = record.clone();
            write_collection(&self.dir, CLIENTS_FILE, &clients)?;
            updated
        };

        let mut transactions = self.transactions.write().await;
        let mut changed = false;
        for tx in transactions
            .iter_mut()
            .filter(|t| t.user_id == user_id && t.client_id == Some(id))
        {
            if tx.client_name.as_deref() != Some(updated.name.as_str()) {
                tx.client_name = Some(updated.name.clone());
                changed = true;
            }
        }
        if changed {
            write_collection(&self.dir, TRANSACTIONS_FILE, &transactions)?;
        }
        Ok(Some(updated))
    }

    /// Deletes a client. Its transactions survive, detached from the id but
    /// keeping the stored name for display.
    pub async fn delete_client(&self, user_id: Uuid, id: Uuid) -> io::Result<bool> {
        {
            let mut clients = self.clients.write().await;
            let before = clients.len();
            clients.retain(|c| !(c.id == id && c.user_id == user_id));
            if clients.len() == before {
                return Ok(false);
            }
            write_collection(&self.dir, CLIENTS_FILE, &clients)?;
        }

        let mut transactions = self.transactions.write().await;
        let mut changed = false;
        for tx in transactions
            .iter_mut()
            .filter(|t| t.user_id == user_id && t.client_id == Some(id))
        {
            tx.client_id = None;
            changed = true;
        }
        if changed {
            write_collection(&self.dir, TRANSACTIONS_FILE, &transactions)?;
        }
        Ok(true)
    }

    // ---- sync ----

    /// Insert-only merge: rows the server already has win, unseen client
    /// rows are adopted with their ids kept, so replayed offline work keeps
    /// stable identities. Returns the caller's merged collections.
    pub async fn sync(
        &self,
        user_id: Uuid,
        request: SyncRequest,
        now: DateTime<Utc>,
    ) -> io::Result<SyncResponse> {
        let merged_transactions = {
            let mut transactions = self.transactions.write().await;
            let mut changed = false;
            for mut incoming in request.transactions {
                if transactions.iter().any(|t| t.id == incoming.id) {
                    continue;
                }
                incoming.user_id = user_id;
                incoming.updated_at = now;
                transactions.push(incoming);
                changed = true;
            }
            if changed {
                write_collection(&self.dir, TRANSACTIONS_FILE, &transactions)?;
            }
            let mut rows: Vec<Transaction> = transactions
                .iter()
                .filter(|t| t.user_id == user_id)
                .cloned()
                .collect();
            sort_transactions(&mut rows);
            rows
        };

        let merged_clients = {
            let mut clients = self.clients.write().await;
            let mut changed = false;
            for mut incoming in request.clients {
                if clients.iter().any(|c| c.id == incoming.id) {
                    continue;
                }
                incoming.user_id = user_id;
                incoming.updated_at = now;
                clients.push(incoming);
                changed = true;
            }
            if changed {
                write_collection(&self.dir, CLIENTS_FILE, &clients)?;
            }
            let mut rows: Vec<Client> = clients
                .iter()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect();
            sort_clients(&mut rows);
            rows
        };

        Ok(SyncResponse {
            transactions: merged_transactions,
            clients: merged_clients,
        })
    }

    async fn linked_client_name(&self, user_id: Uuid, client_id: Option<Uuid>) -> Option<String> {
        let client_id = client_id?;
        self.clients
            .read()
            .await
            .iter()
            .find(|c| c.id == client_id && c.user_id == user_id)
            .map(|c| c.name.clone())
    }
}

fn sort_transactions(rows: &mut [Transaction]) {
    rows.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
}

fn sort_clients(rows: &mut [Client]) {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn read_collection<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_slice(&bytes) {
        Ok(rows) => rows,
        Err(err) => {
            warn!(path = %path.display(), %err, "unreadable data file, starting empty");
            Vec::new()
        }
    }
}

fn write_collection<T: Serialize>(dir: &Path, name: &str, rows: &[T]) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(rows).map_err(io::Error::other)?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(&bytes)?;
    file.persist(dir.join(name)).map_err(|e| e.error)?;
    Ok(())
}
