use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use strum_macros::{Display, EnumString};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{DurableBackend, SessionBackend, StorageBackend, StorageKind};

/// Cache entry holding the last authenticated user, so a restart can restore
/// the session without a fresh login.
pub const CURRENT_USER_KEY: &str = "current_user";
/// Cache entry holding the bearer token that goes with [`CURRENT_USER_KEY`].
pub const API_TOKEN_KEY: &str = "api_token";

/// The per-user collections the cache knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DataKind {
    Transactions,
    Clients,
    PendingOps,
}

/// `{dataKind}_{userId}`, the namespacing that keeps one user's records out
/// of another's working set.
pub fn collection_key(kind: DataKind, user_id: Uuid) -> String {
    format!("{kind}_{user_id}")
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub kind: StorageKind,
    pub available: bool,
    pub entries: usize,
    pub approx_bytes: u64,
}

/// Typed facade over whichever [`StorageBackend`] survived the probe chain.
pub struct CacheStore {
    backend: Box<dyn StorageBackend>,
}

impl CacheStore {
    /// Probes `base_dir` for durable storage and falls back to the session
    /// backend when the directory is unusable.
    pub fn open(base_dir: &Path) -> Self {
        let cache_dir = base_dir.join("cache");
        match DurableBackend::open(cache_dir) {
            Some(backend) => Self {
                backend: Box::new(backend),
            },
            None => {
                warn!("durable cache unavailable, holding data for this session only");
                Self {
                    backend: Box::new(SessionBackend::new()),
                }
            }
        }
    }

    /// Opens under the platform data directory (`…/ledgerline`).
    pub fn open_default() -> Self {
        match dirs::data_dir() {
            Some(dir) => Self::open(&dir.join("ledgerline")),
            None => {
                warn!("no platform data directory, holding data for this session only");
                Self::session_only()
            }
        }
    }

    pub fn session_only() -> Self {
        Self {
            backend: Box::new(SessionBackend::new()),
        }
    }

    pub fn with_backend(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Serializes and stores `value`, then reads the entry back to confirm
    /// the write actually landed. Any failure reports `false`; the caller's
    /// in-memory state stays authoritative either way.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(key, %err, "could not encode cache entry");
                return false;
            }
        };
        if !self.backend.write(key, &encoded) {
            return false;
        }
        let verified = self.backend.read(key).as_deref() == Some(encoded.as_str());
        if !verified {
            warn!(key, "cache entry did not read back intact");
        }
        verified
    }

    /// Missing and unreadable entries both come back as `None`; a corrupt
    /// entry is dropped so it cannot poison later reads.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.backend.read(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, %err, "discarding corrupt cache entry");
                self.backend.remove(key);
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.backend.read(key).is_some()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.backend.remove(key)
    }

    pub fn clear(&self) {
        self.backend.clear();
    }

    pub fn describe(&self) -> StorageInfo {
        let keys = self.backend.keys();
        let approx_bytes = keys
            .iter()
            .filter_map(|key| self.backend.read(key))
            .map(|value| value.len() as u64)
            .sum();
        StorageInfo {
            kind: self.backend.kind(),
            available: self.backend.kind() != StorageKind::Unavailable,
            entries: keys.len(),
            approx_bytes,
        }
    }

    /// One-shot migration of entries written before per-user namespacing:
    /// a bare `transactions`/`clients` entry is moved under the given user
    /// (unless that user already has data) and the legacy entry removed.
    /// Returns how many collections were moved.
    pub fn migrate_unscoped(&self, user_id: Uuid) -> usize {
        let mut moved = 0;
        for kind in [DataKind::Transactions, DataKind::Clients] {
            let legacy = kind.to_string();
            let Some(raw) = self.backend.read(&legacy) else {
                continue;
            };
            let scoped = collection_key(kind, user_id);
            if !self.contains(&scoped) && self.backend.write(&scoped, &raw) {
                info!(collection = %kind, "migrated legacy cache entry to user scope");
                moved += 1;
            }
            self.backend.remove(&legacy);
        }
        moved
    }
}
