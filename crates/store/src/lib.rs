//! Persistent local cache with graceful degradation.
//!
//! Entries are JSON values addressed by string key. At construction the
//! cache probes for a working durable backend (one file per entry under a
//! data directory) and falls back to a process-lifetime in-memory backend
//! when the directory is unusable. A null backend exists for the endpoint
//! of the chain; it accepts every call and stores nothing.
//!
//! All operations are total: a failed write reports `false`, a failed read
//! reports `None`, and nothing here ever panics on I/O.

pub mod backend;
pub mod cache;

pub use backend::{DurableBackend, NullBackend, SessionBackend, StorageBackend, StorageKind};
pub use cache::{API_TOKEN_KEY, CURRENT_USER_KEY, CacheStore, DataKind, StorageInfo, collection_key};
