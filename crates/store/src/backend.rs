use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use strum_macros::Display;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, serde::Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Durable,
    Session,
    Unavailable,
}

/// Raw key/value persistence. Implementations never error out of these
/// methods; a write that cannot happen returns `false` and a read that
/// cannot happen returns `None`.
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> StorageKind;
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str) -> bool;
    fn remove(&self, key: &str) -> bool;
    fn clear(&self);
    fn keys(&self) -> Vec<String>;
}

/// One JSON file per entry under a dedicated directory. Writes go through a
/// temp file in the same directory and are renamed into place, so a crash
/// mid-write never leaves a truncated entry.
pub struct DurableBackend {
    dir: PathBuf,
}

const ENTRY_EXT: &str = "json";
const PROBE_KEY: &str = "__storage_probe__";

impl DurableBackend {
    /// Opens the directory and verifies it actually works by writing,
    /// reading back and deleting a sentinel entry. Returns `None` when any
    /// step fails, which sends the caller down the fallback chain.
    pub fn open(dir: PathBuf) -> Option<Self> {
        if let Err(err) = fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), %err, "cache directory is not usable");
            return None;
        }
        let backend = Self { dir };
        let probe_value = "probe";
        if !backend.write(PROBE_KEY, probe_value)
            || backend.read(PROBE_KEY).as_deref() != Some(probe_value)
        {
            warn!(dir = %backend.dir.display(), "cache directory failed the write probe");
            return None;
        }
        backend.remove(PROBE_KEY);
        debug!(dir = %backend.dir.display(), "using durable cache backend");
        Some(backend)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.{ENTRY_EXT}"))
    }
}

impl StorageBackend for DurableBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Durable
    }

    fn read(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.entry_path(key)).ok()
    }

    fn write(&self, key: &str, value: &str) -> bool {
        let path = self.entry_path(key);
        let mut tmp = match tempfile::NamedTempFile::new_in(&self.dir) {
            Ok(tmp) => tmp,
            Err(err) => {
                warn!(key, %err, "could not stage cache write");
                return false;
            }
        };
        if let Err(err) = tmp.write_all(value.as_bytes()) {
            warn!(key, %err, "could not write cache entry");
            return false;
        }
        match tmp.persist(&path) {
            Ok(_) => true,
            Err(err) => {
                warn!(key, %err, "could not persist cache entry");
                false
            }
        }
    }

    fn remove(&self, key: &str) -> bool {
        fs::remove_file(self.entry_path(key)).is_ok()
    }

    fn clear(&self) {
        for key in self.keys() {
            self.remove(&key);
        }
    }

    fn keys(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                    return None;
                }
                Some(path.file_stem()?.to_str()?.to_string())
            })
            .collect()
    }
}

/// Process-lifetime fallback, the analogue of keeping state only for the
/// current session.
#[derive(Default)]
pub struct SessionBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl SessionBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for SessionBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Session
    }

    fn read(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) -> bool {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(key.to_string(), value.to_string());
                true
            }
            Err(_) => false,
        }
    }

    fn remove(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|mut entries| entries.remove(key).is_some())
            .unwrap_or(false)
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// End of the fallback chain: accepts everything, stores nothing.
pub struct NullBackend;

impl StorageBackend for NullBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Unavailable
    }

    fn read(&self, _key: &str) -> Option<String> {
        None
    }

    fn write(&self, _key: &str, _value: &str) -> bool {
        false
    }

    fn remove(&self, _key: &str) -> bool {
        false
    }

    fn clear(&self) {}

    fn keys(&self) -> Vec<String> {
        Vec::new()
    }
}
