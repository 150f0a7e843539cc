use serde::Serialize;
use strum_macros::Display;
use tokio::sync::broadcast;
use tracing::debug;
use ts_rs::TS;
use uuid::Uuid;

use super::coordinator::ReadyMode;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordKind {
    Transaction,
    Client,
}

/// What the coordinator tells the rest of the app about a session. A UI
/// layer can render these directly as toasts ("saved to cloud", "saved
/// locally, pending sync").
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    SessionLoaded {
        mode: ReadyMode,
    },
    /// The server confirmed the write.
    SavedToCloud { record: RecordKind, id: Uuid },
    /// The write is held locally until connectivity returns.
    SavedLocally { record: RecordKind, id: Uuid },
    /// A queued create reached the server; the provisional id was replaced.
    RecordSynced {
        record: RecordKind,
        provisional_id: Uuid,
        id: Uuid,
    },
    /// The record disappeared on the server side; the stale local copy was
    /// dropped rather than resurrected.
    ConflictDropped { record: RecordKind, id: Uuid },
    /// The server rejected a queued write outright; it was removed from the
    /// queue so the rest can proceed.
    QueueRejected {
        record: RecordKind,
        id: Uuid,
        status: u16,
    },
    QueueFlushed { flushed: usize, remaining: usize },
    ConnectivityChanged { online: bool },
    AuthExpired,
}

/// Fan-out for [`SyncEvent`]s. Slow subscribers lose old events instead of
/// slowing the coordinator down, and having no subscribers at all is fine.
#[derive(Clone)]
pub struct Notifications {
    sender: broadcast::Sender<SyncEvent>,
}

impl Notifications {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn notify(&self, event: SyncEvent) {
        debug!(?event, "sync event");
        let _ = self.sender.send(event);
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new()
    }
}
