use models::{ClientDraft, TransactionDraft};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::notification::RecordKind;

/// A write the server has not confirmed yet. For creates, `provisional_id`
/// is the locally assigned id of the optimistic record; it doubles as the
/// correlation token used to swap in the server id once the create lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PendingOp {
    CreateTransaction {
        provisional_id: Uuid,
        draft: TransactionDraft,
    },
    UpdateTransaction { id: Uuid, draft: TransactionDraft },
    DeleteTransaction { id: Uuid },
    CreateClient {
        provisional_id: Uuid,
        draft: ClientDraft,
    },
    UpdateClient { id: Uuid, draft: ClientDraft },
    DeleteClient { id: Uuid },
}

impl PendingOp {
    /// The working-set record this operation is about.
    pub fn target_id(&self) -> Uuid {
        match self {
            Self::CreateTransaction { provisional_id, .. }
            | Self::CreateClient { provisional_id, .. } => *provisional_id,
            Self::UpdateTransaction { id, .. }
            | Self::DeleteTransaction { id }
            | Self::UpdateClient { id, .. }
            | Self::DeleteClient { id } => *id,
        }
    }

    pub fn record_kind(&self) -> RecordKind {
        match self {
            Self::CreateTransaction { .. }
            | Self::UpdateTransaction { .. }
            | Self::DeleteTransaction { .. } => RecordKind::Transaction,
            Self::CreateClient { .. } | Self::UpdateClient { .. } | Self::DeleteClient { .. } => {
                RecordKind::Client
            }
        }
    }
}

/// FIFO queue of deferred writes.
///
/// Later writes against a record that is already queued are folded into the
/// earlier entry instead of appended, so replay never sends the server an
/// update for an id it has not issued, and a record created and deleted
/// while offline never reaches the server at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingQueue(Vec<PendingOp>);

impl PendingQueue {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn front(&self) -> Option<&PendingOp> {
        self.0.first()
    }

    pub fn pop_front(&mut self) -> Option<PendingOp> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.remove(0))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOp> {
        self.0.iter()
    }

    /// Whether `id` names a record the server has never seen.
    pub fn is_provisional(&self, id: Uuid) -> bool {
        self.0.iter().any(|op| {
            matches!(op,
                PendingOp::CreateTransaction { provisional_id, .. }
                | PendingOp::CreateClient { provisional_id, .. } if *provisional_id == id)
        })
    }

    pub fn push_create_transaction(&mut self, provisional_id: Uuid, draft: TransactionDraft) {
        self.0.push(PendingOp::CreateTransaction {
            provisional_id,
            draft,
        });
    }

    pub fn push_create_client(&mut self, provisional_id: Uuid, draft: ClientDraft) {
        self.0.push(PendingOp::CreateClient {
            provisional_id,
            draft,
        });
    }

    /// Rewrites queued transaction drafts that still point at a provisional
    /// client id once the server has assigned the real one.
    pub fn retarget_client(&mut self, provisional_id: Uuid, id: Uuid) {
        for op in self.0.iter_mut() {
            if let PendingOp::CreateTransaction { draft, .. }
            | PendingOp::UpdateTransaction { draft, .. } = op
            {
                if draft.client_id == Some(provisional_id) {
                    draft.client_id = Some(id);
                }
            }
        }
    }

    /// Queues an update, folding it into an earlier queued create or update
    /// of the same transaction when one exists.
    pub fn fold_update_transaction(&mut self, id: Uuid, draft: &TransactionDraft) {
        for op in self.0.iter_mut() {
            match op {
                PendingOp::CreateTransaction {
                    provisional_id,
                    draft: queued,
                } if *provisional_id == id => {
                    *queued = draft.clone();
                    return;
                }
                PendingOp::UpdateTransaction { id: queued, draft: payload } if *queued == id => {
                    *payload = draft.clone();
                    return;
                }
                _ => {}
            }
        }
        self.0.push(PendingOp::UpdateTransaction {
            id,
            draft: draft.clone(),
        });
    }

    pub fn fold_update_client(&mut self, id: Uuid, draft: &ClientDraft) {
        for op in self.0.iter_mut() {
            match op {
                PendingOp::CreateClient {
                    provisional_id,
                    draft: queued,
                } if *provisional_id == id => {
                    *queued = draft.clone();
                    return;
                }
                PendingOp::UpdateClient { id: queued, draft: payload } if *queued == id => {
                    *payload = draft.clone();
                    return;
                }
                _ => {}
            }
        }
        self.0.push(PendingOp::UpdateClient {
            id,
            draft: draft.clone(),
        });
    }

    /// Queues a delete. Returns `true` when the record was provisional, in
    /// which case every trace of it is dropped from the queue and nothing is
    /// sent to the server.
    pub fn fold_delete_transaction(&mut self, id: Uuid) -> bool {
        let provisional = self.is_provisional(id);
        self.0.retain(|op| {
            !matches!(op,
                PendingOp::CreateTransaction { provisional_id: target, .. }
                | PendingOp::UpdateTransaction { id: target, .. } if *target == id)
        });
        if !provisional {
            self.0.push(PendingOp::DeleteTransaction { id });
        }
        provisional
    }

    pub fn fold_delete_client(&mut self, id: Uuid) -> bool {
        let provisional = self.is_provisional(id);
        self.0.retain(|op| {
            !matches!(op,
                PendingOp::CreateClient { provisional_id: target, .. }
                | PendingOp::UpdateClient { id: target, .. } if *target == id)
        });
        if !provisional {
            self.0.push(PendingOp::DeleteClient { id });
        }
        provisional
    }
}
