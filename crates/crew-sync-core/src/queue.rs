//! Durable FIFO of writes that have not been confirmed by the backend.
//!
//! One queue exists per synced table. The list is stored under a single key
//! and always read-modify-written as a whole.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::access::CapturedContext;
use crate::backend::Row;
use crate::store::KeyValueStore;

/// Payload of a queued write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Insert {
        row: Row,
    },
    /// Insert-or-merge on the family's conflict target
    Upsert {
        rows: Vec<Row>,
    },
    Update {
        id: String,
        changes: Row,
    },
    Delete {
        id: String,
    },
    /// Delete every row matching all of `keys` as column equalities
    DeleteWhere {
        keys: Row,
    },
    BulkUpdate {
        ids: Vec<String>,
        changes: Row,
    },
    BulkDelete {
        ids: Vec<String>,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Upsert { .. } => "upsert",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
            Operation::DeleteWhere { .. } => "delete_where",
            Operation::BulkUpdate { .. } => "bulk_update",
            Operation::BulkDelete { .. } => "bulk_delete",
        }
    }
}

/// A write together with the context captured when it was attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub table: String,
    pub op: Operation,
    pub context: CapturedContext,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedOperation {
    pub fn new(table: impl Into<String>, op: Operation, context: CapturedContext) -> Self {
        Self {
            table: table.into(),
            op,
            context,
            enqueued_at: Utc::now(),
        }
    }
}

/// Result of replaying one queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayVerdict {
    Applied,
    /// Keep the operation for a later drain
    Retry,
    /// The operation can never succeed; drop it
    Discard,
}

/// Applies queued writes against the backend.
#[async_trait]
pub trait Replayer: Send + Sync {
    async fn replay(&self, op: &QueuedOperation) -> ReplayVerdict;
}

pub struct MutationQueue {
    key: String,
    store: Arc<dyn KeyValueStore>,
    // Guards each read-modify-write of the persisted list. Never held across an await.
    lock: Mutex<()>,
}

impl MutationQueue {
    pub fn new(key: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            key: key.into(),
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> Vec<QueuedOperation> {
        let raw = match self.store.load(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!("Failed to read sync queue {}: {}", self.key, err);
                return Vec::new();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!("Discarding corrupt sync queue {}: {}", self.key, err);
            Vec::new()
        })
    }

    /// Persist `ops` as the whole list. Returns false when the store refused
    /// the write; the failure is logged and otherwise swallowed.
    fn write(&self, ops: &[QueuedOperation]) -> bool {
        let result = serde_json::to_string(ops)
            .map_err(std::io::Error::from)
            .and_then(|raw| self.store.save(&self.key, &raw));

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "Failed to persist sync queue {} ({} pending): {}",
                    self.key,
                    ops.len(),
                    err
                );
                false
            }
        }
    }

    /// Snapshot of the pending operations, oldest first.
    pub fn pending(&self) -> Vec<QueuedOperation> {
        let _guard = self.guard();
        self.read()
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `op` to the end of the persisted list.
    pub fn enqueue(&self, op: QueuedOperation) {
        let _guard = self.guard();
        let mut ops = self.read();
        debug!("Queueing {} on {} ({} pending)", op.op.kind(), op.table, ops.len());
        ops.push(op);
        self.write(&ops);
    }

    /// Take the whole list, leaving an empty one behind.
    ///
    /// Returns an empty batch when the persisted list could not be cleared,
    /// so nothing is handed out that would still be read back later.
    pub fn take_all(&self) -> Vec<QueuedOperation> {
        self.try_take().unwrap_or_default()
    }

    fn try_take(&self) -> Option<Vec<QueuedOperation>> {
        let _guard = self.guard();
        let ops = self.read();
        if ops.is_empty() || self.write(&[]) {
            Some(ops)
        } else {
            None
        }
    }

    /// Put `failed` back ahead of anything enqueued since it was taken.
    pub fn restore_failed(&self, failed: Vec<QueuedOperation>) {
        if failed.is_empty() {
            return;
        }
        let _guard = self.guard();
        let arrivals = self.read();
        let mut ops = failed;
        ops.extend(arrivals);
        self.write(&ops);
    }

    /// Replay every pending operation in order and return how many failed.
    ///
    /// Failures do not stop the drain. Failed operations keep their relative
    /// order and stay ahead of operations enqueued while the drain ran.
    /// When the list cannot be cleared nothing is replayed and every pending
    /// operation counts as failed.
    pub async fn drain_and_retry(&self, replayer: &dyn Replayer) -> usize {
        let Some(ops) = self.try_take() else {
            warn!("Skipping drain of {}: queue could not be cleared", self.key);
            return self.len();
        };
        if ops.is_empty() {
            return 0;
        }

        let total = ops.len();
        let mut failed = Vec::new();
        let mut discarded = 0usize;

        for op in ops {
            match replayer.replay(&op).await {
                ReplayVerdict::Applied => {}
                ReplayVerdict::Retry => failed.push(op),
                ReplayVerdict::Discard => discarded += 1,
            }
        }

        let failed_count = failed.len();
        self.restore_failed(failed);

        info!(
            "Drained {}: {} applied, {} failed, {} discarded",
            self.key,
            total - failed_count - discarded,
            failed_count,
            discarded
        );
        failed_count
    }
}
