//! Public write API of the sync engine.
//!
//! Every call follows the same path: authorize against the caller's
//! [`AccessContext`], then either queue directly (offline) or attempt the
//! remote write once and queue it on failure. The returned [`SyncOutcome`]
//! reports backend confirmation only; optimistic local state belongs to the
//! caller.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crew_sync_config::SyncConfig;

use crate::access::{AccessContext, CapturedContext};
use crate::backend::{Backend, BackendError, Predicate, RemoteWrite, Row, Select, WriteAction};
use crate::connectivity::Connectivity;
use crate::error::{Result, SyncError};
use crate::families::{family_for_table, EntityFamily, ALL_FAMILIES, ID_COLUMN, UPDATED_AT_COLUMN};
use crate::identity::ensure_identifier;
use crate::queue::{MutationQueue, Operation, QueuedOperation, ReplayVerdict, Replayer};
use crate::records::SyncRecord;
use crate::schema::{SchemaDetector, SchemaMode, TENANT_COLUMN};
use crate::store::{FileStore, KeyValueStore};

/// Result of a write call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Confirmed by the backend
    Synced,
    /// Stored locally for a later drain
    Queued,
    /// Not permitted for the current context; nothing was recorded
    Denied,
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced)
    }
}

pub struct SyncEngine {
    backend: Arc<dyn Backend>,
    detector: Arc<SchemaDetector>,
    connectivity: Connectivity,
    queues: HashMap<&'static str, MutationQueue>,
}

impl SyncEngine {
    /// Build an engine with one queue per built-in family stored in `store`.
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<dyn KeyValueStore>,
        connectivity: Connectivity,
        config: &SyncConfig,
    ) -> Self {
        let queues = ALL_FAMILIES
            .iter()
            .map(|family| {
                let queue = MutationQueue::new(config.queue_key(family.name), Arc::clone(&store));
                (family.table, queue)
            })
            .collect();

        Self {
            detector: Arc::new(SchemaDetector::new(Arc::clone(&backend))),
            backend,
            connectivity,
            queues,
        }
    }

    /// Build an engine whose queues live in the configured queue directory.
    pub fn from_config(
        config: &SyncConfig,
        backend: Arc<dyn Backend>,
        connectivity: Connectivity,
    ) -> Result<Self> {
        let store = FileStore::open(config.resolved_queue_dir()?)?;
        Ok(Self::new(backend, Arc::new(store), connectivity, config))
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn detector(&self) -> &SchemaDetector {
        &self.detector
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn queue(&self, family: &EntityFamily) -> Option<&MutationQueue> {
        self.queues.get(family.table)
    }

    /// Pending operation count per family, in drain order.
    pub fn pending_counts(&self) -> Vec<(&'static EntityFamily, usize)> {
        ALL_FAMILIES
            .iter()
            .map(|family| (*family, self.queue(family).map_or(0, MutationQueue::len)))
            .collect()
    }

    pub fn pending_total(&self) -> usize {
        self.pending_counts().iter().map(|(_, count)| count).sum()
    }

    pub async fn insert(&self, access: &AccessContext, family: &EntityFamily, row: Row) -> SyncOutcome {
        let row = normalize_row_id(family, row);
        self.submit(access, family, Operation::Insert { row }).await
    }

    pub async fn upsert(&self, access: &AccessContext, family: &EntityFamily, row: Row) -> SyncOutcome {
        self.bulk_upsert(access, family, vec![row]).await
    }

    /// Upsert several rows in one remote call.
    pub async fn bulk_upsert(
        &self,
        access: &AccessContext,
        family: &EntityFamily,
        rows: Vec<Row>,
    ) -> SyncOutcome {
        let rows: Vec<Row> = rows.into_iter().map(|row| normalize_row_id(family, row)).collect();
        if rows.is_empty() {
            return self.nothing_to_do(access);
        }
        self.submit(access, family, Operation::Upsert { rows }).await
    }

    pub async fn update(
        &self,
        access: &AccessContext,
        family: &EntityFamily,
        id: &str,
        changes: Row,
    ) -> SyncOutcome {
        let id = normalize_id(family, id);
        self.submit(access, family, Operation::Update { id, changes }).await
    }

    pub async fn delete(&self, access: &AccessContext, family: &EntityFamily, id: &str) -> SyncOutcome {
        let id = normalize_id(family, id);
        self.submit(access, family, Operation::Delete { id }).await
    }

    /// Delete rows matching every column equality in `keys`.
    pub async fn delete_where(
        &self,
        access: &AccessContext,
        family: &EntityFamily,
        keys: Row,
    ) -> SyncOutcome {
        if keys.is_empty() {
            error!("Refusing delete on {} without key columns", family.table);
            return SyncOutcome::Denied;
        }
        let keys = normalize_row_id(family, keys);
        self.submit(access, family, Operation::DeleteWhere { keys }).await
    }

    /// Apply the same changes to every id in one remote call.
    pub async fn bulk_update(
        &self,
        access: &AccessContext,
        family: &EntityFamily,
        ids: &[String],
        changes: Row,
    ) -> SyncOutcome {
        if ids.is_empty() {
            return self.nothing_to_do(access);
        }
        let ids = ids.iter().map(|id| normalize_id(family, id)).collect();
        self.submit(access, family, Operation::BulkUpdate { ids, changes }).await
    }

    pub async fn bulk_delete(
        &self,
        access: &AccessContext,
        family: &EntityFamily,
        ids: &[String],
    ) -> SyncOutcome {
        if ids.is_empty() {
            return self.nothing_to_do(access);
        }
        let ids = ids.iter().map(|id| normalize_id(family, id)).collect();
        self.submit(access, family, Operation::BulkDelete { ids }).await
    }

    /// Delete every row of `family` belonging to the caller's tenant.
    pub async fn reset_tenant(&self, access: &AccessContext, family: &EntityFamily) -> SyncOutcome {
        self.submit(access, family, Operation::DeleteWhere { keys: Row::new() })
            .await
    }

    pub async fn insert_record<R: SyncRecord>(
        &self,
        access: &AccessContext,
        record: &R,
    ) -> Result<SyncOutcome> {
        Ok(self.insert(access, R::FAMILY, record.to_row()?).await)
    }

    pub async fn upsert_records<R: SyncRecord>(
        &self,
        access: &AccessContext,
        records: &[R],
    ) -> Result<SyncOutcome> {
        let rows = records.iter().map(R::to_row).collect::<Result<Vec<_>>>()?;
        Ok(self.bulk_upsert(access, R::FAMILY, rows).await)
    }

    fn nothing_to_do(&self, access: &AccessContext) -> SyncOutcome {
        if access.write_scope().is_some() {
            SyncOutcome::Synced
        } else {
            SyncOutcome::Denied
        }
    }

    async fn submit(&self, access: &AccessContext, family: &EntityFamily, op: Operation) -> SyncOutcome {
        let Some(context) = access.write_scope() else {
            debug!("Write to {} denied for current access context", family.table);
            return SyncOutcome::Denied;
        };
        let Some(queue) = self.queue(family) else {
            error!("No sync queue registered for table {}", family.table);
            return SyncOutcome::Denied;
        };

        let queued = QueuedOperation::new(family.table, op, context);

        if !self.connectivity.is_online() {
            queue.enqueue(queued);
            return SyncOutcome::Queued;
        }

        match self.apply(family, &queued).await {
            Ok(()) => SyncOutcome::Synced,
            Err(err @ SyncError::UnscopedWrite { .. }) => {
                error!("{}", err);
                SyncOutcome::Denied
            }
            Err(err) => {
                warn!(
                    "Failed to sync {} on {}, queued for retry: {}",
                    queued.op.kind(),
                    family.table,
                    err
                );
                queue.enqueue(queued);
                SyncOutcome::Queued
            }
        }
    }

    async fn apply(&self, family: &EntityFamily, op: &QueuedOperation) -> Result<()> {
        let mode = self.detector.detect(false).await;
        let write = compile(op, family, mode, Utc::now())?;
        self.backend.execute(&write).await?;
        Ok(())
    }

    /// Drain every family queue in registration order; returns the total
    /// failed count. Offline, nothing is attempted and the pending total is
    /// returned.
    pub async fn flush(&self) -> usize {
        let mut failed = 0;
        for family in ALL_FAMILIES {
            failed += self.flush_family(family).await;
        }
        failed
    }

    pub async fn flush_family(&self, family: &EntityFamily) -> usize {
        let Some(queue) = self.queue(family) else {
            return 0;
        };
        if !self.connectivity.is_online() {
            return queue.len();
        }
        queue.drain_and_retry(self).await
    }

    /// Read the authoritative collection for `family`.
    ///
    /// Returns `None` when reading is not permitted, the device is offline or
    /// the read fails.
    pub async fn fetch(&self, access: &AccessContext, family: &EntityFamily) -> Option<Vec<Row>> {
        let scope = access.read_scope()?;
        if !self.connectivity.is_online() {
            return None;
        }

        let mode = self.detector.detect(false).await;
        let mut query = Select::from(family.table);
        if mode.is_event_scoped() {
            if let Some(tenant_id) = scope.tenant_id {
                query = query.filter(Predicate::eq(TENANT_COLUMN, tenant_id));
            }
        }
        if let Some((column, ascending)) = family.order_by {
            query = query.order_by(column, ascending);
        }

        match self.backend.select(&query).await {
            Ok(mut rows) => {
                if mode == SchemaMode::Legacy {
                    rows.iter_mut().for_each(|row| family.from_legacy_row(row));
                }
                Some(rows)
            }
            Err(err) => {
                warn!("Failed to fetch {}: {}", family.table, err);
                None
            }
        }
    }

    pub async fn fetch_records<R: SyncRecord>(&self, access: &AccessContext) -> Result<Option<Vec<R>>> {
        let Some(rows) = self.fetch(access, R::FAMILY).await else {
            return Ok(None);
        };
        rows.into_iter()
            .map(R::from_row)
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// Probe the backend session as a connectivity check.
    pub async fn check_connection(&self) -> std::result::Result<(), BackendError> {
        self.backend.check_session().await
    }
}

#[async_trait]
impl Replayer for SyncEngine {
    async fn replay(&self, op: &QueuedOperation) -> ReplayVerdict {
        let Some(family) = family_for_table(&op.table) else {
            warn!("Dropping queued {} for unknown table {}", op.op.kind(), op.table);
            return ReplayVerdict::Discard;
        };

        match self.apply(family, op).await {
            Ok(()) => ReplayVerdict::Applied,
            Err(err) if err.is_retryable() => {
                warn!("Replay of {} on {} failed: {}", op.op.kind(), op.table, err);
                ReplayVerdict::Retry
            }
            Err(err) => {
                error!("Dropping queued {} on {}: {}", op.op.kind(), op.table, err);
                ReplayVerdict::Discard
            }
        }
    }
}

fn normalize_id(family: &EntityFamily, id: &str) -> String {
    if family.uuid_ids {
        ensure_identifier(id, family.id_namespace)
    } else {
        id.to_string()
    }
}

fn normalize_row_id(family: &EntityFamily, mut row: Row) -> Row {
    if family.uuid_ids {
        if let Some(Value::String(id)) = row.get_mut(ID_COLUMN) {
            *id = ensure_identifier(id, family.id_namespace);
        }
    }
    row
}

/// Shape an outgoing row for `mode` using the captured context.
fn shape_row(row: &Row, family: &EntityFamily, context: &CapturedContext, mode: SchemaMode) -> Row {
    let mut row = row.clone();
    match mode {
        SchemaMode::EventScoped => {
            if let Some(tenant_id) = &context.tenant_id {
                row.insert(TENANT_COLUMN.to_string(), Value::from(tenant_id.as_str()));
            }
            if let (Some(column), Some(actor_id)) = (family.actor_column, &context.actor_id) {
                row.insert(column.to_string(), Value::from(actor_id.as_str()));
            }
        }
        SchemaMode::Legacy => {
            row.remove(TENANT_COLUMN);
            if let Some(column) = family.actor_column {
                row.remove(column);
            }
            family.to_legacy_row(&mut row);
        }
    }
    row
}

fn shape_changes(changes: &Row, family: &EntityFamily, mode: SchemaMode, now: DateTime<Utc>) -> Row {
    let mut changes = changes.clone();
    // Rows never move between tenants.
    changes.remove(TENANT_COLUMN);
    if family.stamp_updated_at {
        changes.insert(
            UPDATED_AT_COLUMN.to_string(),
            Value::from(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    if mode == SchemaMode::Legacy {
        family.to_legacy_row(&mut changes);
    }
    changes
}

/// Compile a queued operation into a scoped remote write.
///
/// In the event-scoped layout every predicate-based write carries the tenant
/// captured with the operation, never the tenant current at replay time.
pub fn compile(
    op: &QueuedOperation,
    family: &EntityFamily,
    mode: SchemaMode,
    now: DateTime<Utc>,
) -> Result<RemoteWrite> {
    let tenant = match mode {
        SchemaMode::EventScoped => op.context.tenant_id.as_deref(),
        SchemaMode::Legacy => None,
    };
    // Inserts and upserts carry the tenant in the row; everything else is a
    // predicate-based write scoped to it.
    let mut filters: Vec<Predicate> = match &op.op {
        Operation::Insert { .. } | Operation::Upsert { .. } => Vec::new(),
        _ => tenant
            .map(|tenant_id| Predicate::eq(TENANT_COLUMN, tenant_id))
            .into_iter()
            .collect(),
    };

    let action = match &op.op {
        Operation::Insert { row } => WriteAction::Insert {
            rows: vec![shape_row(row, family, &op.context, mode)],
        },
        Operation::Upsert { rows } => WriteAction::Upsert {
            rows: rows
                .iter()
                .map(|row| shape_row(row, family, &op.context, mode))
                .collect(),
            on_conflict: family.conflict_target_for(mode, TENANT_COLUMN),
        },
        Operation::Update { id, changes } => {
            filters.push(Predicate::eq(ID_COLUMN, id.as_str()));
            WriteAction::Update {
                changes: shape_changes(changes, family, mode, now),
            }
        }
        Operation::Delete { id } => {
            filters.push(Predicate::eq(ID_COLUMN, id.as_str()));
            WriteAction::Delete
        }
        Operation::BulkUpdate { ids, changes } => {
            filters.push(Predicate::is_in(ID_COLUMN, ids.iter().map(String::as_str)));
            WriteAction::Update {
                changes: shape_changes(changes, family, mode, now),
            }
        }
        Operation::BulkDelete { ids } => {
            filters.push(Predicate::is_in(ID_COLUMN, ids.iter().map(String::as_str)));
            WriteAction::Delete
        }
        Operation::DeleteWhere { keys } => {
            let key_filters: Vec<Predicate> = keys
                .iter()
                .filter(|(column, _)| column.as_str() != TENANT_COLUMN)
                .map(|(column, value)| Predicate::eq(column.as_str(), value.clone()))
                .collect();

            if key_filters.is_empty() {
                // Tenant-wide reset: only allowed with a tenant predicate.
                if tenant.is_none() {
                    return Err(SyncError::UnscopedWrite {
                        table: family.table.to_string(),
                        kind: op.op.kind(),
                    });
                }
                let first_key = family.key_columns.first().copied().unwrap_or(ID_COLUMN);
                filters.push(Predicate::neq(first_key, ""));
            }
            filters.extend(key_filters);
            WriteAction::Delete
        }
    };

    Ok(RemoteWrite {
        table: family.table.to_string(),
        action,
        filters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::families::{CLIP_MARKERS, NOTES, STATION_COMPLETIONS};
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn queued(op: Operation, tenant: Option<&str>) -> QueuedOperation {
        QueuedOperation::new(
            "notes",
            op,
            CapturedContext {
                tenant_id: tenant.map(str::to_string),
                actor_id: Some("user-1".to_string()),
            },
        )
    }

    #[test]
    fn test_outcome_is_synced() {
        assert!(SyncOutcome::Synced.is_synced());
        assert!(!SyncOutcome::Queued.is_synced());
        assert!(!SyncOutcome::Denied.is_synced());
    }

    #[test]
    fn test_compile_insert_injects_tenant_and_actor() {
        let op = queued(
            Operation::Insert {
                row: row(json!({"id": "n-1", "content": "hi", "event_id": "evt-other"})),
            },
            Some("evt-1"),
        );
        let write = compile(&op, &NOTES, SchemaMode::EventScoped, Utc::now()).unwrap();

        let WriteAction::Insert { rows } = &write.action else {
            panic!("expected insert");
        };
        assert_eq!(rows[0]["event_id"], "evt-1");
        assert_eq!(rows[0]["created_by_user_id"], "user-1");
        assert!(write.filters.is_empty());
    }

    #[test]
    fn test_compile_update_scopes_to_tenant_and_strips_tenant_change() {
        let op = queued(
            Operation::Update {
                id: "n-1".to_string(),
                changes: row(json!({"status": "resolved", "event_id": "evt-2"})),
            },
            Some("evt-1"),
        );
        let write = compile(&op, &NOTES, SchemaMode::EventScoped, Utc::now()).unwrap();

        assert!(write.has_eq("event_id", "evt-1"));
        assert!(write.has_eq("id", "n-1"));
        let WriteAction::Update { changes } = &write.action else {
            panic!("expected update");
        };
        assert!(!changes.contains_key("event_id"));
    }

    #[test]
    fn test_compile_clip_update_stamps_updated_at() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let op = queued(
            Operation::BulkUpdate {
                ids: vec!["a".to_string(), "b".to_string()],
                changes: row(json!({"flagged": true})),
            },
            Some("evt-1"),
        );
        let write = compile(&op, &CLIP_MARKERS, SchemaMode::EventScoped, now).unwrap();

        let WriteAction::Update { changes } = &write.action else {
            panic!("expected update");
        };
        assert_eq!(changes["updated_at"], "2024-05-01T12:00:00.000Z");
        assert_eq!(
            write.filters[1],
            Predicate::is_in("id", ["a", "b"])
        );
    }

    #[test]
    fn test_compile_legacy_mode_drops_tenant() {
        let op = queued(
            Operation::Insert {
                row: row(json!({
                    "id": "c-1",
                    "station_id": "product",
                    "timestamp": "2024-01-01T00:00:00.000Z",
                })),
            },
            Some("evt-1"),
        );
        let write = compile(&op, &CLIP_MARKERS, SchemaMode::Legacy, Utc::now()).unwrap();

        let WriteAction::Insert { rows } = &write.action else {
            panic!("expected insert");
        };
        assert!(!rows[0].contains_key("event_id"));
        assert_eq!(rows[0]["station_id"], "Signing");
        assert_eq!(rows[0]["timestamp"], 1_704_067_200_000i64);
    }

    #[test]
    fn test_compile_completion_upsert_conflict_target() {
        let op = queued(
            Operation::Upsert {
                rows: vec![row(json!({"player_id": "p-1", "station_id": "tunnel", "completed": true}))],
            },
            Some("evt-1"),
        );

        let write = compile(&op, &STATION_COMPLETIONS, SchemaMode::EventScoped, Utc::now()).unwrap();
        let WriteAction::Upsert { rows, on_conflict } = &write.action else {
            panic!("expected upsert");
        };
        assert_eq!(on_conflict.as_deref(), Some("event_id,player_id,station_id"));
        assert_eq!(rows[0]["event_id"], "evt-1");
        assert!(write.filters.is_empty());
    }

    #[test]
    fn test_compile_tenant_reset() {
        let op = queued(Operation::DeleteWhere { keys: Row::new() }, Some("evt-1"));
        let write = compile(&op, &STATION_COMPLETIONS, SchemaMode::EventScoped, Utc::now()).unwrap();

        assert_eq!(
            write.filters,
            vec![Predicate::eq("event_id", "evt-1"), Predicate::neq("player_id", "")]
        );
    }

    #[test]
    fn test_compile_refuses_unscoped_reset() {
        let op = queued(Operation::DeleteWhere { keys: Row::new() }, Some("evt-1"));
        let err = compile(&op, &STATION_COMPLETIONS, SchemaMode::Legacy, Utc::now()).unwrap_err();
        assert!(matches!(err, SyncError::UnscopedWrite { .. }));

        let bypass = queued(Operation::DeleteWhere { keys: Row::new() }, None);
        assert!(compile(&bypass, &STATION_COMPLETIONS, SchemaMode::EventScoped, Utc::now()).is_err());
    }

    #[test]
    fn test_compile_delete_where_composite_key() {
        let op = queued(
            Operation::DeleteWhere {
                keys: row(json!({"player_id": "p-1", "station_id": "tunnel", "event_id": "evt-9"})),
            },
            Some("evt-1"),
        );
        let write = compile(&op, &STATION_COMPLETIONS, SchemaMode::EventScoped, Utc::now()).unwrap();

        assert!(write.has_eq("event_id", "evt-1"));
        assert!(!write.has_eq("event_id", "evt-9"));
        assert!(write.has_eq("player_id", "p-1"));
        assert!(write.has_eq("station_id", "tunnel"));
    }

    #[test]
    fn test_normalize_ids_per_family() {
        assert_eq!(
            normalize_id(&crate::families::DELIVERABLES, "legacy-deliverable-id"),
            "4be87f9b-7123-545f-9de1-1509e83e402b"
        );
        assert_eq!(normalize_id(&STATION_COMPLETIONS, "tunnel"), "tunnel");

        let normalized = normalize_row_id(&NOTES, row(json!({"id": "x"})));
        assert_eq!(normalized["id"], "bbf901c7-1b97-5943-a042-0561de6fe097");
    }
}
