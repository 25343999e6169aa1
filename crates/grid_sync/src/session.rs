//! Table session: local mirror plus edit coordinator
//!
//! One `TableSession` exists per open table. It owns the client's view of
//! the rows, the pending-edit and conflict maps, the optimistic ledger and
//! the strategy registry. Every mutation is a reaction to one discrete
//! event: a local edit request, a remote change, an ack, or a tick.

use crate::detector::{ConflictDetector, Suggestion};
use crate::events::{EventBus, SessionEvent, SubscriptionToken};
use crate::ledger::OptimisticLedger;
use crate::offline::OfflineQueue;
use crate::protocol::{ClientMessage, ConflictEvent, EditSink};
use crate::registry::StrategyRegistry;
use crate::types::{Edit, EditStatus, OptimisticUpdate, RollbackReason, UpdateKind};
use grid_common::batch::{ChangeEvent, SyncUploadRequest, UploadChange};
use grid_common::{
    new_id, now_ms, ChangeOperation, Conflict, GridError, Result, Row, RowChange,
};
use grid_config::{Config, OptimisticConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the client resolves a live-channel conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditResolution {
    AcceptLocal,
    AcceptRemote,
    Custom,
}

/// A stored conflict plus its pending auto-resolution, if scheduled
#[derive(Debug, Clone)]
struct PendingConflict {
    event: ConflictEvent,
    auto_resolve_at: Option<i64>,
}

/// Per-table sync session
pub struct TableSession {
    table_id: String,
    table_data: HashMap<String, Row>,
    pending_edits: HashMap<String, Edit>,
    conflicts: HashMap<String, PendingConflict>,
    version: u64,
    last_sync: i64,
    online: bool,

    settings: OptimisticConfig,
    ledger: OptimisticLedger,
    registry: StrategyRegistry,
    detector: ConflictDetector,
    events: EventBus,
    offline: OfflineQueue,
    sink: Box<dyn EditSink>,
}

impl TableSession {
    /// Create a session for one table. The offline queue directory is scoped
    /// by table id; previously queued changes are reloaded from disk.
    pub fn new(table_id: &str, config: &Config, sink: Box<dyn EditSink>) -> Result<Self> {
        let mut offline = OfflineQueue::new(config.offline.queue_dir.join(table_id));
        let reloaded = offline.load_from_disk()?;
        if reloaded > 0 {
            tracing::info!(table = %table_id, count = reloaded, "reloaded queued offline changes");
        }

        Ok(Self {
            table_id: table_id.to_string(),
            table_data: HashMap::new(),
            pending_edits: HashMap::new(),
            conflicts: HashMap::new(),
            version: 0,
            last_sync: 0,
            online: true,
            settings: config.optimistic.clone(),
            ledger: OptimisticLedger::new(config.optimistic.clone()),
            registry: StrategyRegistry::with_builtins(),
            detector: ConflictDetector::new(),
            events: EventBus::new(),
            offline,
            sink,
        })
    }

    // ---- accessors -------------------------------------------------------

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn row(&self, row_id: &str) -> Option<&Row> {
        self.table_data.get(row_id)
    }

    pub fn row_count(&self) -> usize {
        self.table_data.len()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_sync(&self) -> i64 {
        self.last_sync
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn pending_edit(&self, edit_id: &str) -> Option<&Edit> {
        self.pending_edits.get(edit_id)
    }

    pub fn pending_edit_count(&self) -> usize {
        self.pending_edits.len()
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    pub fn has_conflict(&self, conflict_id: &str) -> bool {
        self.conflicts.contains_key(conflict_id)
    }

    pub fn ledger(&self) -> &OptimisticLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut StrategyRegistry {
        &mut self.registry
    }

    pub fn offline_queue_len(&self) -> usize {
        self.offline.len()
    }

    pub fn subscribe(
        &mut self,
        handler: impl Fn(&SessionEvent) + Send + 'static,
    ) -> SubscriptionToken {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        self.events.unsubscribe(token)
    }

    /// Seed the mirror with an already-known row (initial load)
    pub fn seed_row(&mut self, row_id: &str, row: Row) {
        self.table_data.insert(row_id.to_string(), row);
    }

    // ---- local edits -----------------------------------------------------

    /// Edit one cell. `old_value` is derived from the mirror when omitted;
    /// editing an absent row without supplying one fails with `RowNotFound`.
    pub fn edit_cell(
        &mut self,
        row_id: &str,
        column: &str,
        new_value: serde_json::Value,
        old_value: Option<serde_json::Value>,
    ) -> Result<String> {
        let mirrored = self.table_data.get(row_id).and_then(|r| r.get(column)).cloned();
        if old_value.is_none() && !self.table_data.contains_key(row_id) {
            return Err(GridError::RowNotFound {
                table_id: self.table_id.clone(),
                row_id: row_id.to_string(),
            });
        }
        let old_value = old_value.or(mirrored);

        if !self.online {
            return self.queue_offline(
                row_id,
                Some(column.to_string()),
                ChangeOperation::Update,
                old_value,
                Some(new_value.clone()),
                [(column.to_string(), new_value)].into(),
            );
        }

        let edit_id = new_id("edit");
        let now = now_ms();
        let changeset = grid_common::ReversibleChangeset::cell(
            column,
            old_value.clone(),
            new_value.clone(),
        );
        let optimistic = self.try_optimistic(
            &edit_id,
            UpdateKind::CellEdit,
            row_id,
            changeset,
            now,
        );

        self.pending_edits.insert(
            edit_id.clone(),
            Edit {
                edit_id: edit_id.clone(),
                table_id: self.table_id.clone(),
                row_id: row_id.to_string(),
                column: Some(column.to_string()),
                operation: None,
                old_value: old_value.clone(),
                new_value: new_value.clone(),
                version: self.version,
                status: EditStatus::Pending,
            },
        );

        let message = ClientMessage::SubmitEdit {
            edit_id: edit_id.clone(),
            table_id: self.table_id.clone(),
            row_id: row_id.to_string(),
            column: column.to_string(),
            old_value,
            new_value,
            version: self.version,
        };
        self.finish_submit(edit_id, row_id, optimistic, message)
    }

    /// Insert a row. A fresh row id is generated when none is supplied.
    pub fn insert_row(&mut self, row_id: Option<String>, row: Row) -> Result<String> {
        let row_id = row_id.unwrap_or_else(|| new_id("row"));

        if !self.online {
            return self.queue_offline(
                &row_id,
                None,
                ChangeOperation::Insert,
                None,
                Some(serde_json::to_value(&row)?),
                row,
            );
        }

        let edit_id = new_id("edit");
        let now = now_ms();
        let changeset = grid_common::ReversibleChangeset::row_insert(&row);
        let optimistic =
            self.try_optimistic(&edit_id, UpdateKind::RowOp, &row_id, changeset, now);

        self.pending_edits.insert(
            edit_id.clone(),
            Edit {
                edit_id: edit_id.clone(),
                table_id: self.table_id.clone(),
                row_id: row_id.clone(),
                column: None,
                operation: Some(ChangeOperation::Insert),
                old_value: None,
                new_value: serde_json::to_value(&row)?,
                version: self.version,
                status: EditStatus::Pending,
            },
        );

        let message = ClientMessage::RowOp {
            edit_id: edit_id.clone(),
            table_id: self.table_id.clone(),
            row_id: row_id.clone(),
            operation: ChangeOperation::Insert,
            changes: row,
            version: self.version,
        };
        self.finish_submit(edit_id, &row_id, optimistic, message)
    }

    /// Update several columns of an existing row
    pub fn update_row(&mut self, row_id: &str, changes: Row) -> Result<String> {
        let current = self
            .table_data
            .get(row_id)
            .ok_or_else(|| GridError::RowNotFound {
                table_id: self.table_id.clone(),
                row_id: row_id.to_string(),
            })?
            .clone();

        if !self.online {
            return self.queue_offline(
                row_id,
                None,
                ChangeOperation::Update,
                Some(serde_json::to_value(&current)?),
                Some(serde_json::to_value(&changes)?),
                changes,
            );
        }

        let edit_id = new_id("edit");
        let now = now_ms();
        let changeset = grid_common::ReversibleChangeset::row_update(&changes, &current);
        let optimistic =
            self.try_optimistic(&edit_id, UpdateKind::RowOp, row_id, changeset, now);

        self.pending_edits.insert(
            edit_id.clone(),
            Edit {
                edit_id: edit_id.clone(),
                table_id: self.table_id.clone(),
                row_id: row_id.to_string(),
                column: None,
                operation: Some(ChangeOperation::Update),
                old_value: Some(serde_json::to_value(&current)?),
                new_value: serde_json::to_value(&changes)?,
                version: self.version,
                status: EditStatus::Pending,
            },
        );

        let message = ClientMessage::RowOp {
            edit_id: edit_id.clone(),
            table_id: self.table_id.clone(),
            row_id: row_id.to_string(),
            operation: ChangeOperation::Update,
            changes,
            version: self.version,
        };
        self.finish_submit(edit_id, row_id, optimistic, message)
    }

    /// Delete a row. The mirror drops it immediately; a later rejection
    /// restores it from the snapshot.
    pub fn delete_row(&mut self, row_id: &str) -> Result<String> {
        let current = self
            .table_data
            .get(row_id)
            .ok_or_else(|| GridError::RowNotFound {
                table_id: self.table_id.clone(),
                row_id: row_id.to_string(),
            })?
            .clone();

        if !self.online {
            let id = self.queue_offline(
                row_id,
                None,
                ChangeOperation::Delete,
                Some(serde_json::to_value(&current)?),
                None,
                Row::new(),
            )?;
            self.table_data.remove(row_id);
            return Ok(id);
        }

        let edit_id = new_id("edit");
        let now = now_ms();
        let changeset = grid_common::ReversibleChangeset::row_delete(&current);
        let optimistic =
            self.try_optimistic(&edit_id, UpdateKind::RowOp, row_id, changeset, now);

        self.pending_edits.insert(
            edit_id.clone(),
            Edit {
                edit_id: edit_id.clone(),
                table_id: self.table_id.clone(),
                row_id: row_id.to_string(),
                column: None,
                operation: Some(ChangeOperation::Delete),
                old_value: Some(serde_json::to_value(&current)?),
                new_value: serde_json::Value::Null,
                version: self.version,
                status: EditStatus::Pending,
            },
        );

        let message = ClientMessage::RowOp {
            edit_id: edit_id.clone(),
            table_id: self.table_id.clone(),
            row_id: row_id.to_string(),
            operation: ChangeOperation::Delete,
            changes: Row::new(),
            version: self.version,
        };
        self.finish_submit(edit_id, row_id, optimistic, message)
    }

    /// Cancel an in-flight edit: immediate local rollback plus a best-effort
    /// cancellation notice. If the server already committed, the next remote
    /// change event reconciles the mirror.
    pub fn cancel_edit(&mut self, edit_id: &str) -> Result<()> {
        if self.pending_edits.remove(edit_id).is_none() {
            return Err(GridError::Validation(format!(
                "no in-flight edit with id {edit_id}"
            )));
        }
        if let Some(update) = self.ledger.rollback(edit_id, RollbackReason::Error) {
            self.revert_update(&update);
            self.events.emit(&SessionEvent::UpdateRolledBack {
                update_id: edit_id.to_string(),
                reason: RollbackReason::Error,
            });
        }
        if let Err(err) = self.sink.submit(&ClientMessage::CancelEdit {
            edit_id: edit_id.to_string(),
        }) {
            tracing::debug!(edit = %edit_id, %err, "cancellation notice not delivered");
        }
        Ok(())
    }

    // ---- inbound events --------------------------------------------------

    /// Merge a committed remote mutation into the mirror. Returns false when
    /// the change targets another table.
    pub fn apply_remote_change(&mut self, change: &RowChange) -> bool {
        if change.table_id != self.table_id {
            return false;
        }

        match change.operation {
            ChangeOperation::Insert | ChangeOperation::Update => {
                let row = self.table_data.entry(change.row_id.clone()).or_default();
                for (column, value) in &change.changes {
                    row.insert(column.clone(), value.clone());
                }
            }
            ChangeOperation::Delete => {
                self.table_data.remove(&change.row_id);
            }
        }

        self.version = self.version.max(change.version);
        self.last_sync = now_ms();
        self.events.emit(&SessionEvent::RemoteChangeApplied {
            table_id: change.table_id.clone(),
            row_id: change.row_id.clone(),
            version: change.version,
        });
        true
    }

    /// React to the server's acknowledgement of a submitted edit
    pub fn handle_edit_ack(&mut self, edit_id: &str, success: bool, error: Option<String>) {
        if self.pending_edits.remove(edit_id).is_none() {
            tracing::debug!(edit = %edit_id, "ack for unknown edit (already cancelled or superseded)");
            return;
        }

        if success {
            self.ledger.confirm(edit_id, now_ms());
            self.version += 1;
            self.events.emit(&SessionEvent::EditConfirmed {
                edit_id: edit_id.to_string(),
            });
        } else {
            if let Some(update) = self.ledger.rollback(edit_id, RollbackReason::Error) {
                self.revert_update(&update);
                self.events.emit(&SessionEvent::UpdateRolledBack {
                    update_id: edit_id.to_string(),
                    reason: RollbackReason::Error,
                });
            }
            self.events.emit(&SessionEvent::EditRejected {
                edit_id: edit_id.to_string(),
                error,
            });
        }
    }

    /// Store a conflict reported by the server. While stored, the edit stays
    /// pending and its rollback deadline is suspended. When the default
    /// strategy auto-applies, resolution is scheduled after a grace window;
    /// a manual `resolve_conflict` call beats the schedule.
    pub fn handle_conflict_event(&mut self, event: ConflictEvent) {
        let conflict_id = event.edit_id.clone();
        self.ledger.hold(&conflict_id);

        let auto_resolve_at = self
            .registry
            .default_strategy()
            .auto_apply
            .then(|| now_ms() + self.settings.auto_resolve_grace_ms as i64);

        self.conflicts.insert(
            conflict_id.clone(),
            PendingConflict {
                event,
                auto_resolve_at,
            },
        );
        self.events
            .emit(&SessionEvent::ConflictDetected { conflict_id });
    }

    /// Resolve a stored conflict. The resolved value is transmitted first;
    /// only on success is the conflict removed locally. A transport failure
    /// leaves the conflict in place for the caller to retry.
    pub fn resolve_conflict(
        &mut self,
        conflict_id: &str,
        resolution: EditResolution,
        value: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let event = self
            .conflicts
            .get(conflict_id)
            .map(|pc| pc.event.clone())
            .ok_or_else(|| GridError::ConflictNotFound(conflict_id.to_string()))?;

        let resolved = match resolution {
            EditResolution::AcceptLocal => event.local_value.clone(),
            EditResolution::AcceptRemote => event.merged_value.clone(),
            EditResolution::Custom => value.ok_or_else(|| {
                GridError::Validation("custom resolution requires a value".to_string())
            })?,
        };

        self.sink.submit(&ClientMessage::ResolveConflict {
            conflict_id: conflict_id.to_string(),
            resolution,
            value: resolved.clone(),
        })?;

        self.conflicts.remove(conflict_id);
        if let Some(column) = &event.column {
            self.apply_cell(&event.row_id, column, resolved.clone());
        }
        self.pending_edits.remove(conflict_id);
        self.ledger.discard(conflict_id);
        self.events.emit(&SessionEvent::ConflictResolved {
            conflict_id: conflict_id.to_string(),
            value: resolved.clone(),
        });
        Ok(resolved)
    }

    /// Suggest a strategy for a stored conflict
    pub fn suggest_for_conflict(&self, conflict_id: &str) -> Result<Suggestion> {
        let pending = self
            .conflicts
            .get(conflict_id)
            .ok_or_else(|| GridError::ConflictNotFound(conflict_id.to_string()))?;
        Ok(self
            .detector
            .suggest_resolution(&conflict_from_event(&pending.event)))
    }

    // ---- time ------------------------------------------------------------

    /// Advance session time: expire overdue optimistic updates, purge
    /// confirmed ones, and fire due auto-resolutions.
    pub fn tick(&mut self, now: i64) {
        let report = self.ledger.tick(now);
        for update in &report.rolled_back {
            self.revert_update(update);
            self.pending_edits.remove(&update.id);
            self.events.emit(&SessionEvent::EditTimedOut {
                edit_id: update.id.clone(),
            });
            self.events.emit(&SessionEvent::UpdateRolledBack {
                update_id: update.id.clone(),
                reason: RollbackReason::Timeout,
            });
        }
        for id in &report.timed_out_retained {
            self.pending_edits.remove(id);
            self.events
                .emit(&SessionEvent::EditTimedOut { edit_id: id.clone() });
        }

        self.run_due_auto_resolutions(now);
    }

    // ---- connectivity ----------------------------------------------------

    /// Drop to offline mode: subsequent edits queue locally
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// Re-enter online mode after a reconnect. The downloaded changes since
    /// `last_sync` are applied before optimistic editing resumes.
    pub fn resume_online(&mut self, downloaded: &[ChangeEvent]) {
        for event in downloaded {
            self.apply_remote_change(&event.change);
        }
        self.online = true;
    }

    /// Package queued offline changes for Upload. Returns `None` when the
    /// queue is empty; otherwise the queue (and its on-disk copy) is drained.
    pub fn drain_offline(
        &mut self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Option<SyncUploadRequest>> {
        self.offline.drain_into_request(user_id, device_id)
    }

    // ---- internals -------------------------------------------------------

    fn try_optimistic(
        &mut self,
        edit_id: &str,
        kind: UpdateKind,
        row_id: &str,
        changeset: grid_common::ReversibleChangeset,
        now: i64,
    ) -> bool {
        if !self.settings.enabled {
            return false;
        }
        match self.ledger.apply(edit_id, kind, &self.table_id, row_id, changeset, now) {
            Ok(()) => {
                let update = self.ledger.get(edit_id).expect("update just applied").clone();
                self.apply_update_to_mirror(&update);
                true
            }
            Err(GridError::CapacityExceeded { pending, limit }) => {
                tracing::warn!(
                    pending,
                    limit,
                    edit = %edit_id,
                    "optimistic ledger full; submitting without optimistic display"
                );
                self.events
                    .emit(&SessionEvent::CapacityWarning { pending, limit });
                false
            }
            Err(err) => {
                tracing::error!(edit = %edit_id, %err, "optimistic apply failed");
                false
            }
        }
    }

    /// Submit on the live channel; a synchronous failure rolls back the
    /// optimistic state and removes the pending entry before re-raising.
    fn finish_submit(
        &mut self,
        edit_id: String,
        row_id: &str,
        optimistic: bool,
        message: ClientMessage,
    ) -> Result<String> {
        if let Err(err) = self.sink.submit(&message) {
            if optimistic {
                // the message never left the client: revert unconditionally,
                // there is nothing for diagnostics to keep
                let update = self
                    .ledger
                    .rollback(&edit_id, RollbackReason::Error)
                    .or_else(|| self.ledger.discard(&edit_id));
                if let Some(update) = update {
                    self.revert_update(&update);
                }
            }
            self.pending_edits.remove(&edit_id);
            return Err(err);
        }

        self.events.emit(&SessionEvent::EditSubmitted {
            edit_id: edit_id.clone(),
            table_id: self.table_id.clone(),
            row_id: row_id.to_string(),
        });
        Ok(edit_id)
    }

    fn queue_offline(
        &mut self,
        row_id: &str,
        column: Option<String>,
        operation: ChangeOperation,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
        mirror_changes: Row,
    ) -> Result<String> {
        let change = UploadChange {
            id: new_id("chg"),
            table_id: self.table_id.clone(),
            row_id: row_id.to_string(),
            column,
            operation,
            old_value,
            new_value,
            base_version: self.version,
            client_timestamp: now_ms(),
            checksum: None,
        }
        .with_checksum();
        let id = change.id.clone();

        // the mirror reflects offline edits immediately; they exist only
        // locally until re-submitted via Upload
        for (column, value) in mirror_changes {
            self.apply_cell(row_id, &column, value);
        }
        self.offline.enqueue(change)?;
        Ok(id)
    }

    fn apply_update_to_mirror(&mut self, update: &OptimisticUpdate) {
        if update.changeset.removes_all_fields() && update.kind == UpdateKind::RowOp {
            self.table_data.remove(&update.row_id);
            return;
        }
        let row = self.table_data.entry(update.row_id.clone()).or_default();
        for field in &update.changeset.fields_touched {
            match update.changeset.after.get(field) {
                Some(Some(value)) => {
                    row.insert(field.clone(), value.clone());
                }
                Some(None) => {
                    row.remove(field);
                }
                None => {}
            }
        }
    }

    fn revert_update(&mut self, update: &OptimisticUpdate) {
        match self.table_data.get_mut(&update.row_id) {
            Some(row) => {
                update.changeset.revert(row);
                if row.is_empty() {
                    self.table_data.remove(&update.row_id);
                }
            }
            None => {
                let mut row = Row::new();
                update.changeset.revert(&mut row);
                if !row.is_empty() {
                    self.table_data.insert(update.row_id.clone(), row);
                }
            }
        }
    }

    fn apply_cell(&mut self, row_id: &str, column: &str, value: serde_json::Value) {
        self.table_data
            .entry(row_id.to_string())
            .or_default()
            .insert(column.to_string(), value);
    }

    fn run_due_auto_resolutions(&mut self, now: i64) {
        let due: Vec<String> = self
            .conflicts
            .iter()
            .filter(|(_, pc)| pc.auto_resolve_at.map_or(false, |t| t <= now))
            .map(|(id, _)| id.clone())
            .collect();

        for conflict_id in due {
            let event = self.conflicts.get(&conflict_id).expect("due id collected").event.clone();
            let outcome = self
                .registry
                .default_strategy()
                .resolve(&conflict_from_event(&event));

            match outcome {
                Ok(value) => {
                    if let Err(err) =
                        self.resolve_conflict(&conflict_id, EditResolution::Custom, Some(value))
                    {
                        tracing::warn!(conflict = %conflict_id, %err, "auto-resolution failed; conflict retained");
                        if let Some(pc) = self.conflicts.get_mut(&conflict_id) {
                            pc.auto_resolve_at = None;
                        }
                        self.events.emit(&SessionEvent::ConflictResolutionFailed {
                            conflict_id: conflict_id.clone(),
                            error: err.to_string(),
                        });
                    }
                }
                Err(err) => {
                    tracing::debug!(conflict = %conflict_id, %err, "default strategy declined; awaiting manual resolution");
                    if let Some(pc) = self.conflicts.get_mut(&conflict_id) {
                        pc.auto_resolve_at = None;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for TableSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSession")
            .field("table_id", &self.table_id)
            .field("rows", &self.table_data.len())
            .field("pending_edits", &self.pending_edits.len())
            .field("conflicts", &self.conflicts.len())
            .field("version", &self.version)
            .field("online", &self.online)
            .finish()
    }
}

fn conflict_from_event(event: &ConflictEvent) -> Conflict {
    Conflict {
        id: event.edit_id.clone(),
        table_id: event.table_id.clone(),
        row_id: event.row_id.clone(),
        column: event.column.clone(),
        conflict_type: ConflictDetector::detect_type(&event.local_value, &event.merged_value),
        local_value: event.local_value.clone(),
        remote_value: event.merged_value.clone(),
        base_value: event.base_value.clone(),
        local_timestamp: event.timestamp,
        remote_timestamp: event.timestamp,
        detected_at: event.timestamp,
        metadata: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChannelSink;
    use serde_json::json;

    #[test]
    fn test_session_creation() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.offline.queue_dir = temp.path().to_path_buf();

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let session =
            TableSession::new("invoices", &config, Box::new(ChannelSink::new(tx))).unwrap();

        assert_eq!(session.table_id(), "invoices");
        assert_eq!(session.version(), 0);
        assert_eq!(session.pending_edit_count(), 0);
        assert!(session.is_online());
    }

    #[test]
    fn test_old_value_derived_from_mirror() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.offline.queue_dir = temp.path().to_path_buf();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut session =
            TableSession::new("invoices", &config, Box::new(ChannelSink::new(tx))).unwrap();
        session.seed_row("r1", Row::from([("total".to_string(), json!(10))]));

        session.edit_cell("r1", "total", json!(12), None).unwrap();
        match rx.try_recv().unwrap() {
            ClientMessage::SubmitEdit { old_value, new_value, .. } => {
                assert_eq!(old_value, Some(json!(10)));
                assert_eq!(new_value, json!(12));
            }
            other => panic!("expected SubmitEdit, got {other:?}"),
        }
    }
}
