//! Server sync coordinator
//!
//! Authoritative side of the batch channel: applies uploaded batches
//! record-by-record in submission order, serves paginated downloads, lists
//! and resolves conflicts, and enforces retention. A batch is never atomic
//! as a whole — every change gets its own outcome, and the outcome list
//! always matches the input length.

use crate::store::{CanonicalRecord, SyncLogEntry, SyncStore, WriteResult};
use grid_common::batch::{
    ChangeEvent, ConflictListResponse, ResolveConflictRequest, ResolveConflictResponse,
    ServerResolution, SyncDownloadRequest, SyncDownloadResponse, SyncMetadata,
    SyncUploadRequest, SyncUploadResponse, UploadChange, UploadOutcome,
};
use grid_common::sanitizer::UploadSanitizer;
use grid_common::{
    new_id, now_ms, ChangeOperation, Conflict, GridError, Result, Row, RowChange,
};
use grid_config::SyncConfig;
use grid_sync::detector::ConflictDetector;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Device id recorded on change events the server itself emits
const SERVER_DEVICE_ID: &str = "server";

/// What one retention sweep removed
#[derive(Debug, Default, Clone, Copy)]
pub struct RetentionReport {
    pub purged_by_age: usize,
    pub evicted_by_cap: usize,
}

/// Sliding-window request limiter, counted per user
struct RateLimiter {
    limit: usize,
    window_ms: i64,
    hits: HashMap<String, VecDeque<i64>>,
}

impl RateLimiter {
    fn new(limit: usize, window_ms: i64) -> Self {
        Self {
            limit,
            window_ms,
            hits: HashMap::new(),
        }
    }

    fn check(&mut self, user_id: &str, now: i64) -> Result<()> {
        let hits = self.hits.entry(user_id.to_string()).or_default();
        while hits.front().is_some_and(|t| now - t >= self.window_ms) {
            hits.pop_front();
        }
        if hits.len() >= self.limit {
            return Err(GridError::RateLimit {
                current: hits.len(),
                limit: self.limit,
                window: (self.window_ms / 1_000) as u64,
            });
        }
        hits.push_back(now);
        Ok(())
    }
}

/// Batch-channel coordinator over a canonical store
pub struct SyncService<S: SyncStore> {
    store: Arc<S>,
    config: SyncConfig,
    sanitizer: UploadSanitizer,
    detector: ConflictDetector,
    limiter: Mutex<RateLimiter>,
    /// Last allocated change-event timestamp; keeps the log strictly
    /// increasing even when several changes land in the same millisecond
    change_clock: Mutex<i64>,
}

impl<S: SyncStore + 'static> SyncService<S> {
    pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_rpm, 60_000);
        Self {
            store,
            config,
            sanitizer: UploadSanitizer::new(),
            detector: ConflictDetector::new(),
            limiter: Mutex::new(limiter),
            change_clock: Mutex::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply a batch of uploaded changes, one guarded write per change, in
    /// submission order. Version mismatches record a conflict instead of
    /// applying; the conflicting record stays unmutated until resolved.
    pub fn upload(&self, request: &SyncUploadRequest) -> Result<SyncUploadResponse> {
        self.validate_upload(request)?;
        let now = now_ms();
        self.limiter
            .lock()
            .map_err(|_| GridError::Storage("rate limiter mutex poisoned".to_string()))?
            .check(&request.user_id, now)?;

        tracing::info!(
            user = %request.user_id,
            device = %request.device_id,
            changes = request.changes.len(),
            "processing sync upload"
        );

        let mut outcomes = Vec::with_capacity(request.changes.len());
        let mut conflicts = Vec::new();

        for change in &request.changes {
            match self.process_change(&request.user_id, &request.device_id, change) {
                Ok((outcome, conflict)) => {
                    if let Some(conflict) = conflict {
                        conflicts.push(conflict);
                    }
                    outcomes.push(outcome);
                }
                Err(err) => {
                    // per-change failure, never a whole-batch abort
                    tracing::warn!(change = %change.id, %err, "change rejected");
                    outcomes.push(UploadOutcome::Rejected {
                        change_id: change.id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, UploadOutcome::Applied { .. }))
            .count();
        self.record_sync(
            &request.user_id,
            &request.device_id,
            "upload",
            applied as u64,
            now,
        )?;

        tracing::info!(
            user = %request.user_id,
            applied,
            conflicts = conflicts.len(),
            rejected = outcomes.len() - applied - conflicts.len(),
            "sync upload completed"
        );

        Ok(SyncUploadResponse {
            outcomes,
            conflicts,
            synced_at: now,
        })
    }

    /// Canonical changes with `timestamp > since_timestamp`, ascending,
    /// capped at the configured page size.
    pub fn download(&self, request: &SyncDownloadRequest) -> Result<SyncDownloadResponse> {
        if request.user_id.is_empty() || request.device_id.is_empty() {
            return Err(GridError::Validation(
                "user_id and device_id are required".to_string(),
            ));
        }

        let page_size = self.config.page_size;
        let mut changes = self
            .store
            .list_changes_since(&request.user_id, request.since_timestamp, page_size + 1)?;
        let has_more = changes.len() > page_size;
        changes.truncate(page_size);

        let next_since_timestamp = changes
            .last()
            .map(|c| c.timestamp)
            .unwrap_or(request.since_timestamp);

        let now = now_ms();
        self.record_sync(
            &request.user_id,
            &request.device_id,
            "download",
            changes.len() as u64,
            now,
        )?;

        tracing::debug!(
            user = %request.user_id,
            changes = changes.len(),
            has_more,
            "sync download served"
        );

        Ok(SyncDownloadResponse {
            changes,
            next_since_timestamp,
            has_more,
        })
    }

    /// All unresolved conflicts for a user, oldest first
    pub fn list_conflicts(&self, user_id: &str) -> Result<ConflictListResponse> {
        let conflicts = self.store.list_conflicts(user_id)?;
        let count = conflicts.len();
        Ok(ConflictListResponse { conflicts, count })
    }

    /// Resolve a stored conflict. On success the conflict is deleted and a
    /// change event is appended for other devices to pick up on their next
    /// Download.
    pub fn resolve_conflict(
        &self,
        user_id: &str,
        request: &ResolveConflictRequest,
    ) -> Result<ResolveConflictResponse> {
        let conflict = self
            .store
            .get_conflict(user_id, &request.conflict_id)?
            .ok_or_else(|| GridError::ConflictNotFound(request.conflict_id.clone()))?;

        let resolved_value = match request.strategy {
            ServerResolution::LastWriteWins => {
                if conflict.local_timestamp > conflict.remote_timestamp {
                    conflict.local_value.clone()
                } else {
                    conflict.remote_value.clone()
                }
            }
            ServerResolution::UserChoice => request.value.clone().ok_or_else(|| {
                GridError::Validation("user_choice resolution requires a value".to_string())
            })?,
            ServerResolution::KeepBoth => {
                // the canonical side stays; the losing side becomes a
                // sibling record so no data is dropped
                self.persist_sibling(user_id, &conflict)?;
                conflict.remote_value.clone()
            }
        };

        self.apply_resolution(user_id, &conflict, &resolved_value)?;
        self.store.delete_conflict(user_id, &conflict.id)?;

        let now = now_ms();
        self.store.append_sync_log(&SyncLogEntry {
            user_id: user_id.to_string(),
            device_id: SERVER_DEVICE_ID.to_string(),
            action: "resolve".to_string(),
            resource_count: 1,
            conflict_count: 0,
            synced_at: now,
        })?;

        tracing::info!(
            conflict = %conflict.id,
            strategy = ?request.strategy,
            "conflict resolved"
        );

        Ok(ResolveConflictResponse {
            resolved_value,
            success: true,
            resolved_at: now,
        })
    }

    /// Suggest a resolution for a stored conflict
    pub fn suggest_resolution(
        &self,
        user_id: &str,
        conflict_id: &str,
    ) -> Result<grid_sync::detector::Suggestion> {
        let conflict = self
            .store
            .get_conflict(user_id, conflict_id)?
            .ok_or_else(|| GridError::ConflictNotFound(conflict_id.to_string()))?;
        Ok(self.detector.suggest_resolution(&conflict))
    }

    /// Purge change-log entries past retention and cap per-table history
    pub fn sweep_retention(&self) -> Result<RetentionReport> {
        let cutoff = now_ms() - self.config.retention_days as i64 * 24 * 60 * 60 * 1_000;
        let purged_by_age = self.store.purge_changes_before(cutoff)?;

        let mut evicted_by_cap = 0;
        for (user_id, table_id) in self.store.change_scopes()? {
            evicted_by_cap +=
                self.store
                    .cap_table_history(&user_id, &table_id, self.config.max_history_items)?;
        }

        if purged_by_age > 0 || evicted_by_cap > 0 {
            tracing::info!(purged_by_age, evicted_by_cap, "retention sweep completed");
        }
        Ok(RetentionReport {
            purged_by_age,
            evicted_by_cap,
        })
    }

    /// Run the retention sweep on a background interval
    pub fn spawn_retention_sweeper(
        self: Arc<Self>,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep_retention() {
                    tracing::error!(%err, "retention sweep failed");
                }
            }
        })
    }

    // ---- internals -------------------------------------------------------

    fn validate_upload(&self, request: &SyncUploadRequest) -> Result<()> {
        if request.user_id.is_empty() || request.device_id.is_empty() {
            return Err(GridError::Validation(
                "user_id and device_id are required".to_string(),
            ));
        }
        if request.changes.is_empty() {
            return Err(GridError::Validation("no changes to sync".to_string()));
        }

        let size = serde_json::to_vec(&request.changes)?.len();
        if size > self.config.max_upload_size {
            return Err(GridError::Validation(format!(
                "upload size {size} exceeds maximum allowed ({} bytes)",
                self.config.max_upload_size
            )));
        }
        Ok(())
    }

    fn process_change(
        &self,
        user_id: &str,
        device_id: &str,
        change: &UploadChange,
    ) -> Result<(UploadOutcome, Option<Conflict>)> {
        if let Some(expected) = &change.checksum {
            let actual = change.compute_checksum();
            if *expected != actual {
                return Ok((
                    UploadOutcome::Rejected {
                        change_id: change.id.clone(),
                        reason: "checksum mismatch".to_string(),
                    },
                    None,
                ));
            }
        }

        if self.config.screen_credentials {
            if let Some(value) = &change.new_value {
                if let Err(field) = self.sanitizer.screen(value) {
                    return Ok((
                        UploadOutcome::Rejected {
                            change_id: change.id.clone(),
                            reason: format!("credential material in field '{field}'"),
                        },
                        None,
                    ));
                }
            }
        }

        // re-uploading an applied change is a no-op success
        if self.store.change_exists(&change.id)? {
            tracing::debug!(change = %change.id, "change already applied; skipping");
            return Ok((
                UploadOutcome::Applied {
                    change_id: change.id.clone(),
                },
                None,
            ));
        }

        let fields = change_fields(change)?;
        let timestamp = self.next_change_timestamp()?;

        match self.store.write_record(
            user_id,
            &change.table_id,
            &change.row_id,
            change.operation,
            &fields,
            change.base_version,
            timestamp,
        )? {
            WriteResult::Applied { new_version } => {
                self.store.append_change(
                    user_id,
                    &ChangeEvent {
                        change_id: change.id.clone(),
                        device_id: device_id.to_string(),
                        timestamp,
                        change: RowChange {
                            table_id: change.table_id.clone(),
                            row_id: change.row_id.clone(),
                            operation: change.operation,
                            changes: fields,
                            version: new_version,
                        },
                    },
                )?;
                Ok((
                    UploadOutcome::Applied {
                        change_id: change.id.clone(),
                    },
                    None,
                ))
            }
            WriteResult::VersionMismatch { stored } => {
                let conflict = self.build_conflict(device_id, change, &stored, timestamp);
                self.store.save_conflict(user_id, &conflict)?;
                tracing::warn!(
                    change = %change.id,
                    stored_version = stored.version,
                    base_version = change.base_version,
                    "version conflict recorded"
                );
                Ok((
                    UploadOutcome::Conflict {
                        change_id: change.id.clone(),
                        conflict_id: conflict.id.clone(),
                    },
                    Some(conflict),
                ))
            }
        }
    }

    fn build_conflict(
        &self,
        device_id: &str,
        change: &UploadChange,
        stored: &CanonicalRecord,
        detected_at: i64,
    ) -> Conflict {
        let local_value = change.new_value.clone().unwrap_or(serde_json::Value::Null);
        let remote_value = match &change.column {
            Some(column) => stored
                .data
                .get(column)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            None => serde_json::to_value(&stored.data).unwrap_or(serde_json::Value::Null),
        };

        Conflict {
            id: change.id.clone(),
            table_id: change.table_id.clone(),
            row_id: change.row_id.clone(),
            column: change.column.clone(),
            conflict_type: ConflictDetector::detect_type(&local_value, &remote_value),
            local_value,
            remote_value,
            base_value: change.old_value.clone(),
            local_timestamp: change.client_timestamp,
            remote_timestamp: stored.updated_at,
            detected_at,
            metadata: Some(HashMap::from([
                ("device_id".to_string(), device_id.to_string()),
                ("stored_version".to_string(), stored.version.to_string()),
                ("base_version".to_string(), change.base_version.to_string()),
            ])),
        }
    }

    /// Write the losing side of a conflict as a sibling record
    fn persist_sibling(&self, user_id: &str, conflict: &Conflict) -> Result<()> {
        let suffix: String = conflict.id.chars().take(8).collect();
        let sibling_row_id = format!("{}~{}", conflict.row_id, suffix);
        let data = resolution_fields(conflict, &conflict.local_value)?;
        let timestamp = self.next_change_timestamp()?;

        self.store.put_record(
            user_id,
            &CanonicalRecord {
                table_id: conflict.table_id.clone(),
                row_id: sibling_row_id.clone(),
                data: data.clone(),
                version: 1,
                updated_at: timestamp,
                deleted: false,
            },
        )?;
        self.store.append_change(
            user_id,
            &ChangeEvent {
                change_id: new_id("chg"),
                device_id: SERVER_DEVICE_ID.to_string(),
                timestamp,
                change: RowChange {
                    table_id: conflict.table_id.clone(),
                    row_id: sibling_row_id,
                    operation: ChangeOperation::Insert,
                    changes: data,
                    version: 1,
                },
            },
        )?;
        Ok(())
    }

    /// Apply the winning value to the canonical record and broadcast it
    fn apply_resolution(
        &self,
        user_id: &str,
        conflict: &Conflict,
        resolved_value: &serde_json::Value,
    ) -> Result<()> {
        let stored = self
            .store
            .get_record(user_id, &conflict.table_id, &conflict.row_id)?;
        let fields = resolution_fields(conflict, resolved_value)?;
        let timestamp = self.next_change_timestamp()?;

        let mut data = stored
            .as_ref()
            .filter(|r| !r.deleted)
            .map(|r| r.data.clone())
            .unwrap_or_default();
        for (column, value) in &fields {
            data.insert(column.clone(), value.clone());
        }
        let new_version = stored.as_ref().map(|r| r.version).unwrap_or(0) + 1;

        self.store.put_record(
            user_id,
            &CanonicalRecord {
                table_id: conflict.table_id.clone(),
                row_id: conflict.row_id.clone(),
                data,
                version: new_version,
                updated_at: timestamp,
                deleted: false,
            },
        )?;
        self.store.append_change(
            user_id,
            &ChangeEvent {
                change_id: new_id("chg"),
                device_id: SERVER_DEVICE_ID.to_string(),
                timestamp,
                change: RowChange {
                    table_id: conflict.table_id.clone(),
                    row_id: conflict.row_id.clone(),
                    operation: ChangeOperation::Update,
                    changes: fields,
                    version: new_version,
                },
            },
        )?;
        Ok(())
    }

    fn record_sync(
        &self,
        user_id: &str,
        device_id: &str,
        action: &str,
        synced: u64,
        now: i64,
    ) -> Result<()> {
        let unresolved = self.store.list_conflicts(user_id)?.len() as u64;
        let mut metadata = self
            .store
            .get_metadata(user_id, device_id)?
            .unwrap_or(SyncMetadata {
                user_id: user_id.to_string(),
                device_id: device_id.to_string(),
                last_sync_at: 0,
                total_synced: 0,
                conflicts_count: 0,
            });
        metadata.last_sync_at = now;
        metadata.total_synced += synced;
        metadata.conflicts_count = unresolved;
        self.store.update_metadata(&metadata)?;

        self.store.append_sync_log(&SyncLogEntry {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            action: action.to_string(),
            resource_count: synced as usize,
            conflict_count: unresolved as usize,
            synced_at: now,
        })
    }

    fn next_change_timestamp(&self) -> Result<i64> {
        let mut clock = self
            .change_clock
            .lock()
            .map_err(|_| GridError::Storage("change clock mutex poisoned".to_string()))?;
        let next = now_ms().max(*clock + 1);
        *clock = next;
        Ok(next)
    }
}

/// The column map a change writes: a single cell or a whole-row object
fn change_fields(change: &UploadChange) -> Result<Row> {
    match (&change.column, change.operation) {
        (_, ChangeOperation::Delete) => Ok(Row::new()),
        (Some(column), _) => {
            let value = change.new_value.clone().ok_or_else(|| {
                GridError::Validation(format!("change {} is missing a new value", change.id))
            })?;
            Ok(Row::from([(column.clone(), value)]))
        }
        (None, _) => match &change.new_value {
            Some(serde_json::Value::Object(map)) => {
                Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            _ => Err(GridError::Validation(format!(
                "row operation {} requires an object value",
                change.id
            ))),
        },
    }
}

/// Fields written when a conflict resolves to `value`
fn resolution_fields(conflict: &Conflict, value: &serde_json::Value) -> Result<Row> {
    match &conflict.column {
        Some(column) => Ok(Row::from([(column.clone(), value.clone())])),
        None => match value {
            serde_json::Value::Object(map) => {
                Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            _ => Err(GridError::Validation(format!(
                "row-level conflict {} requires an object value",
                conflict.id
            ))),
        },
    }
}
