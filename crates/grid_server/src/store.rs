//! SQLite canonical store
//!
//! The persistence contract behind the sync coordinator: per-record
//! compare-and-write by version, a change log for Download pagination,
//! conflict storage and per-device sync metadata. One write transaction
//! covers exactly one record, so concurrent uploads touching different rows
//! never wait on each other's batches.

use grid_common::batch::ChangeEvent;
use grid_common::{ChangeOperation, Conflict, GridError, Result, Row, RowChange};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// A server-authoritative row
#[derive(Debug, Clone)]
pub struct CanonicalRecord {
    pub table_id: String,
    pub row_id: String,
    pub data: Row,
    pub version: u64,
    pub updated_at: i64,
    pub deleted: bool,
}

/// Outcome of a guarded write
#[derive(Debug, Clone)]
pub enum WriteResult {
    Applied { new_version: u64 },
    /// The stored version is newer than the declared base; nothing written
    VersionMismatch { stored: CanonicalRecord },
}

/// One audit row per sync operation
#[derive(Debug, Clone)]
pub struct SyncLogEntry {
    pub user_id: String,
    pub device_id: String,
    pub action: String,
    pub resource_count: usize,
    pub conflict_count: usize,
    pub synced_at: i64,
}

/// Storage contract the sync coordinator runs against
pub trait SyncStore: Send + Sync {
    fn get_record(
        &self,
        user_id: &str,
        table_id: &str,
        row_id: &str,
    ) -> Result<Option<CanonicalRecord>>;

    /// Compare-and-write one record: applied only when the stored version is
    /// not newer than `base_version`. Runs in a single transaction.
    fn write_record(
        &self,
        user_id: &str,
        table_id: &str,
        row_id: &str,
        operation: ChangeOperation,
        fields: &Row,
        base_version: u64,
        now: i64,
    ) -> Result<WriteResult>;

    /// Unconditional upsert, used when a resolution overrides the guard
    fn put_record(&self, user_id: &str, record: &CanonicalRecord) -> Result<()>;

    fn append_change(&self, user_id: &str, event: &ChangeEvent) -> Result<()>;
    fn change_exists(&self, change_id: &str) -> Result<bool>;
    fn list_changes_since(
        &self,
        user_id: &str,
        since: i64,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>>;

    fn save_conflict(&self, user_id: &str, conflict: &Conflict) -> Result<()>;
    fn get_conflict(&self, user_id: &str, conflict_id: &str) -> Result<Option<Conflict>>;
    /// Unresolved conflicts, oldest first
    fn list_conflicts(&self, user_id: &str) -> Result<Vec<Conflict>>;
    fn delete_conflict(&self, user_id: &str, conflict_id: &str) -> Result<()>;

    fn get_metadata(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Option<grid_common::batch::SyncMetadata>>;
    fn update_metadata(&self, metadata: &grid_common::batch::SyncMetadata) -> Result<()>;

    fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<()>;

    /// Delete change-log entries older than `cutoff`; returns rows removed
    fn purge_changes_before(&self, cutoff: i64) -> Result<usize>;
    /// All (user, table) pairs present in the change log
    fn change_scopes(&self) -> Result<Vec<(String, String)>>;
    /// Evict oldest change-log entries beyond `max_items` for one table
    fn cap_table_history(&self, user_id: &str, table_id: &str, max_items: usize)
        -> Result<usize>;
}

/// SQLite-backed canonical store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn storage_err(e: rusqlite::Error) -> GridError {
    GridError::Storage(e.to_string())
}

impl SqliteStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::init(conn, Some(path))
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])
            .map_err(storage_err)?;
        conn.execute_batch(include_str!("schema.sql"))
            .map_err(storage_err)?;
        tracing::info!(?path, "canonical store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| GridError::Storage("store mutex poisoned".to_string()))
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, i64, i64, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn decode_record(
        (table_id, row_id, data, version, updated_at, deleted): (String, String, String, i64, i64, i64),
    ) -> Result<CanonicalRecord> {
        Ok(CanonicalRecord {
            table_id,
            row_id,
            data: serde_json::from_str(&data)?,
            version: version as u64,
            updated_at,
            deleted: deleted != 0,
        })
    }
}

impl SyncStore for SqliteStore {
    fn get_record(
        &self,
        user_id: &str,
        table_id: &str,
        row_id: &str,
    ) -> Result<Option<CanonicalRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT table_id, row_id, data, version, updated_at, deleted
                 FROM records WHERE user_id = ?1 AND table_id = ?2 AND row_id = ?3",
                params![user_id, table_id, row_id],
                Self::row_to_record,
            )
            .optional()
            .map_err(storage_err)?;

        raw.map(Self::decode_record).transpose()
    }

    fn write_record(
        &self,
        user_id: &str,
        table_id: &str,
        row_id: &str,
        operation: ChangeOperation,
        fields: &Row,
        base_version: u64,
        now: i64,
    ) -> Result<WriteResult> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;

        let raw = tx
            .query_row(
                "SELECT table_id, row_id, data, version, updated_at, deleted
                 FROM records WHERE user_id = ?1 AND table_id = ?2 AND row_id = ?3",
                params![user_id, table_id, row_id],
                Self::row_to_record,
            )
            .optional()
            .map_err(storage_err)?;
        let stored = raw.map(Self::decode_record).transpose()?;

        if let Some(record) = &stored {
            if !record.deleted && record.version > base_version {
                return Ok(WriteResult::VersionMismatch {
                    stored: record.clone(),
                });
            }
        }

        let stored_version = stored.as_ref().map(|r| r.version).unwrap_or(0);
        let new_version = stored_version.max(base_version) + 1;

        let (data, deleted) = match operation {
            ChangeOperation::Delete => {
                // tombstone keeps the last data for recovery
                let data = stored.as_ref().map(|r| r.data.clone()).unwrap_or_default();
                (data, true)
            }
            ChangeOperation::Insert | ChangeOperation::Update => {
                let mut data = match &stored {
                    Some(record) if !record.deleted => record.data.clone(),
                    _ => Row::new(),
                };
                for (column, value) in fields {
                    data.insert(column.clone(), value.clone());
                }
                (data, false)
            }
        };

        tx.execute(
            "INSERT INTO records (user_id, table_id, row_id, data, version, updated_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, table_id, row_id) DO UPDATE SET
                data = excluded.data,
                version = excluded.version,
                updated_at = excluded.updated_at,
                deleted = excluded.deleted",
            params![
                user_id,
                table_id,
                row_id,
                serde_json::to_string(&data)?,
                new_version as i64,
                now,
                deleted as i64,
            ],
        )
        .map_err(storage_err)?;

        tx.commit().map_err(storage_err)?;
        Ok(WriteResult::Applied { new_version })
    }

    fn put_record(&self, user_id: &str, record: &CanonicalRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO records (user_id, table_id, row_id, data, version, updated_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, table_id, row_id) DO UPDATE SET
                data = excluded.data,
                version = excluded.version,
                updated_at = excluded.updated_at,
                deleted = excluded.deleted",
            params![
                user_id,
                record.table_id,
                record.row_id,
                serde_json::to_string(&record.data)?,
                record.version as i64,
                record.updated_at,
                record.deleted as i64,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn append_change(&self, user_id: &str, event: &ChangeEvent) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO change_log
                (change_id, user_id, table_id, row_id, operation, changes, version, device_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.change_id,
                user_id,
                event.change.table_id,
                event.change.row_id,
                serde_json::to_string(&event.change.operation)?,
                serde_json::to_string(&event.change.changes)?,
                event.change.version as i64,
                event.device_id,
                event.timestamp,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn change_exists(&self, change_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM change_log WHERE change_id = ?1",
                [change_id],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        Ok(count > 0)
    }

    fn list_changes_since(
        &self,
        user_id: &str,
        since: i64,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT change_id, table_id, row_id, operation, changes, version, device_id, timestamp
                 FROM change_log
                 WHERE user_id = ?1 AND timestamp > ?2
                 ORDER BY timestamp ASC
                 LIMIT ?3",
            )
            .map_err(storage_err)?;

        let rows = stmt
            .query_map(params![user_id, since, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;

        rows.into_iter()
            .map(
                |(change_id, table_id, row_id, operation, changes, version, device_id, timestamp)| {
                    Ok(ChangeEvent {
                        change_id,
                        device_id,
                        timestamp,
                        change: RowChange {
                            table_id,
                            row_id,
                            operation: serde_json::from_str(&operation)?,
                            changes: serde_json::from_str(&changes)?,
                            version: version as u64,
                        },
                    })
                },
            )
            .collect()
    }

    fn save_conflict(&self, user_id: &str, conflict: &Conflict) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO conflicts (conflict_id, user_id, data, detected_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conflict.id,
                user_id,
                serde_json::to_string(conflict)?,
                conflict.detected_at,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn get_conflict(&self, user_id: &str, conflict_id: &str) -> Result<Option<Conflict>> {
        let conn = self.lock()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM conflicts WHERE user_id = ?1 AND conflict_id = ?2",
                params![user_id, conflict_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;

        data.map(|d| serde_json::from_str(&d).map_err(GridError::from))
            .transpose()
    }

    fn list_conflicts(&self, user_id: &str) -> Result<Vec<Conflict>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT data FROM conflicts WHERE user_id = ?1 ORDER BY detected_at ASC",
            )
            .map_err(storage_err)?;

        let rows = stmt
            .query_map([user_id], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;

        rows.into_iter()
            .map(|d| serde_json::from_str(&d).map_err(GridError::from))
            .collect()
    }

    fn delete_conflict(&self, user_id: &str, conflict_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM conflicts WHERE user_id = ?1 AND conflict_id = ?2",
            params![user_id, conflict_id],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn get_metadata(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Option<grid_common::batch::SyncMetadata>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT last_sync_at, total_synced, conflicts_count
             FROM sync_metadata WHERE user_id = ?1 AND device_id = ?2",
            params![user_id, device_id],
            |row| {
                Ok(grid_common::batch::SyncMetadata {
                    user_id: user_id.to_string(),
                    device_id: device_id.to_string(),
                    last_sync_at: row.get(0)?,
                    total_synced: row.get::<_, i64>(1)? as u64,
                    conflicts_count: row.get::<_, i64>(2)? as u64,
                })
            },
        )
        .optional()
        .map_err(storage_err)
    }

    fn update_metadata(&self, metadata: &grid_common::batch::SyncMetadata) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_metadata (user_id, device_id, last_sync_at, total_synced, conflicts_count)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, device_id) DO UPDATE SET
                last_sync_at = excluded.last_sync_at,
                total_synced = excluded.total_synced,
                conflicts_count = excluded.conflicts_count",
            params![
                metadata.user_id,
                metadata.device_id,
                metadata.last_sync_at,
                metadata.total_synced as i64,
                metadata.conflicts_count as i64,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_log (user_id, device_id, action, resource_count, conflict_count, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.user_id,
                entry.device_id,
                entry.action,
                entry.resource_count as i64,
                entry.conflict_count as i64,
                entry.synced_at,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn purge_changes_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM change_log WHERE timestamp < ?1", [cutoff])
            .map_err(storage_err)
    }

    fn change_scopes(&self) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT user_id, table_id FROM change_log")
            .map_err(storage_err)?;
        let scopes = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok(scopes)
    }

    fn cap_table_history(
        &self,
        user_id: &str,
        table_id: &str,
        max_items: usize,
    ) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM change_log
             WHERE user_id = ?1 AND table_id = ?2 AND change_id NOT IN (
                 SELECT change_id FROM change_log
                 WHERE user_id = ?1 AND table_id = ?2
                 ORDER BY timestamp DESC
                 LIMIT ?3
             )",
            params![user_id, table_id, max_items as i64],
        )
        .map_err(storage_err)
    }
}
