//! Common types and errors for GridSync
//!
//! This crate provides the shared data model used by both the client-side
//! sync engine (`grid_sync`) and the server-side coordinator (`grid_server`).

pub mod batch;
pub mod sanitizer;
pub mod telemetry;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Core error types for GridSync operations
#[derive(Error, Debug)]
pub enum GridError {
    #[error("Transport send failed: {0}")]
    Transport(String),

    #[error("No acknowledgement for edit {edit_id} within {timeout_ms}ms")]
    AckTimeout { edit_id: String, timeout_ms: u64 },

    #[error("Version conflict on {table_id}/{row_id}: stored version {stored} is newer than base {base}")]
    VersionConflict {
        table_id: String,
        row_id: String,
        stored: u64,
        base: u64,
    },

    #[error("Unknown resolution strategy: {0}")]
    UnknownStrategy(String),

    #[error("Row not found: {table_id}/{row_id}")]
    RowNotFound { table_id: String, row_id: String },

    #[error("Optimistic ledger full: {pending}/{limit} pending updates")]
    CapacityExceeded { pending: usize, limit: usize },

    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    #[error("Rate limit exceeded: {current}/{limit} in {window}s")]
    RateLimit {
        current: usize,
        limit: usize,
        window: u64,
    },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, GridError>;

/// A table row: column name to cell value
pub type Row = HashMap<String, serde_json::Value>;

/// Current wall-clock time in Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a unique id with the given prefix, e.g. `edit_1714069000000_3fa9c1`.
///
/// Timestamp-ordered with a random suffix; uniqueness holds per process
/// without any central counter.
pub fn new_id(prefix: &str) -> String {
    let suffix: u32 = rand::random::<u32>() & 0x00ff_ffff;
    format!("{}_{}_{:06x}", prefix, now_ms(), suffix)
}

/// Operation performed on a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// A committed row mutation, as exchanged on both channels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowChange {
    pub table_id: String,
    pub row_id: String,
    pub operation: ChangeOperation,

    /// Columns touched by the mutation (empty for deletes)
    #[serde(default)]
    pub changes: Row,

    /// Table version this change was committed at
    pub version: u64,
}

/// Classification of a detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Same runtime type, diverging values
    Value,
    /// Differing runtime types
    Type,
    /// Both composite, diverging key sets
    Structural,
}

/// A divergence between a local edit's base state and the canonical state.
///
/// Conflicts are created on version mismatch and destroyed only by explicit
/// or automatic resolution, never by timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Same id as the edit/change that raised it
    pub id: String,
    pub table_id: String,
    pub row_id: String,

    /// Column for cell-level conflicts; `None` for whole-row operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    pub local_value: serde_json::Value,
    pub remote_value: serde_json::Value,

    /// Value both sides started from, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_value: Option<serde_json::Value>,

    /// When the losing side last wrote (Unix ms)
    pub local_timestamp: i64,
    /// When the canonical side last wrote (Unix ms)
    pub remote_timestamp: i64,

    pub detected_at: i64,
    pub conflict_type: ConflictType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// An exact, invertible record of the fields touched by one mutation.
///
/// `before` must carry an entry for every touched field; `None` means the
/// field (or row) did not exist before the mutation. Rollback completeness is
/// structural: [`ReversibleChangeset::revert`] restores exactly the captured
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversibleChangeset {
    pub fields_touched: Vec<String>,
    pub before: HashMap<String, Option<serde_json::Value>>,
    pub after: HashMap<String, Option<serde_json::Value>>,
}

impl ReversibleChangeset {
    /// Changeset for a single cell edit
    pub fn cell(
        column: &str,
        before: Option<serde_json::Value>,
        after: serde_json::Value,
    ) -> Self {
        Self {
            fields_touched: vec![column.to_string()],
            before: HashMap::from([(column.to_string(), before)]),
            after: HashMap::from([(column.to_string(), Some(after))]),
        }
    }

    /// Changeset for a multi-column update against an existing row
    pub fn row_update(changes: &Row, current: &Row) -> Self {
        let mut fields = Vec::new();
        let mut before = HashMap::new();
        let mut after = HashMap::new();
        for (column, value) in changes {
            fields.push(column.clone());
            before.insert(column.clone(), current.get(column).cloned());
            after.insert(column.clone(), Some(value.clone()));
        }
        fields.sort();
        Self {
            fields_touched: fields,
            before,
            after,
        }
    }

    /// Changeset for inserting a row that did not exist before
    pub fn row_insert(row: &Row) -> Self {
        let mut fields: Vec<String> = row.keys().cloned().collect();
        fields.sort();
        Self {
            before: fields.iter().map(|f| (f.clone(), None)).collect(),
            after: row
                .iter()
                .map(|(k, v)| (k.clone(), Some(v.clone())))
                .collect(),
            fields_touched: fields,
        }
    }

    /// Changeset for deleting a row, snapshotting every field
    pub fn row_delete(row: &Row) -> Self {
        let mut fields: Vec<String> = row.keys().cloned().collect();
        fields.sort();
        Self {
            before: row
                .iter()
                .map(|(k, v)| (k.clone(), Some(v.clone())))
                .collect(),
            after: fields.iter().map(|f| (f.clone(), None)).collect(),
            fields_touched: fields,
        }
    }

    /// Whether every touched field has a `before` snapshot
    pub fn is_complete(&self) -> bool {
        self.fields_touched
            .iter()
            .all(|f| self.before.contains_key(f))
    }

    /// Restore the pre-mutation state of every touched field in `row`
    pub fn revert(&self, row: &mut Row) {
        for field in &self.fields_touched {
            match self.before.get(field) {
                Some(Some(value)) => {
                    row.insert(field.clone(), value.clone());
                }
                Some(None) | None => {
                    row.remove(field);
                }
            }
        }
    }

    /// True when the changeset leaves no field behind (a full-row delete)
    pub fn removes_all_fields(&self) -> bool {
        !self.after.is_empty() && self.after.values().all(|v| v.is_none())
    }
}
