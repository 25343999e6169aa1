//! Client-side sync data types

use grid_common::{ChangeOperation, ReversibleChangeset};
use serde::{Deserialize, Serialize};

/// Lifecycle of a submitted edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStatus {
    Pending,
    Confirmed,
    Rejected,
}

/// A locally-requested mutation awaiting server acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edit {
    pub edit_id: String,
    pub table_id: String,
    pub row_id: String,

    /// Column for cell edits; `None` for whole-row operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    /// Row operation kind; `None` for plain cell edits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<ChangeOperation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<serde_json::Value>,
    pub new_value: serde_json::Value,

    /// Local table version the edit was made against
    pub version: u64,
    pub status: EditStatus,
}

/// What kind of mutation an optimistic update covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    CellEdit,
    RowOp,
}

/// Lifecycle of an optimistic update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Pending,
    Confirmed,
    Rejected,
}

/// Why an optimistic update was rolled back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackReason {
    Error,
    Conflict,
    Timeout,
}

/// A locally-applied change shown to the user before server confirmation.
///
/// The changeset snapshot carries every field it touched; rollback restores
/// exactly the pre-update state.
#[derive(Debug, Clone)]
pub struct OptimisticUpdate {
    pub id: String,
    pub kind: UpdateKind,
    pub table_id: String,
    pub row_id: String,
    pub changeset: ReversibleChangeset,
    pub timestamp: i64,
    pub status: UpdateStatus,

    /// Auto-rollback fires when the wall clock passes this (pending only)
    pub(crate) deadline: i64,

    /// Confirmed updates are purged once the wall clock passes this
    pub(crate) purge_at: Option<i64>,
}
