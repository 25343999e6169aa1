//! Batch-channel payloads
//!
//! Request/response shapes for device-to-device reconciliation: Upload,
//! Download, conflict listing and conflict resolution. The live channel has
//! its own message types in `grid_sync::protocol`; these are the paginated
//! request/response counterparts.

use crate::{ChangeOperation, Conflict, RowChange};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One queued local mutation, uploaded after an offline period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadChange {
    /// Client-assigned change id; uploads are idempotent per id
    pub id: String,
    pub table_id: String,
    pub row_id: String,

    /// Column for cell edits; `None` for whole-row operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    pub operation: ChangeOperation,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<serde_json::Value>,

    /// New cell value, or the full row object for row operations.
    /// `None` for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<serde_json::Value>,

    /// Table version the client last saw for this record
    pub base_version: u64,

    /// When the client made the edit (Unix ms)
    pub client_timestamp: i64,

    /// SHA-256 over the change content; verified server-side when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl UploadChange {
    /// Deterministic SHA-256 checksum over the fields that identify the
    /// change content. Excludes `checksum` itself and `client_timestamp`
    /// (retries keep the same digest).
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.table_id.as_bytes());
        hasher.update(self.row_id.as_bytes());
        if let Some(column) = &self.column {
            hasher.update(column.as_bytes());
        }
        hasher.update(format!("{:?}", self.operation).as_bytes());
        if let Some(value) = &self.new_value {
            hasher.update(value.to_string().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Attach the computed checksum
    pub fn with_checksum(mut self) -> Self {
        self.checksum = Some(self.compute_checksum());
        self
    }
}

/// Upload request: local changes accumulated on one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncUploadRequest {
    pub user_id: String,
    pub device_id: String,
    pub changes: Vec<UploadChange>,
}

/// Per-change upload outcome. The outcome list always has exactly one entry
/// per submitted change, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Applied { change_id: String },
    Conflict { change_id: String, conflict_id: String },
    Rejected { change_id: String, reason: String },
}

impl UploadOutcome {
    pub fn change_id(&self) -> &str {
        match self {
            UploadOutcome::Applied { change_id }
            | UploadOutcome::Conflict { change_id, .. }
            | UploadOutcome::Rejected { change_id, .. } => change_id,
        }
    }
}

/// Upload response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncUploadResponse {
    pub outcomes: Vec<UploadOutcome>,
    pub conflicts: Vec<Conflict>,
    pub synced_at: i64,
}

impl SyncUploadResponse {
    /// Ids of changes that were applied (including idempotent re-uploads)
    pub fn applied_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                UploadOutcome::Applied { change_id } => Some(change_id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Download request: canonical changes committed after `since_timestamp`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDownloadRequest {
    pub user_id: String,
    pub device_id: String,
    pub since_timestamp: i64,
}

/// One canonical change event in the server's change log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub change_id: String,
    pub device_id: String,
    /// Server commit time (Unix ms); strictly increasing per user
    pub timestamp: i64,
    #[serde(flatten)]
    pub change: RowChange,
}

/// Download response. Pages are ascending by timestamp; pass
/// `next_since_timestamp` back to continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDownloadResponse {
    pub changes: Vec<ChangeEvent>,
    pub next_since_timestamp: i64,
    pub has_more: bool,
}

/// Conflict listing response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictListResponse {
    pub conflicts: Vec<Conflict>,
    pub count: usize,
}

/// Server-side resolution strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerResolution {
    /// Apply whichever side wrote later
    LastWriteWins,
    /// Persist both sides; the losing value becomes a sibling record
    KeepBoth,
    /// Apply the caller-supplied value
    UserChoice,
}

/// Conflict resolution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConflictRequest {
    pub conflict_id: String,
    pub strategy: ServerResolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Conflict resolution response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConflictResponse {
    pub resolved_value: serde_json::Value,
    pub success: bool,
    pub resolved_at: i64,
}

/// Per-device sync bookkeeping, updated on every upload/download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub user_id: String,
    pub device_id: String,
    pub last_sync_at: i64,
    pub total_synced: u64,
    pub conflicts_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Row;
    use serde_json::json;

    fn sample_change() -> UploadChange {
        UploadChange {
            id: "chg_1".to_string(),
            table_id: "invoices".to_string(),
            row_id: "r1".to_string(),
            column: Some("total".to_string()),
            operation: ChangeOperation::Update,
            old_value: Some(json!(10)),
            new_value: Some(json!(12)),
            base_version: 3,
            client_timestamp: 1_700_000_000_000,
            checksum: None,
        }
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let a = sample_change().with_checksum();
        let mut b = sample_change();
        b.client_timestamp += 5_000; // a retry later keeps the digest
        assert_eq!(a.checksum.as_deref(), Some(b.compute_checksum().as_str()));
    }

    #[test]
    fn test_checksum_tracks_content() {
        let a = sample_change();
        let mut b = sample_change();
        b.new_value = Some(json!(13));
        assert_ne!(a.compute_checksum(), b.compute_checksum());
    }

    #[test]
    fn test_change_event_flattens_row_change() {
        let event = ChangeEvent {
            change_id: "chg_1".to_string(),
            device_id: "dev_a".to_string(),
            timestamp: 42,
            change: RowChange {
                table_id: "invoices".to_string(),
                row_id: "r1".to_string(),
                operation: ChangeOperation::Update,
                changes: Row::from([("total".to_string(), json!(12))]),
                version: 4,
            },
        };

        let value = serde_json::to_value(&event).unwrap();
        // §6 wire shape is flat: no nested "change" object
        assert_eq!(value["table_id"], json!("invoices"));
        assert_eq!(value["timestamp"], json!(42));
        assert!(value.get("change").is_none());
    }

    #[test]
    fn test_upload_outcome_tagging() {
        let outcome = UploadOutcome::Conflict {
            change_id: "chg_1".to_string(),
            conflict_id: "chg_1".to_string(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], json!("conflict"));
        assert_eq!(outcome.change_id(), "chg_1");
    }
}
