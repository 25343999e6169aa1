//! # GridSync Server Coordinator
//!
//! Authoritative side of the batch reconciliation channel.
//!
//! ## Architecture
//!
//! - **Canonical store**: SQLite-backed records with per-record
//!   compare-and-write by version
//! - **Upload**: batches applied record-by-record in submission order;
//!   version mismatches become stored conflicts, never silent overwrites
//! - **Download**: timestamp-paginated change log
//! - **Resolution**: `last_write_wins`, `keep_both` (sibling records, no
//!   data dropped) and `user_choice`
//! - **Retention**: background sweep purging aged change events and capping
//!   per-table history
//!
//! ## Usage
//!
//! ```rust,no_run
//! use grid_server::{SqliteStore, SyncService};
//! use grid_config::SyncConfig;
//! use std::sync::Arc;
//!
//! fn main() -> grid_common::Result<()> {
//!     let store = Arc::new(SqliteStore::open(std::path::Path::new("gridsync.db"))?);
//!     let service = Arc::new(SyncService::new(store, SyncConfig::default()));
//!     let _sweeper = service
//!         .clone()
//!         .spawn_retention_sweeper(std::time::Duration::from_secs(3600));
//!     Ok(())
//! }
//! ```

pub mod service;
pub mod store;

pub use service::{RetentionReport, SyncService};
pub use store::{CanonicalRecord, SqliteStore, SyncLogEntry, SyncStore, WriteResult};

// Batch payload shapes shared with clients
pub use grid_common::batch::{
    ConflictListResponse, ResolveConflictRequest, ResolveConflictResponse, ServerResolution,
    SyncDownloadRequest, SyncDownloadResponse, SyncUploadRequest, SyncUploadResponse,
    UploadChange, UploadOutcome,
};
