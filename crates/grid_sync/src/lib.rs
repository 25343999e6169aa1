//! # GridSync Client Engine
//!
//! Client-side synchronization core for shared table editing.
//!
//! ## Architecture
//!
//! - **Table session**: per-table mirror of rows plus the edit coordinator
//! - **Optimistic ledger**: locally-applied-but-unconfirmed changes with
//!   timeout-based auto-rollback
//! - **Conflict detector / strategy registry**: classifies divergences and
//!   maps them to pluggable merge policies
//! - **Offline support**: queued changes persisted on disk, re-submitted as
//!   an Upload batch on reconnect
//!
//! ## Usage
//!
//! ```rust,no_run
//! use grid_sync::{protocol::ChannelSink, TableSession};
//! use grid_config::Config;
//! use serde_json::json;
//!
//! fn main() -> grid_common::Result<()> {
//!     let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
//!     let config = Config::default();
//!     let mut session =
//!         TableSession::new("invoices", &config, Box::new(ChannelSink::new(tx)))?;
//!
//!     session.seed_row("r1", [("total".to_string(), json!(10))].into());
//!     session.edit_cell("r1", "total", json!(12), None)?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod detector;
pub mod events;
pub mod ledger;
pub mod offline;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod types;

pub use client::LiveClient;
pub use detector::{ConflictDetector, Suggestion};
pub use events::{EventBus, SessionEvent, SubscriptionToken};
pub use ledger::OptimisticLedger;
pub use offline::OfflineQueue;
pub use protocol::{ChannelSink, ClientMessage, ConflictEvent, EditSink, ServerEvent};
pub use registry::{ResolutionStrategy, StrategyRegistry};
pub use session::{EditResolution, TableSession};
pub use types::{Edit, EditStatus, OptimisticUpdate, RollbackReason, UpdateKind, UpdateStatus};

/// Common result type for sync operations
pub type Result<T> = grid_common::Result<T>;
