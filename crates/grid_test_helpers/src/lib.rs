//! Shared test utilities for GridSync test suites
//!
//! This crate provides common testing utilities to eliminate code
//! duplication across test suites and ensure consistent test environments.
//!
//! # Modules
//!
//! - [`fixtures`]: row/change builders, test sinks and session constructors
//! - [`logging`]: test logging configuration
//!
//! # Example
//!
//! ```rust
//! use grid_test_helpers::prelude::*;
//! use serde_json::json;
//!
//! fn my_test() {
//!     init_test_logging();
//!
//!     let (mut session, sink, _queue_dir) = recorded_session("invoices");
//!     session.seed_row("r1", row([("total", json!(10))]));
//!     session.edit_cell("r1", "total", json!(12), None).unwrap();
//!     assert_eq!(sink.messages().len(), 1);
//! }
//! ```

pub mod fixtures;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::{
        recorded_session, row, upload_change, FailingSink, RecordingSink,
    };
    pub use crate::logging::init_test_logging;
}
