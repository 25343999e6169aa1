//! Fixture builders and test doubles
//!
//! Rows, upload changes, recording/failing live-channel sinks, and a
//! ready-wired table session over a temporary offline directory.

use grid_common::batch::UploadChange;
use grid_common::{ChangeOperation, GridError, Result, Row};
use grid_config::Config;
use grid_sync::protocol::{ClientMessage, EditSink};
use grid_sync::TableSession;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Build a row from `(column, value)` pairs
pub fn row<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Row {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Build a cell-level upload change with a valid checksum
pub fn upload_change(
    id: &str,
    table_id: &str,
    row_id: &str,
    column: &str,
    old_value: serde_json::Value,
    new_value: serde_json::Value,
    base_version: u64,
    client_timestamp: i64,
) -> UploadChange {
    UploadChange {
        id: id.to_string(),
        table_id: table_id.to_string(),
        row_id: row_id.to_string(),
        column: Some(column.to_string()),
        operation: ChangeOperation::Update,
        old_value: Some(old_value),
        new_value: Some(new_value),
        base_version,
        client_timestamp,
        checksum: None,
    }
    .with_checksum()
}

/// Live-channel sink that records every submitted message
#[derive(Clone, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<ClientMessage>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ClientMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<ClientMessage> {
        self.messages.lock().unwrap().last().cloned()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl EditSink for RecordingSink {
    fn submit(&self, message: &ClientMessage) -> Result<()> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Live-channel sink that fails every submission
#[derive(Clone, Copy, Default)]
pub struct FailingSink;

impl EditSink for FailingSink {
    fn submit(&self, _message: &ClientMessage) -> Result<()> {
        Err(GridError::Transport("test sink refuses delivery".to_string()))
    }
}

/// A table session wired to a [`RecordingSink`] and a temporary offline
/// queue directory. Keep the returned `TempDir` alive for the session's
/// lifetime.
pub fn recorded_session(table_id: &str) -> (TableSession, RecordingSink, TempDir) {
    let temp = tempfile::tempdir().expect("temp dir for offline queue");
    let mut config = Config::default();
    config.offline.queue_dir = temp.path().to_path_buf();

    let sink = RecordingSink::new();
    let session = TableSession::new(table_id, &config, Box::new(sink.clone()))
        .expect("session construction");
    (session, sink, temp)
}
