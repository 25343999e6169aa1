//! Live channel message types
//!
//! Typed messages exchanged with the server during a live editing session.
//! Transport framing is out of scope: anything that can deliver these
//! messages with eventual delivery works. In-process and test setups use
//! tokio mpsc channels via [`ChannelSink`].

use crate::session::EditResolution;
use grid_common::{ChangeOperation, GridError, Result, Row, RowChange};
use serde::{Deserialize, Serialize};

/// Client → server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit a single cell edit
    SubmitEdit {
        edit_id: String,
        table_id: String,
        row_id: String,
        column: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        old_value: Option<serde_json::Value>,
        new_value: serde_json::Value,
        version: u64,
    },

    /// Submit a whole-row operation
    RowOp {
        edit_id: String,
        table_id: String,
        row_id: String,
        operation: ChangeOperation,
        #[serde(default)]
        changes: Row,
        version: u64,
    },

    /// Best-effort cancellation of an in-flight edit
    CancelEdit { edit_id: String },

    /// Resolve a previously-reported conflict
    ResolveConflict {
        conflict_id: String,
        resolution: EditResolution,
        value: serde_json::Value,
    },
}

/// A conflict reported on the live channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEvent {
    pub edit_id: String,
    pub table_id: String,
    pub row_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub local_value: serde_json::Value,
    pub remote_value: serde_json::Value,
    /// Canonical value after the server's merge; what `accept_remote` applies
    pub merged_value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_value: Option<serde_json::Value>,
    pub timestamp: i64,
}

/// Server → client events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Acknowledge (or reject) a submitted edit
    EditAck {
        edit_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A committed mutation from another participant
    RemoteChange {
        #[serde(flatten)]
        change: RowChange,
    },

    /// Version mismatch on a submitted edit
    Conflict {
        #[serde(flatten)]
        event: ConflictEvent,
    },
}

impl ClientMessage {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl ServerEvent {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Outbound seam of a table session.
///
/// `submit` is synchronous: a failure means the message never left the
/// client, so the caller rolls back immediately. Acks and conflicts come
/// back asynchronously as [`ServerEvent`]s.
pub trait EditSink: Send {
    fn submit(&self, message: &ClientMessage) -> Result<()>;
}

/// Live channel backed by a tokio mpsc sender
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<ClientMessage>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self { tx }
    }
}

impl EditSink for ChannelSink {
    fn submit(&self, message: &ClientMessage) -> Result<()> {
        self.tx
            .send(message.clone())
            .map_err(|_| GridError::Transport("live channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization() {
        let msg = ClientMessage::SubmitEdit {
            edit_id: "edit_1".to_string(),
            table_id: "invoices".to_string(),
            row_id: "r1".to_string(),
            column: "total".to_string(),
            old_value: Some(json!(10)),
            new_value: json!(12),
            version: 3,
        };

        let bytes = msg.to_bytes().unwrap();
        let deserialized = ClientMessage::from_bytes(&bytes).unwrap();

        match deserialized {
            ClientMessage::SubmitEdit { edit_id, version, .. } => {
                assert_eq!(edit_id, "edit_1");
                assert_eq!(version, 3);
            }
            _ => panic!("Expected SubmitEdit message"),
        }
    }

    #[test]
    fn test_server_event_remote_change_is_flat() {
        let event = ServerEvent::RemoteChange {
            change: RowChange {
                table_id: "invoices".to_string(),
                row_id: "r1".to_string(),
                operation: ChangeOperation::Update,
                changes: Row::from([("total".to_string(), json!(14))]),
                version: 4,
            },
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("remote_change"));
        assert_eq!(value["table_id"], json!("invoices"));

        let back = ServerEvent::from_bytes(&serde_json::to_vec(&value).unwrap()).unwrap();
        match back {
            ServerEvent::RemoteChange { change } => assert_eq!(change.version, 4),
            _ => panic!("Expected RemoteChange event"),
        }
    }

    #[test]
    fn test_channel_sink_reports_closed_channel() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        drop(rx);

        let err = sink
            .submit(&ClientMessage::CancelEdit {
                edit_id: "edit_1".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, GridError::Transport(_)));
    }
}
