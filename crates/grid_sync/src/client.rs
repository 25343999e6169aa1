//! Live client driver
//!
//! Owns a [`TableSession`] and reacts to server events from the live
//! channel, interleaved with a tick interval that drives optimistic-update
//! expiry and scheduled auto-resolutions.

use crate::protocol::ServerEvent;
use crate::session::TableSession;
use grid_common::batch::ChangeEvent;
use grid_common::{now_ms, Result};
use std::time::Duration;
use tokio::sync::mpsc;

/// Event loop around one table session
pub struct LiveClient {
    session: TableSession,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
    tick_interval: Duration,
}

impl LiveClient {
    pub fn new(
        session: TableSession,
        inbound: mpsc::UnboundedReceiver<ServerEvent>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            session,
            inbound,
            tick_interval,
        }
    }

    pub fn session(&self) -> &TableSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut TableSession {
        &mut self.session
    }

    /// Recover the session once the channel is done
    pub fn into_session(self) -> TableSession {
        self.session
    }

    /// Run until the live channel closes. Inbound events and ticks never
    /// interleave mid-mutation; each is handled to completion.
    pub async fn run(&mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.inbound.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        tracing::info!(table = %self.session.table_id(), "live channel closed");
                        self.session.set_online(false);
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.session.tick(now_ms());
                }
            }
        }

        Ok(())
    }

    /// Reconnect sequence: apply the Download since `last_sync`, then resume
    /// optimistic editing.
    pub fn reconnect(&mut self, downloaded: &[ChangeEvent]) {
        tracing::info!(
            table = %self.session.table_id(),
            changes = downloaded.len(),
            "re-entering online mode"
        );
        self.session.resume_online(downloaded);
    }

    fn dispatch(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::EditAck {
                edit_id,
                success,
                error,
            } => {
                tracing::debug!(edit = %edit_id, success, "edit acknowledged");
                self.session.handle_edit_ack(&edit_id, success, error);
            }
            ServerEvent::RemoteChange { change } => {
                self.session.apply_remote_change(&change);
            }
            ServerEvent::Conflict { event } => {
                tracing::debug!(edit = %event.edit_id, "conflict reported");
                self.session.handle_conflict_event(event);
            }
        }
    }
}
