//! Optimistic update ledger
//!
//! Tracks locally-applied-but-unconfirmed changes. Every pending update has
//! a rollback deadline; [`OptimisticLedger::tick`] expires overdue entries
//! and purges confirmed ones past their display grace window. Deadlines are
//! plain data keyed by update id, cancelled by confirm/rollback — no ambient
//! timer handles.

use crate::types::{OptimisticUpdate, RollbackReason, UpdateKind, UpdateStatus};
use grid_common::{GridError, Result, ReversibleChangeset};
use grid_config::OptimisticConfig;
use std::collections::HashMap;

/// Everything that expired or got purged in one tick
#[derive(Debug, Default)]
pub struct TickReport {
    /// Updates removed by timeout; the caller reverts their changesets
    pub rolled_back: Vec<OptimisticUpdate>,
    /// Updates marked rejected but retained (rollback-on-error disabled)
    pub timed_out_retained: Vec<String>,
    /// Confirmed updates whose display grace ended
    pub purged: Vec<String>,
}

/// Bookkeeping for pending/confirmed/rejected optimistic updates
pub struct OptimisticLedger {
    updates: HashMap<String, OptimisticUpdate>,
    settings: OptimisticConfig,
}

impl OptimisticLedger {
    pub fn new(settings: OptimisticConfig) -> Self {
        Self {
            updates: HashMap::new(),
            settings,
        }
    }

    /// Register a pending update.
    ///
    /// A later cell edit against the same `(row, column)` supersedes the
    /// in-flight one, inheriting its `before` snapshot so a rollback of the
    /// survivor still restores the pre-optimistic state. Fails with
    /// `CapacityExceeded` once `max_pending_updates` is reached; the caller
    /// submits the edit anyway, just without optimistic display.
    pub fn apply(
        &mut self,
        id: &str,
        kind: UpdateKind,
        table_id: &str,
        row_id: &str,
        mut changeset: ReversibleChangeset,
        now: i64,
    ) -> Result<()> {
        if kind == UpdateKind::CellEdit {
            if let Some(prev_id) = self.find_pending_cell(row_id, &changeset.fields_touched) {
                let prev = self.updates.remove(&prev_id).expect("pending id just found");
                for field in &changeset.fields_touched {
                    if let Some(before) = prev.changeset.before.get(field) {
                        changeset.before.insert(field.clone(), before.clone());
                    }
                }
                tracing::debug!(superseded = %prev_id, update = %id, "cell edit superseded in-flight update");
            }
        }

        let pending = self.pending_count();
        if pending >= self.settings.max_pending_updates {
            return Err(GridError::CapacityExceeded {
                pending,
                limit: self.settings.max_pending_updates,
            });
        }

        let update = OptimisticUpdate {
            id: id.to_string(),
            kind,
            table_id: table_id.to_string(),
            row_id: row_id.to_string(),
            changeset,
            timestamp: now,
            status: UpdateStatus::Pending,
            deadline: now + self.settings.ack_timeout_ms as i64,
            purge_at: None,
        };
        debug_assert!(update.changeset.is_complete());
        self.updates.insert(id.to_string(), update);
        Ok(())
    }

    /// Acknowledge an update. Keeps it visible for the configured grace
    /// window, then [`tick`](Self::tick) purges it.
    pub fn confirm(&mut self, id: &str, now: i64) -> bool {
        match self.updates.get_mut(id) {
            Some(update) if update.status == UpdateStatus::Pending => {
                update.status = UpdateStatus::Confirmed;
                update.purge_at = Some(now + self.settings.confirmed_purge_ms as i64);
                true
            }
            _ => false,
        }
    }

    /// Roll back an update. With rollback-on-error configured (the default)
    /// the update is removed and returned so the caller can revert the
    /// mirror; otherwise it is marked rejected and retained for diagnostics.
    pub fn rollback(&mut self, id: &str, reason: RollbackReason) -> Option<OptimisticUpdate> {
        if self.settings.rollback_on_error {
            let update = self.updates.remove(id)?;
            tracing::debug!(update = %id, ?reason, "rolled back optimistic update");
            Some(update)
        } else {
            let update = self.updates.get_mut(id)?;
            update.status = UpdateStatus::Rejected;
            update.purge_at = None;
            tracing::debug!(update = %id, ?reason, "marked optimistic update rejected");
            None
        }
    }

    /// Suspend the rollback deadline while a conflict is being resolved.
    /// The update stays pending until the resolution confirms or discards it.
    pub fn hold(&mut self, id: &str) -> bool {
        match self.updates.get_mut(id) {
            Some(update) if update.status == UpdateStatus::Pending => {
                update.deadline = i64::MAX;
                true
            }
            _ => false,
        }
    }

    /// Remove an update without reverting anything (the mirror already shows
    /// the resolved state).
    pub fn discard(&mut self, id: &str) -> Option<OptimisticUpdate> {
        self.updates.remove(id)
    }

    /// Expire overdue pending updates and purge confirmed ones past their
    /// grace window.
    pub fn tick(&mut self, now: i64) -> TickReport {
        let mut report = TickReport::default();

        let expired: Vec<String> = self
            .updates
            .values()
            .filter(|u| u.status == UpdateStatus::Pending && u.deadline <= now)
            .map(|u| u.id.clone())
            .collect();
        for id in expired {
            tracing::warn!(update = %id, "optimistic update timed out waiting for ack");
            match self.rollback(&id, RollbackReason::Timeout) {
                Some(update) => report.rolled_back.push(update),
                None => report.timed_out_retained.push(id),
            }
        }

        let purgeable: Vec<String> = self
            .updates
            .values()
            .filter(|u| {
                u.status == UpdateStatus::Confirmed && u.purge_at.map_or(false, |t| t <= now)
            })
            .map(|u| u.id.clone())
            .collect();
        for id in purgeable {
            self.updates.remove(&id);
            report.purged.push(id);
        }

        report
    }

    pub fn get(&self, id: &str) -> Option<&OptimisticUpdate> {
        self.updates.get(id)
    }

    pub fn pending_count(&self) -> usize {
        self.updates
            .values()
            .filter(|u| u.status == UpdateStatus::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Drop retained rejected updates (diagnostics) once inspected
    pub fn clear_rejected(&mut self) -> usize {
        let before = self.updates.len();
        self.updates.retain(|_, u| u.status != UpdateStatus::Rejected);
        before - self.updates.len()
    }

    fn find_pending_cell(&self, row_id: &str, fields: &[String]) -> Option<String> {
        self.updates
            .values()
            .find(|u| {
                u.status == UpdateStatus::Pending
                    && u.kind == UpdateKind::CellEdit
                    && u.row_id == row_id
                    && u.changeset.fields_touched == fields
            })
            .map(|u| u.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> OptimisticConfig {
        OptimisticConfig {
            ack_timeout_ms: 10_000,
            confirmed_purge_ms: 1_000,
            max_pending_updates: 3,
            ..OptimisticConfig::default()
        }
    }

    fn cell_changeset(before: i64, after: i64) -> ReversibleChangeset {
        ReversibleChangeset::cell("total", Some(json!(before)), json!(after))
    }

    #[test]
    fn test_apply_and_confirm_lifecycle() {
        let mut ledger = OptimisticLedger::new(settings());
        ledger
            .apply("u1", UpdateKind::CellEdit, "t", "r1", cell_changeset(10, 12), 0)
            .unwrap();
        assert_eq!(ledger.pending_count(), 1);

        assert!(ledger.confirm("u1", 100));
        assert_eq!(ledger.pending_count(), 0);

        // still visible during the grace window
        let report = ledger.tick(500);
        assert!(report.purged.is_empty());
        assert!(ledger.get("u1").is_some());

        let report = ledger.tick(1_200);
        assert_eq!(report.purged, vec!["u1".to_string()]);
        assert!(ledger.get("u1").is_none());
    }

    #[test]
    fn test_timeout_rolls_back() {
        let mut ledger = OptimisticLedger::new(settings());
        ledger
            .apply("u1", UpdateKind::CellEdit, "t", "r1", cell_changeset(10, 12), 0)
            .unwrap();

        let report = ledger.tick(9_999);
        assert!(report.rolled_back.is_empty());

        let report = ledger.tick(10_000);
        assert_eq!(report.rolled_back.len(), 1);
        assert_eq!(report.rolled_back[0].id, "u1");
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_capacity_bound() {
        let mut ledger = OptimisticLedger::new(settings());
        for i in 0..3 {
            ledger
                .apply(
                    &format!("u{i}"),
                    UpdateKind::CellEdit,
                    "t",
                    &format!("r{i}"),
                    cell_changeset(0, 1),
                    0,
                )
                .unwrap();
        }

        let err = ledger
            .apply("u3", UpdateKind::CellEdit, "t", "r9", cell_changeset(0, 1), 0)
            .unwrap_err();
        assert!(matches!(err, GridError::CapacityExceeded { pending: 3, limit: 3 }));
        assert_eq!(ledger.pending_count(), 3);
    }

    #[test]
    fn test_supersede_keeps_original_snapshot() {
        let mut ledger = OptimisticLedger::new(settings());
        ledger
            .apply("u1", UpdateKind::CellEdit, "t", "r1", cell_changeset(10, 12), 0)
            .unwrap();
        // second edit to the same cell: before=12 at the call site, but the
        // ledger chains back to the true pre-optimistic value
        ledger
            .apply("u2", UpdateKind::CellEdit, "t", "r1", cell_changeset(12, 15), 0)
            .unwrap();

        assert_eq!(ledger.pending_count(), 1);
        assert!(ledger.get("u1").is_none());
        let survivor = ledger.get("u2").unwrap();
        assert_eq!(
            survivor.changeset.before.get("total"),
            Some(&Some(json!(10)))
        );
    }

    #[test]
    fn test_rollback_returns_changeset_for_exact_revert() {
        let mut ledger = OptimisticLedger::new(settings());
        ledger
            .apply("u1", UpdateKind::CellEdit, "t", "r1", cell_changeset(10, 12), 0)
            .unwrap();

        let update = ledger.rollback("u1", RollbackReason::Error).unwrap();
        let mut row = grid_common::Row::from([("total".to_string(), json!(12))]);
        update.changeset.revert(&mut row);
        assert_eq!(row.get("total"), Some(&json!(10)));
    }

    #[test]
    fn test_rejected_retained_when_rollback_disabled() {
        let mut config = settings();
        config.rollback_on_error = false;
        let mut ledger = OptimisticLedger::new(config);
        ledger
            .apply("u1", UpdateKind::CellEdit, "t", "r1", cell_changeset(10, 12), 0)
            .unwrap();

        assert!(ledger.rollback("u1", RollbackReason::Error).is_none());
        assert_eq!(ledger.get("u1").unwrap().status, UpdateStatus::Rejected);

        assert_eq!(ledger.clear_rejected(), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_hold_suspends_deadline() {
        let mut ledger = OptimisticLedger::new(settings());
        ledger
            .apply("u1", UpdateKind::CellEdit, "t", "r1", cell_changeset(10, 12), 0)
            .unwrap();
        assert!(ledger.hold("u1"));

        let report = ledger.tick(1_000_000);
        assert!(report.rolled_back.is_empty());
        assert_eq!(ledger.pending_count(), 1);
    }
}
