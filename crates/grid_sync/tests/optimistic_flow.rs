//! End-to-end client flows: optimistic edits, acks, rollbacks, conflicts
//! and offline queueing against a recorded live channel.

use grid_common::{now_ms, GridError};
use grid_config::Config;
use grid_sync::protocol::{ClientMessage, ConflictEvent};
use grid_sync::{EditResolution, SessionEvent, TableSession};
use grid_test_helpers::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn conflict_event(edit_id: &str, local: serde_json::Value, merged: serde_json::Value) -> ConflictEvent {
    ConflictEvent {
        edit_id: edit_id.to_string(),
        table_id: "invoices".to_string(),
        row_id: "r1".to_string(),
        column: Some("total".to_string()),
        local_value: local,
        remote_value: merged.clone(),
        merged_value: merged,
        base_value: Some(json!(10)),
        timestamp: now_ms(),
    }
}

#[test]
fn concurrent_edits_to_different_cells_both_confirm() {
    init_test_logging();
    let (mut session, sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10)), ("status", json!("draft"))]));

    let e1 = session.edit_cell("r1", "total", json!(12), None).unwrap();
    let e2 = session.edit_cell("r1", "status", json!("final"), None).unwrap();
    assert_eq!(session.pending_edit_count(), 2);
    assert_eq!(sink.messages().len(), 2);

    session.handle_edit_ack(&e1, true, None);
    session.handle_edit_ack(&e2, true, None);

    assert_eq!(session.version(), 2);
    assert_eq!(session.pending_edit_count(), 0);
    assert_eq!(session.conflict_count(), 0);
    let r1 = session.row("r1").unwrap();
    assert_eq!(r1.get("total"), Some(&json!(12)));
    assert_eq!(r1.get("status"), Some(&json!("final")));
}

#[test]
fn mirror_converges_to_last_acknowledged_value() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10))]));

    // the second edit supersedes the first in the ledger; both acks arrive
    let e1 = session.edit_cell("r1", "total", json!(12), None).unwrap();
    let e2 = session.edit_cell("r1", "total", json!(15), None).unwrap();

    session.handle_edit_ack(&e1, true, None);
    session.handle_edit_ack(&e2, true, None);

    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(15)));
    assert_eq!(session.version(), 2);
    assert_eq!(session.ledger().pending_count(), 0);
}

#[test]
fn rejected_edit_rolls_back_exactly() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10)), ("note", json!("keep"))]));

    let edit = session.edit_cell("r1", "total", json!(99), None).unwrap();
    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(99)));

    session.handle_edit_ack(&edit, false, Some("rejected by server".to_string()));

    let r1 = session.row("r1").unwrap();
    assert_eq!(r1.get("total"), Some(&json!(10)));
    assert_eq!(r1.get("note"), Some(&json!("keep")));
    assert_eq!(session.pending_edit_count(), 0);
    assert_eq!(session.version(), 0);
}

#[test]
fn missing_ack_times_out_and_reverts() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10))]));

    session.edit_cell("r1", "total", json!(12), None).unwrap();
    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(12)));

    // just before the deadline nothing happens
    session.tick(now_ms() + 9_000);
    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(12)));

    session.tick(now_ms() + 10_001);
    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(10)));
    assert_eq!(session.pending_edit_count(), 0);
    assert_eq!(session.ledger().pending_count(), 0);
}

#[test]
fn transport_failure_rolls_back_before_raising() {
    init_test_logging();
    let temp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.offline.queue_dir = temp.path().to_path_buf();

    let mut session =
        TableSession::new("invoices", &config, Box::new(FailingSink)).unwrap();
    session.seed_row("r1", row([("total", json!(10))]));

    let err = session.edit_cell("r1", "total", json!(12), None).unwrap_err();
    assert!(matches!(err, GridError::Transport(_)));

    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(10)));
    assert_eq!(session.pending_edit_count(), 0);
    assert!(session.ledger().is_empty());
}

#[test]
fn editing_absent_row_without_old_value_fails() {
    init_test_logging();
    let (mut session, sink, _queue) = recorded_session("invoices");

    let err = session.edit_cell("ghost", "total", json!(1), None).unwrap_err();
    assert!(matches!(err, GridError::RowNotFound { .. }));
    assert!(sink.messages().is_empty());

    // a supplied old value lets the edit through (row known server-side)
    session
        .edit_cell("ghost", "total", json!(1), Some(json!(0)))
        .unwrap();
    assert_eq!(sink.messages().len(), 1);
}

#[test]
fn pending_count_stays_within_capacity() {
    init_test_logging();
    let temp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.offline.queue_dir = temp.path().to_path_buf();
    config.optimistic.max_pending_updates = 3;

    let sink = RecordingSink::new();
    let mut session =
        TableSession::new("invoices", &config, Box::new(sink.clone())).unwrap();
    for i in 0..4 {
        session.seed_row(&format!("r{i}"), row([("total", json!(0))]));
    }

    let warnings = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&warnings);
    session.subscribe(move |event| {
        if matches!(event, SessionEvent::CapacityWarning { .. }) {
            *counter.lock().unwrap() += 1;
        }
    });

    for i in 0..4 {
        session
            .edit_cell(&format!("r{i}"), "total", json!(i + 1), None)
            .unwrap();
    }

    // the fourth edit was still submitted, just not shown optimistically
    assert_eq!(sink.messages().len(), 4);
    assert_eq!(session.pending_edit_count(), 4);
    assert_eq!(session.ledger().pending_count(), 3);
    assert_eq!(*warnings.lock().unwrap(), 1);
    assert_eq!(session.row("r3").unwrap().get("total"), Some(&json!(0)));
}

#[test]
fn accept_remote_resolution_yields_merged_value() {
    init_test_logging();
    let (mut session, sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10))]));

    let edit = session.edit_cell("r1", "total", json!(12), None).unwrap();
    session.handle_conflict_event(conflict_event(&edit, json!(12), json!(14)));
    assert!(session.has_conflict(&edit));

    let resolved = session
        .resolve_conflict(&edit, EditResolution::AcceptRemote, None)
        .unwrap();
    assert_eq!(resolved, json!(14));
    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(14)));
    assert!(!session.has_conflict(&edit));
    assert_eq!(session.pending_edit_count(), 0);

    match sink.last().unwrap() {
        ClientMessage::ResolveConflict { conflict_id, value, .. } => {
            assert_eq!(conflict_id, edit);
            assert_eq!(value, json!(14));
        }
        other => panic!("expected ResolveConflict, got {other:?}"),
    }
}

#[test]
fn accept_local_resolution_keeps_local_value() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10))]));

    let edit = session.edit_cell("r1", "total", json!(12), None).unwrap();
    session.handle_conflict_event(conflict_event(&edit, json!(12), json!(14)));

    let resolved = session
        .resolve_conflict(&edit, EditResolution::AcceptLocal, None)
        .unwrap();
    assert_eq!(resolved, json!(12));
    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(12)));
}

#[test]
fn auto_resolution_fires_after_grace_window() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10))]));

    let edit = session.edit_cell("r1", "total", json!(12), None).unwrap();
    session.handle_conflict_event(conflict_event(&edit, json!(12), json!(14)));

    // before the grace window nothing resolves, and the held optimistic
    // update does not time out underneath the conflict
    session.tick(now_ms() + 500);
    assert!(session.has_conflict(&edit));

    session.tick(now_ms() + 1_100);
    assert!(!session.has_conflict(&edit));
    // default strategy is last_write_wins: the canonical value sticks
    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(14)));
}

#[test]
fn manual_resolution_beats_the_auto_schedule() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10))]));

    let edit = session.edit_cell("r1", "total", json!(12), None).unwrap();
    session.handle_conflict_event(conflict_event(&edit, json!(12), json!(14)));

    session
        .resolve_conflict(&edit, EditResolution::Custom, Some(json!(13)))
        .unwrap();
    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(13)));

    // the scheduled auto-resolution finds nothing to do
    session.tick(now_ms() + 2_000);
    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(13)));
    assert_eq!(session.conflict_count(), 0);
}

#[test]
fn manual_default_strategy_leaves_conflict_for_review() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10))]));
    session.registry_mut().set_default("manual").unwrap();

    let edit = session.edit_cell("r1", "total", json!(12), None).unwrap();
    session.handle_conflict_event(conflict_event(&edit, json!(12), json!(14)));

    session.tick(now_ms() + 5_000);
    assert!(session.has_conflict(&edit));
    // data safety over liveness: conflicts never die by timeout
    session.tick(now_ms() + 60_000);
    assert!(session.has_conflict(&edit));
}

#[test]
fn suggestion_for_near_numeric_conflict_is_numeric_merge() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10))]));

    let edit = session.edit_cell("r1", "total", json!(12), None).unwrap();
    session.handle_conflict_event(conflict_event(&edit, json!(12), json!(14)));

    let suggestion = session.suggest_for_conflict(&edit).unwrap();
    assert_eq!(suggestion.strategy_id, "merge_numeric");

    let resolved = session
        .registry()
        .resolve_with(
            &suggestion.strategy_id,
            &grid_common::Conflict {
                id: edit.clone(),
                table_id: "invoices".to_string(),
                row_id: "r1".to_string(),
                column: Some("total".to_string()),
                local_value: json!(12),
                remote_value: json!(14),
                base_value: Some(json!(10)),
                local_timestamp: 1,
                remote_timestamp: 2,
                detected_at: 2,
                conflict_type: grid_common::ConflictType::Value,
                metadata: None,
            },
        )
        .unwrap();
    assert_eq!(resolved, json!(13));
}

#[test]
fn delete_row_restores_on_rejection() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");
    let original = row([("total", json!(10)), ("status", json!("draft"))]);
    session.seed_row("r1", original.clone());

    let edit = session.delete_row("r1").unwrap();
    assert!(session.row("r1").is_none());

    session.handle_edit_ack(&edit, false, Some("forbidden".to_string()));
    assert_eq!(session.row("r1"), Some(&original));
}

#[test]
fn insert_row_disappears_on_rejection() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");

    let edit = session
        .insert_row(Some("r9".to_string()), row([("total", json!(5))]))
        .unwrap();
    assert!(session.row("r9").is_some());

    session.handle_edit_ack(&edit, false, None);
    assert!(session.row("r9").is_none());
}

#[test]
fn remote_changes_never_decrease_version() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");

    let newer = grid_common::RowChange {
        table_id: "invoices".to_string(),
        row_id: "r1".to_string(),
        operation: grid_common::ChangeOperation::Insert,
        changes: row([("total", json!(10))]),
        version: 7,
    };
    assert!(session.apply_remote_change(&newer));
    assert_eq!(session.version(), 7);

    let older = grid_common::RowChange {
        version: 3,
        changes: row([("total", json!(11))]),
        ..newer
    };
    assert!(session.apply_remote_change(&older));
    assert_eq!(session.version(), 7);
    // the change itself still merges; only the version is monotonic
    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(11)));

    let other_table = grid_common::RowChange {
        table_id: "orders".to_string(),
        row_id: "r1".to_string(),
        operation: grid_common::ChangeOperation::Update,
        changes: row([("total", json!(99))]),
        version: 50,
    };
    assert!(!session.apply_remote_change(&other_table));
    assert_eq!(session.version(), 7);
}

#[test]
fn cancelled_edit_reverts_and_notifies() {
    init_test_logging();
    let (mut session, sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10))]));

    let edit = session.edit_cell("r1", "total", json!(12), None).unwrap();
    session.cancel_edit(&edit).unwrap();

    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(10)));
    assert_eq!(session.pending_edit_count(), 0);
    assert!(matches!(
        sink.last().unwrap(),
        ClientMessage::CancelEdit { .. }
    ));

    // a late ack for the cancelled edit is ignored
    session.handle_edit_ack(&edit, true, None);
    assert_eq!(session.version(), 0);
}

#[test]
fn offline_edits_queue_and_survive_restart() {
    init_test_logging();
    let temp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.offline.queue_dir = temp.path().to_path_buf();

    {
        let sink = RecordingSink::new();
        let mut session =
            TableSession::new("invoices", &config, Box::new(sink.clone())).unwrap();
        session.seed_row("r1", row([("total", json!(10))]));
        session.set_online(false);

        session.edit_cell("r1", "total", json!(12), None).unwrap();
        session.delete_row("r1").unwrap();

        // nothing went out on the live channel
        assert!(sink.messages().is_empty());
        assert_eq!(session.offline_queue_len(), 2);
        assert!(session.row("r1").is_none());
    }

    // a fresh session over the same directory reloads the queue
    let mut session =
        TableSession::new("invoices", &config, Box::new(RecordingSink::new())).unwrap();
    assert_eq!(session.offline_queue_len(), 2);

    let request = session.drain_offline("user_a", "dev_1").unwrap().unwrap();
    assert_eq!(request.changes.len(), 2);
    assert_eq!(request.changes[0].new_value, Some(json!(12)));
    assert_eq!(session.offline_queue_len(), 0);
    assert!(session.drain_offline("user_a", "dev_1").unwrap().is_none());
}

#[test]
fn resume_online_applies_download_first() {
    init_test_logging();
    let (mut session, _sink, _queue) = recorded_session("invoices");
    session.seed_row("r1", row([("total", json!(10))]));
    session.set_online(false);

    let downloaded = vec![grid_common::batch::ChangeEvent {
        change_id: "chg_remote".to_string(),
        device_id: "dev_b".to_string(),
        timestamp: now_ms(),
        change: grid_common::RowChange {
            table_id: "invoices".to_string(),
            row_id: "r1".to_string(),
            operation: grid_common::ChangeOperation::Update,
            changes: row([("total", json!(14))]),
            version: 2,
        },
    }];
    session.resume_online(&downloaded);

    assert!(session.is_online());
    assert_eq!(session.version(), 2);
    assert_eq!(session.row("r1").unwrap().get("total"), Some(&json!(14)));
}
