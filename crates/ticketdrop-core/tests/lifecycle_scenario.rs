//! Dispatch to billing, end to end, on the SQLite store.

#[path = "support.rs"]
mod support;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tempfile::TempDir;
use ticketdrop_core::clock::{SystemClock, local_date};
use ticketdrop_core::error::ErrorCode;
use ticketdrop_core::export::{CommitStatus, ExportFormatter, ExportRequest};
use ticketdrop_core::model::{FieldDelta, Stage, TicketId};
use ticketdrop_core::queue::{ApplyResult, OfflineQueue, RetryPolicy, SqliteQueue};
use ticketdrop_core::store::{EventKind, SqliteStore, TicketStore};

#[test]
fn ticket_moves_from_dispatch_to_export() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("tickets.db")).unwrap());
    let lc = Arc::new(support::lifecycle(store.clone(), Arc::new(SystemClock)));

    let ticket = lc.create(support::spur_job()).unwrap().into_result().unwrap();
    let today = local_date(Utc::now(), lc.tz());
    assert_eq!(ticket.id, TicketId::new(today, 1));
    assert_eq!(ticket.stage, Stage::Pending);

    let ticket = lc.confirm_creation(&ticket.id).unwrap().into_result().unwrap();
    assert_eq!(ticket.stage, Stage::Assigned);

    let t1 = Utc::now() - Duration::hours(4);
    let done = lc
        .complete(&ticket.id, &support::completion(t1))
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(done.stage, Stage::Completed);
    assert_eq!(done.actual_volume, Some(Decimal::new(855, 1)));

    let formatter = ExportFormatter::new(Arc::clone(&lc), support::COMPANY);
    let request = ExportRequest {
        all: true,
        ..ExportRequest::default()
    };
    let mut csv = Vec::new();
    let summary = formatter.export(&request, &mut csv, true).unwrap();
    let commit = summary.commit.unwrap();
    assert_eq!(commit.status, CommitStatus::Complete);

    let record = &summary.batch.records[0];
    assert_eq!(record.operator, "Fandrey, Brant");
    assert_eq!(record.location, "10-15-052-20W4 to 05-22-053-19W4");
    // T4 - T1 = 170 minutes.
    assert_eq!(record.hours, "2.83");
    assert_eq!(record.status, "Completed");

    let text = String::from_utf8(csv).unwrap();
    assert!(text.contains(&format!(",{},", ticket.id)));

    let exported = store.get(&ticket.id).unwrap();
    assert_eq!(exported.stage, Stage::Exported);
    assert_eq!(exported.export_batch(), Some(summary.batch.batch_id.as_str()));

    let kinds: Vec<EventKind> = lc.history(&ticket.id).unwrap().iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&EventKind::Created));
    assert!(kinds.contains(&EventKind::Transition));
    assert_eq!(kinds.last(), Some(&EventKind::Exported));
}

#[test]
fn offline_updates_survive_restart_and_reconcile() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("tickets.db");
    let store = Arc::new(SqliteStore::open(&db).unwrap());
    let lc = Arc::new(support::lifecycle(store, Arc::new(SystemClock)));
    let id = lc.create(support::spur_job()).unwrap().into_result().unwrap().id;
    lc.confirm_creation(&id).unwrap().into_result().unwrap();

    let t1 = Utc::now() - Duration::hours(4);
    {
        let queue = OfflineQueue::new(
            Arc::new(SqliteQueue::open(&db).unwrap()),
            Arc::clone(&lc),
            RetryPolicy::default(),
        );
        queue
            .enqueue_completion(id.clone(), support::completion(t1), t1 + Duration::hours(3))
            .unwrap();
    }

    // A fresh queue over the same database picks the entry up.
    let queue = OfflineQueue::new(
        Arc::new(SqliteQueue::open(&db).unwrap()),
        Arc::clone(&lc),
        RetryPolicy::default(),
    );
    assert_eq!(queue.pending().unwrap().len(), 1);
    let results = queue.drain(Utc::now()).unwrap();
    assert!(matches!(results[0], ApplyResult::Applied { stage: Stage::Completed, .. }));
    assert!(queue.pending().unwrap().is_empty());

    let late = lc
        .record_fields(&id, &[FieldDelta::Notes("after the fact".into())])
        .unwrap();
    assert_eq!(late.rejection().unwrap().code(), ErrorCode::IllegalTransition);
}

#[test]
fn amendment_keeps_ticket_assigned_and_audited() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("tickets.db")).unwrap());
    let lc = support::lifecycle(store, Arc::new(SystemClock));
    let id = lc.create(support::spur_job()).unwrap().into_result().unwrap().id;
    lc.confirm_creation(&id).unwrap().into_result().unwrap();

    let wrong_truck = lc.amend(&id, &[FieldDelta::Truck("Unit 99".into())], "Rick").unwrap();
    assert_eq!(wrong_truck.rejection().unwrap().code(), ErrorCode::ValidationFailed);

    let amended = lc
        .amend(&id, &[FieldDelta::Truck("unit 7".into())], "Rick")
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(amended.stage, Stage::Assigned);
    assert_eq!(amended.job.truck, "Unit 7");
    let history = lc.history(&id).unwrap();
    let amendment = history.iter().find(|e| e.kind == EventKind::Amended).unwrap();
    assert_eq!(amendment.actor, "Rick");
    assert!(amendment.detail.contains("truck"));
}
