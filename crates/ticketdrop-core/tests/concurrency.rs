//! Concurrent dispatch and field clients against one store.

#[path = "support.rs"]
mod support;

use chrono::{Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;
use ticketdrop_core::clock::{Clock, ManualClock};
use ticketdrop_core::lifecycle::Lifecycle;
use ticketdrop_core::model::{FieldDelta, Stage, TicketId};
use ticketdrop_core::store::{MemoryStore, SqliteStore, TicketStore};

const THREADS: usize = 8;
const PER_THREAD: usize = 12;

fn concurrent_creates(lc: &Arc<Lifecycle>) -> Vec<TicketId> {
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lc = Arc::clone(lc);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..PER_THREAD)
                    .map(|_| lc.create(support::spur_job()).unwrap().into_result().unwrap().id)
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect()
}

fn assert_dense_and_unique(ids: &[TicketId]) {
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len(), "duplicate ticket ids");
    let mut sequences: Vec<u16> = ids.iter().map(TicketId::sequence).collect();
    sequences.sort_unstable();
    let expected: Vec<u16> = (1..=u16::try_from(ids.len()).unwrap()).collect();
    assert_eq!(sequences, expected);
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 17, 0, 0).unwrap()))
}

#[test]
fn concurrent_creation_yields_distinct_dense_ids_in_memory() {
    let lc = Arc::new(support::lifecycle(Arc::new(MemoryStore::new()), clock()));
    let ids = concurrent_creates(&lc);
    assert_eq!(ids.len(), THREADS * PER_THREAD);
    assert_dense_and_unique(&ids);
}

#[test]
fn concurrent_creation_yields_distinct_dense_ids_in_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("tickets.db")).unwrap());
    let lc = Arc::new(support::lifecycle(store, clock()));
    assert_dense_and_unique(&concurrent_creates(&lc));
}

#[test]
fn two_lifecycles_sharing_a_database_never_reuse_an_id() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tickets.db");
    let shared = clock();
    let a = Arc::new(support::lifecycle(Arc::new(SqliteStore::open(&path).unwrap()), shared.clone()));
    let b = Arc::new(support::lifecycle(Arc::new(SqliteStore::open(&path).unwrap()), shared));

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(a.create(support::spur_job()).unwrap().into_result().unwrap().id);
        ids.push(b.create(support::spur_job()).unwrap().into_result().unwrap().id);
    }
    assert_dense_and_unique(&ids);
}

#[test]
fn field_updates_on_different_tickets_do_not_interfere() {
    let store: Arc<dyn TicketStore> = Arc::new(MemoryStore::new());
    let clock = clock();
    let lc = Arc::new(support::lifecycle(Arc::clone(&store), clock.clone()));
    let ids: Vec<TicketId> = (0..THREADS)
        .map(|_| {
            let id = lc.create(support::spur_job()).unwrap().into_result().unwrap().id;
            lc.confirm_creation(&id).unwrap().into_result().unwrap();
            id
        })
        .collect();

    let t1 = clock.now() - Duration::hours(5);
    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let lc = Arc::clone(&lc);
            thread::spawn(move || {
                for delta in support::completion(t1) {
                    lc.record_fields(&id, &[delta]).unwrap().into_result().unwrap();
                }
                lc.complete(&id, &[]).unwrap().into_result().unwrap().stage
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Stage::Completed);
    }
    for id in &ids {
        assert!(store.get(id).unwrap().timestamps.all_set());
    }
}

#[test]
fn racing_writers_of_one_timestamp_admit_exactly_one() {
    let lc = Arc::new(support::lifecycle(Arc::new(MemoryStore::new()), clock()));
    let id = lc.create(support::spur_job()).unwrap().into_result().unwrap().id;
    lc.confirm_creation(&id).unwrap().into_result().unwrap();

    let base = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|n| {
            let lc = Arc::clone(&lc);
            let id = id.clone();
            let barrier = Arc::clone(&barrier);
            let at = base + Duration::minutes(i64::try_from(n).unwrap());
            thread::spawn(move || {
                barrier.wait();
                lc.record_fields(&id, &[FieldDelta::ArriveOrigin(at)])
                    .unwrap()
                    .is_applied()
            })
        })
        .collect();

    let accepted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|applied| *applied)
        .count();
    assert_eq!(accepted, 1);
}
