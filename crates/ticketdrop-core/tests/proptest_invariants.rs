//! Property tests over the lifecycle: completion gating, last-writer-wins
//! order independence and stage monotonicity.

#[path = "support.rs"]
mod support;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use ticketdrop_core::clock::ManualClock;
use ticketdrop_core::lifecycle::Lifecycle;
use ticketdrop_core::model::{FieldDelta, HAZARD_ITEMS, HazardCheck, Stage, TicketId};
use ticketdrop_core::store::MemoryStore;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 20, 0, 0).unwrap()
}

fn assigned() -> (Lifecycle, TicketId) {
    let lc = support::lifecycle(Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(now())));
    let id = lc.create(support::spur_job()).unwrap().into_result().unwrap().id;
    lc.confirm_creation(&id).unwrap().into_result().unwrap();
    (lc, id)
}

/// One requirement of completion, removed or broken.
#[derive(Debug, Clone)]
enum Omission {
    Timestamp(usize),
    Volume(Option<Decimal>),
    Hazard(usize),
    Signature,
}

impl Omission {
    fn field(&self) -> &'static str {
        match self {
            Self::Timestamp(0) => "arrive_origin",
            Self::Timestamp(1) => "depart_origin",
            Self::Timestamp(2) => "arrive_destination",
            Self::Timestamp(_) => "depart_destination",
            Self::Volume(_) => "actual_volume",
            Self::Hazard(_) => "hazard_checklist",
            Self::Signature => "signature",
        }
    }

    fn apply(&self, deltas: &mut Vec<FieldDelta>) {
        let timestamps = ["arrive_origin", "depart_origin", "arrive_destination", "depart_destination"];
        match self {
            Self::Timestamp(n) => deltas.retain(|d| d.name() != timestamps[*n]),
            Self::Volume(replacement) => {
                deltas.retain(|d| !matches!(d, FieldDelta::ActualVolume(_)));
                if let Some(volume) = replacement {
                    deltas.push(FieldDelta::ActualVolume(*volume));
                }
            }
            Self::Hazard(n) => {
                let item = HAZARD_ITEMS[*n];
                deltas.retain(|d| !matches!(d, FieldDelta::Hazard(HazardCheck { item: i, .. }) if *i == item));
            }
            Self::Signature => deltas.retain(|d| !matches!(d, FieldDelta::Signature(_))),
        }
    }
}

fn omission() -> impl Strategy<Value = Omission> {
    prop_oneof![
        // Dropping T1 leaves nothing to start the job; keep it to reach IN_PROGRESS.
        (1_usize..4).prop_map(Omission::Timestamp),
        prop_oneof![
            Just(None),
            Just(Some(Decimal::ZERO)),
            (1_i64..10_000).prop_map(|n| Some(-Decimal::new(n, 1))),
        ]
        .prop_map(Omission::Volume),
        (0_usize..HAZARD_ITEMS.len()).prop_map(Omission::Hazard),
        Just(Omission::Signature),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    Confirm,
    Record(FieldDelta),
    Complete,
    Export,
    Amend,
}

fn op() -> impl Strategy<Value = Op> {
    let t1 = now() - Duration::hours(6);
    let deltas = support::completion(t1);
    prop_oneof![
        Just(Op::Confirm),
        proptest::sample::select(deltas).prop_map(Op::Record),
        Just(Op::Complete),
        Just(Op::Export),
        Just(Op::Amend),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn completion_fails_naming_the_missing_requirement(missing in omission()) {
        let (lc, id) = assigned();
        let mut deltas = support::completion(now() - Duration::hours(6));
        missing.apply(&mut deltas);

        let outcome = lc.complete(&id, &deltas).unwrap();
        let rejection = outcome.rejection().cloned();
        prop_assert!(rejection.is_some(), "completion accepted without {}", missing.field());
        let issues = rejection.map(|r| r.issues()).unwrap_or_default();
        prop_assert!(
            issues.iter().any(|i| i.field == missing.field()),
            "no error names {}: {:?}", missing.field(), issues
        );
        prop_assert_ne!(lc.get(&id).unwrap().into_result().unwrap().stage, Stage::Completed);
    }

    #[test]
    fn newest_client_timestamp_wins_in_any_order(
        first in "[a-z]{1,12}",
        second in "[a-z]{1,12}",
        gap in 1_i64..3_600,
        newer_first in any::<bool>(),
    ) {
        let (lc, id) = assigned();
        lc.record_fields(&id, &[FieldDelta::ArriveOrigin(now() - Duration::hours(2))]).unwrap();

        let t1 = now() - Duration::hours(1);
        let t2 = t1 + Duration::seconds(gap);
        let older = (FieldDelta::Notes(first), t1);
        let newer = (FieldDelta::Notes(second.clone()), t2);
        let order = if newer_first { [newer, older] } else { [older, newer] };
        for (delta, ts) in order {
            lc.reconcile(&id, &[delta], ts, false).unwrap().into_result().unwrap();
        }

        prop_assert_eq!(lc.get(&id).unwrap().into_result().unwrap().notes, second);
    }

    #[test]
    fn stages_never_move_backwards(ops in proptest::collection::vec(op(), 1..40)) {
        let lc = support::lifecycle(Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(now())));
        let id = lc.create(support::spur_job()).unwrap().into_result().unwrap().id;
        let mut highest = Stage::Pending;

        for op in ops {
            let _ = match op {
                Op::Confirm => lc.confirm_creation(&id).unwrap().is_applied(),
                Op::Record(delta) => lc.record_fields(&id, &[delta]).unwrap().is_applied(),
                Op::Complete => lc.complete(&id, &[]).unwrap().is_applied(),
                Op::Export => lc.mark_exported(&id, "prop", now(), false).unwrap().is_applied(),
                Op::Amend => lc
                    .amend(&id, &[FieldDelta::Truck("Unit 7".into())], "Rick")
                    .unwrap()
                    .is_applied(),
            };
            let stage = lc.get(&id).unwrap().into_result().unwrap().stage;
            prop_assert!(stage >= highest, "stage went back to {}", stage);
            highest = stage;
        }
    }
}
