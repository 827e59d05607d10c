//! Shared fixtures for integration tests. Included with `#[path]`.
#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use ticketdrop_core::clock::Clock;
use ticketdrop_core::lifecycle::Lifecycle;
use ticketdrop_core::model::{FieldDelta, HAZARD_ITEMS, HazardCheck, JobDetails};
use ticketdrop_core::reference::{ReferenceKind, StaticReferenceData};
use ticketdrop_core::store::TicketStore;
use ticketdrop_core::validate::{ValidationRules, Validator};

pub const COMPANY: &str = "Rick's Oilfield Hauling";

pub fn reference() -> StaticReferenceData {
    StaticReferenceData::new()
        .with(ReferenceKind::Customer, ["Spur Petroleum Corp", "Baytex Energy"])
        .with(ReferenceKind::Driver, ["Brant Fandrey", "Dale Kowalchuk"])
        .with(ReferenceKind::Product, ["Crude Oil", "Produced Water"])
        .with(ReferenceKind::Truck, ["Unit 1", "Unit 7"])
        .with(ReferenceKind::Trailer, ["T-12"])
}

pub fn lifecycle(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>) -> Lifecycle {
    Lifecycle::new(
        store,
        Validator::new(Arc::new(reference()), ValidationRules::default()),
        clock,
        chrono_tz::America::Edmonton,
    )
}

pub fn spur_job() -> JobDetails {
    JobDetails {
        customer: "Spur Petroleum Corp".into(),
        origin: "10-15-052-20W4".into(),
        destination: "05-22-053-19W4".into(),
        product: "Crude Oil".into(),
        driver: "Brant Fandrey".into(),
        truck: "Unit 1".into(),
        estimated_volume: Some(Decimal::new(85, 0)),
        ..JobDetails::default()
    }
}

pub fn timestamps(t1: DateTime<Utc>) -> [FieldDelta; 4] {
    [
        FieldDelta::ArriveOrigin(t1),
        FieldDelta::DepartOrigin(t1 + Duration::minutes(45)),
        FieldDelta::ArriveDestination(t1 + Duration::minutes(135)),
        FieldDelta::DepartDestination(t1 + Duration::minutes(170)),
    ]
}

/// Everything completion needs, with T1 at `t1`.
pub fn completion(t1: DateTime<Utc>) -> Vec<FieldDelta> {
    let mut deltas = timestamps(t1).to_vec();
    deltas.push(FieldDelta::ActualVolume(Decimal::new(855, 1)));
    deltas.extend(HAZARD_ITEMS.map(|item| FieldDelta::Hazard(HazardCheck { item, checked: true })));
    deltas.push(FieldDelta::Signature(true));
    deltas
}
