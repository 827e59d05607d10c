//! Field deltas: the unit of mutation sent by dispatch and field clients.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::ticket::{HazardItem, Priority, Ticket, TicketId, TimestampField};

/// Which lifecycle phase owns a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldClass {
    /// Dispatcher-owned job details, editable while `PENDING`.
    Creation,
    /// T1..T4, append-only.
    Timestamp,
    /// Volume, hazards, signature, notes and photos, editable while `IN_PROGRESS`.
    Completion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HazardCheck {
    pub item: HazardItem,
    pub checked: bool,
}

/// One field assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldDelta {
    Customer(String),
    Origin(String),
    Destination(String),
    Product(String),
    Driver(String),
    Truck(String),
    Trailer(Option<String>),
    EstimatedVolume(Option<Decimal>),
    Instructions(Option<String>),
    Priority(Priority),
    ArriveOrigin(DateTime<Utc>),
    DepartOrigin(DateTime<Utc>),
    ArriveDestination(DateTime<Utc>),
    DepartDestination(DateTime<Utc>),
    ActualVolume(Decimal),
    Hazard(HazardCheck),
    Signature(bool),
    Notes(String),
    Photo(String),
}

/// A delta could not be applied to the ticket snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    #[error("{0} is already recorded and cannot be rewritten")]
    DuplicateTimestamp(TimestampField),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl FieldDelta {
    /// Key under which last-writer-wins bookkeeping is tracked.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Hazard(check) => format!("hazard:{}", check.item),
            Self::Photo(reference) => format!("photo:{reference}"),
            other => other.name().to_string(),
        }
    }

    /// Wire name of the field.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Customer(_) => "customer",
            Self::Origin(_) => "origin",
            Self::Destination(_) => "destination",
            Self::Product(_) => "product",
            Self::Driver(_) => "driver",
            Self::Truck(_) => "truck",
            Self::Trailer(_) => "trailer",
            Self::EstimatedVolume(_) => "estimated_volume",
            Self::Instructions(_) => "instructions",
            Self::Priority(_) => "priority",
            Self::ArriveOrigin(_) => "arrive_origin",
            Self::DepartOrigin(_) => "depart_origin",
            Self::ArriveDestination(_) => "arrive_destination",
            Self::DepartDestination(_) => "depart_destination",
            Self::ActualVolume(_) => "actual_volume",
            Self::Hazard(_) => "hazard",
            Self::Signature(_) => "signature",
            Self::Notes(_) => "notes",
            Self::Photo(_) => "photo",
        }
    }

    #[must_use]
    pub const fn class(&self) -> FieldClass {
        match self {
            Self::Customer(_)
            | Self::Origin(_)
            | Self::Destination(_)
            | Self::Product(_)
            | Self::Driver(_)
            | Self::Truck(_)
            | Self::Trailer(_)
            | Self::EstimatedVolume(_)
            | Self::Instructions(_)
            | Self::Priority(_) => FieldClass::Creation,
            Self::ArriveOrigin(_)
            | Self::DepartOrigin(_)
            | Self::ArriveDestination(_)
            | Self::DepartDestination(_) => FieldClass::Timestamp,
            Self::ActualVolume(_)
            | Self::Hazard(_)
            | Self::Signature(_)
            | Self::Notes(_)
            | Self::Photo(_) => FieldClass::Completion,
        }
    }

    /// The timestamp slot this delta writes, if it is a timestamp delta.
    #[must_use]
    pub const fn timestamp(&self) -> Option<(TimestampField, DateTime<Utc>)> {
        match self {
            Self::ArriveOrigin(at) => Some((TimestampField::ArriveOrigin, *at)),
            Self::DepartOrigin(at) => Some((TimestampField::DepartOrigin, *at)),
            Self::ArriveDestination(at) => Some((TimestampField::ArriveDestination, *at)),
            Self::DepartDestination(at) => Some((TimestampField::DepartDestination, *at)),
            _ => None,
        }
    }

    /// Write the delta into a ticket snapshot.
    ///
    /// Timestamps are append-only: writing an already recorded slot fails with
    /// [`DeltaError::DuplicateTimestamp`] and leaves the snapshot untouched.
    pub fn apply(&self, ticket: &mut Ticket) -> Result<(), DeltaError> {
        if let Some((field, at)) = self.timestamp() {
            let slot = ticket.timestamps.slot(field);
            if slot.is_some() {
                return Err(DeltaError::DuplicateTimestamp(field));
            }
            *slot = Some(at);
            return Ok(());
        }

        let job = &mut ticket.job;
        match self {
            Self::Customer(v) => job.customer.clone_from(v),
            Self::Origin(v) => job.origin.clone_from(v),
            Self::Destination(v) => job.destination.clone_from(v),
            Self::Product(v) => job.product.clone_from(v),
            Self::Driver(v) => job.driver.clone_from(v),
            Self::Truck(v) => job.truck.clone_from(v),
            Self::Trailer(v) => job.trailer.clone_from(v),
            Self::EstimatedVolume(v) => job.estimated_volume = *v,
            Self::Instructions(v) => job.instructions.clone_from(v),
            Self::Priority(p) => job.priority = *p,
            Self::ActualVolume(v) => ticket.actual_volume = Some(*v),
            Self::Hazard(check) => ticket.hazards.set(check.item, check.checked),
            Self::Signature(present) => ticket.signature = *present,
            Self::Notes(text) => ticket.notes.clone_from(text),
            Self::Photo(reference) => {
                if !ticket.photos.contains(reference) {
                    ticket.photos.push(reference.clone());
                }
            }
            Self::ArriveOrigin(_)
            | Self::DepartOrigin(_)
            | Self::ArriveDestination(_)
            | Self::DepartDestination(_) => {}
        }
        Ok(())
    }

    /// Parse a `field=value` pair as typed on the command line or received as text.
    ///
    /// Timestamps accept RFC 3339, or a naive `YYYY-MM-DD HH:MM[:SS]` read in
    /// the dispatch zone `tz`.
    pub fn parse(field: &str, value: &str, tz: Tz) -> Result<Self, DeltaError> {
        let name = field.trim().to_ascii_lowercase().replace('-', "_");
        let value = value.trim();
        let invalid = |reason: &str| DeltaError::InvalidValue {
            field: name.clone(),
            reason: reason.to_string(),
        };
        let optional = |v: &str| (!v.is_empty()).then(|| v.to_string());

        if let Ok(slot) = TimestampField::from_str(&name) {
            let at = parse_timestamp(value, tz).ok_or_else(|| {
                invalid("expected RFC 3339 or 'YYYY-MM-DD HH:MM' local time")
            })?;
            return Ok(match slot {
                TimestampField::ArriveOrigin => Self::ArriveOrigin(at),
                TimestampField::DepartOrigin => Self::DepartOrigin(at),
                TimestampField::ArriveDestination => Self::ArriveDestination(at),
                TimestampField::DepartDestination => Self::DepartDestination(at),
            });
        }

        if let Some(item) = name.strip_prefix("hazard:").or_else(|| name.strip_prefix("hazard.")) {
            let item = item
                .parse::<HazardItem>()
                .map_err(|e| invalid(&e.to_string()))?;
            let checked = parse_bool(value).ok_or_else(|| invalid("expected true or false"))?;
            return Ok(Self::Hazard(HazardCheck { item, checked }));
        }

        let delta = match name.as_str() {
            "customer" => Self::Customer(value.to_string()),
            "origin" | "from_lsd" | "from" => Self::Origin(value.to_string()),
            "destination" | "to_lsd" | "to" => Self::Destination(value.to_string()),
            "product" => Self::Product(value.to_string()),
            "driver" => Self::Driver(value.to_string()),
            "truck" => Self::Truck(value.to_string()),
            "trailer" => Self::Trailer(optional(value)),
            "estimated_volume" | "est_volume" => Self::EstimatedVolume(if value.is_empty() {
                None
            } else {
                Some(parse_decimal(value).ok_or_else(|| invalid("expected a number"))?)
            }),
            "instructions" | "special_instructions" => Self::Instructions(optional(value)),
            "priority" => Self::Priority(value.parse().map_err(|e: super::ParseEnumError| {
                invalid(&e.to_string())
            })?),
            "actual_volume" | "volume" => {
                Self::ActualVolume(parse_decimal(value).ok_or_else(|| invalid("expected a number"))?)
            }
            "signature" => {
                Self::Signature(parse_bool(value).ok_or_else(|| invalid("expected true or false"))?)
            }
            "notes" => Self::Notes(value.to_string()),
            "photo" => {
                if value.is_empty() {
                    return Err(invalid("photo reference must not be empty"));
                }
                Self::Photo(value.to_string())
            }
            _ => return Err(DeltaError::UnknownField(field.to_string())),
        };
        Ok(delta)
    }
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    Decimal::from_str(value).ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "x" => Some(true),
        "false" | "no" | "n" | "0" | "" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(value: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|at| at.with_timezone(&Utc))
}

/// A delta as sent by a field-capture client.
///
/// Wire shape: `{"ticket_id", "field", "value", "client_timestamp"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub ticket_id: TicketId,
    #[serde(flatten)]
    pub delta: FieldDelta,
    pub client_timestamp: DateTime<Utc>,
}
