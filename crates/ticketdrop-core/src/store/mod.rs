//! The authoritative ticket store.
//!
//! [`TicketStore`] is the capability boundary the rest of the core talks to.
//! Every mutation goes through [`TicketStore::update`], an atomic per-ticket
//! read-modify-write: the closure edits a private copy, the copy is checked
//! against the storage invariants, and only then replaces the stored record.
//! Readers never observe a half-applied batch.
//!
//! Storage invariants enforced here regardless of caller:
//! - stage changes move exactly one step forward
//! - a recorded field timestamp is never rewritten
//! - the ticket id and creation date never change

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ErrorCode;
use crate::model::{
    DeltaError, FieldDelta, ParseEnumError, Stage, Ticket, TicketId, TimestampField,
};
use crate::reference::same_name;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("ticket {0} not found")]
    NotFound(TicketId),

    #[error("ticket {0} already exists")]
    AlreadyExists(TicketId),

    #[error("ticket {ticket}: {field} is already recorded and cannot be rewritten")]
    DuplicateTimestamp {
        ticket: TicketId,
        field: TimestampField,
    },

    #[error("ticket {ticket}: illegal transition {from} -> {to}: {reason}")]
    IllegalTransition {
        ticket: TicketId,
        from: Stage,
        to: Stage,
        reason: String,
    },

    #[error("ticket {ticket}: {field} is immutable")]
    Immutable { ticket: TicketId, field: &'static str },

    #[error("ticket {ticket}: {source}")]
    InvalidDelta {
        ticket: TicketId,
        #[source]
        source: DeltaError,
    },

    /// The update closure chose not to commit; nothing was written.
    #[error("update aborted")]
    Aborted,

    #[error("sqlite error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("ticket serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt stored record: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::TicketNotFound,
            Self::DuplicateTimestamp { .. } => ErrorCode::DuplicateTimestamp,
            Self::IllegalTransition { .. } | Self::Immutable { .. } => {
                ErrorCode::IllegalTransition
            }
            Self::InvalidDelta { .. } => ErrorCode::InvalidFieldValue,
            Self::AlreadyExists(_) | Self::Aborted | Self::Corrupt(_) => {
                ErrorCode::InternalUnexpected
            }
            Self::Backend(_) | Self::Serialization(_) | Self::Io(_) => {
                ErrorCode::StorageUnavailable
            }
        }
    }

    /// True for faults of the storage medium rather than of the request.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Backend(_) | Self::Serialization(_) | Self::Io(_) | Self::Corrupt(_)
        )
    }
}

/// Selection criteria shared by listing and export.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub stage: Option<Stage>,
    /// Inclusive lower bound on the ticket's creation date.
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on the ticket's creation date.
    pub date_to: Option<NaiveDate>,
    pub customer: Option<String>,
    pub driver: Option<String>,
    pub truck: Option<String>,
    /// Restrict to these ids when non-empty.
    pub ids: Vec<TicketId>,
    pub limit: Option<usize>,
}

impl TicketFilter {
    #[must_use]
    pub fn stage(stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }

    /// True when no narrowing criterion is set (stage and limit aside).
    #[must_use]
    pub const fn is_unscoped(&self) -> bool {
        self.date_from.is_none()
            && self.date_to.is_none()
            && self.customer.is_none()
            && self.driver.is_none()
            && self.truck.is_none()
            && self.ids.is_empty()
    }

    #[must_use]
    pub fn matches(&self, ticket: &Ticket) -> bool {
        if self.stage.is_some_and(|stage| ticket.stage != stage) {
            return false;
        }
        if self.date_from.is_some_and(|from| ticket.created_on < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| ticket.created_on > to) {
            return false;
        }
        let name_matches = |wanted: &Option<String>, actual: &str| {
            wanted.as_deref().is_none_or(|w| same_name(w, actual))
        };
        if !name_matches(&self.customer, &ticket.job.customer)
            || !name_matches(&self.driver, &ticket.job.driver)
            || !name_matches(&self.truck, &ticket.job.truck)
        {
            return false;
        }
        self.ids.is_empty() || self.ids.contains(&ticket.id)
    }
}

/// Kind of audit trail entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Edited,
    Transition,
    FieldUpdate,
    Amended,
    Exported,
    Conflict,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Edited => "edited",
            Self::Transition => "transition",
            Self::FieldUpdate => "field_update",
            Self::Amended => "amended",
            Self::Exported => "exported",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "edited" => Ok(Self::Edited),
            "transition" => Ok(Self::Transition),
            "field_update" => Ok(Self::FieldUpdate),
            "amended" => Ok(Self::Amended),
            "exported" => Ok(Self::Exported),
            "conflict" => Ok(Self::Conflict),
            _ => Err(ParseEnumError {
                expected: "event kind",
                got: s.to_string(),
            }),
        }
    }
}

/// One append-only audit trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketEvent {
    pub ticket_id: TicketId,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub kind: EventKind,
    pub detail: String,
}

/// Closure signature for [`TicketStore::update`].
pub type UpdateFn<'a> = dyn FnMut(&mut Ticket) -> Result<(), StoreError> + 'a;

/// Swappable ticket persistence.
pub trait TicketStore: Send + Sync {
    /// Persist a new ticket. Fails if the id is taken.
    fn insert(&self, ticket: Ticket) -> Result<(), StoreError>;

    fn get(&self, id: &TicketId) -> Result<Ticket, StoreError>;

    /// Atomic read-modify-write of one ticket. Returns the committed record.
    ///
    /// The closure works on a copy; when it fails, or the result breaks a
    /// storage invariant, nothing is written.
    fn update(&self, id: &TicketId, apply: &mut UpdateFn<'_>) -> Result<Ticket, StoreError>;

    /// Tickets matching `filter`, ordered by id.
    fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, StoreError>;

    /// Tickets whose `updated_at` is strictly after `since`, ordered by update time.
    fn pull(&self, since: DateTime<Utc>) -> Result<Vec<Ticket>, StoreError>;

    /// Highest stored sequence for `date`, 0 when none.
    fn max_sequence(&self, date: NaiveDate) -> Result<u16, StoreError>;

    fn append_event(&self, event: &TicketEvent) -> Result<(), StoreError>;

    /// Audit trail for one ticket, oldest first.
    fn history(&self, id: &TicketId) -> Result<Vec<TicketEvent>, StoreError>;

    /// Apply a batch of deltas atomically: all or none.
    fn apply_update(&self, id: &TicketId, deltas: &[FieldDelta]) -> Result<Ticket, StoreError> {
        self.update(id, &mut |ticket| apply_deltas(ticket, deltas))
    }

    fn list_by_stage(&self, stage: Stage) -> Result<Vec<Ticket>, StoreError> {
        self.list(&TicketFilter::stage(stage))
    }

    /// `COMPLETED` tickets with no recorded export, narrowed by `filter`.
    fn list_unexported(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, StoreError> {
        let filter = TicketFilter {
            stage: Some(Stage::Completed),
            ..filter.clone()
        };
        Ok(self
            .list(&filter)?
            .into_iter()
            .filter(|ticket| !ticket.is_exported())
            .collect())
    }
}

/// Apply deltas in order to a ticket snapshot.
pub fn apply_deltas(ticket: &mut Ticket, deltas: &[FieldDelta]) -> Result<(), StoreError> {
    for delta in deltas {
        delta.apply(ticket).map_err(|source| match source {
            DeltaError::DuplicateTimestamp(field) => StoreError::DuplicateTimestamp {
                ticket: ticket.id.clone(),
                field,
            },
            other => StoreError::InvalidDelta {
                ticket: ticket.id.clone(),
                source: other,
            },
        })?;
    }
    Ok(())
}

/// Check an edited copy against the record it replaces.
pub fn check_invariants(before: &Ticket, after: &Ticket) -> Result<(), StoreError> {
    if before.id != after.id {
        return Err(StoreError::Immutable {
            ticket: before.id.clone(),
            field: "id",
        });
    }
    if before.created_on != after.created_on || before.created_at != after.created_at {
        return Err(StoreError::Immutable {
            ticket: before.id.clone(),
            field: "created_on",
        });
    }

    if before.stage != after.stage {
        // The write that records the first timestamp starts the job, so it
        // may carry an ASSIGNED ticket on from IN_PROGRESS.
        let starts_job = before.stage == Stage::Assigned
            && !before.timestamps.any_set()
            && after.timestamps.any_set();
        let from = if starts_job && after.stage > Stage::InProgress {
            Stage::InProgress
        } else {
            before.stage
        };
        from.can_transition_to(after.stage)
            .map_err(|invalid| StoreError::IllegalTransition {
                ticket: before.id.clone(),
                from: invalid.from,
                to: invalid.to,
                reason: invalid.reason.to_string(),
            })?;
    }

    for field in TimestampField::ALL {
        if let Some(recorded) = before.timestamps.get(field)
            && after.timestamps.get(field) != Some(recorded)
        {
            return Err(StoreError::DuplicateTimestamp {
                ticket: before.id.clone(),
                field,
            });
        }
    }

    Ok(())
}

/// Run `apply` against a copy of `current` and vet the result.
pub(crate) fn edit_copy(current: &Ticket, apply: &mut UpdateFn<'_>) -> Result<Ticket, StoreError> {
    let mut next = current.clone();
    apply(&mut next)?;
    check_invariants(current, &next)?;
    Ok(next)
}
