//! The lifecycle controller: the only component that requests stage
//! transitions.
//!
//! | Stage       | Allowed mutations                                   | Exit                          |
//! |-------------|-----------------------------------------------------|-------------------------------|
//! | PENDING     | creation fields                                     | ASSIGNED on confirm           |
//! | ASSIGNED    | field timestamps (amend for creation fields)        | IN_PROGRESS on first timestamp|
//! | IN_PROGRESS | timestamps, volume, hazards, signature, notes, photos | COMPLETED on completion pass |
//! | COMPLETED   | export status                                       | EXPORTED on export            |
//! | EXPORTED    | none                                                | none                          |
//!
//! Business-rule failures come back as [`Outcome::Rejected`]; only storage
//! faults are `Err`.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::clock::{Clock, local_date};
use crate::error::ErrorCode;
use crate::id::{IdError, SequenceSource, TicketIdGenerator};
use crate::model::{
    DeltaError, ExportStatus, FieldClass, FieldDelta, JobDetails, Partition, Stage, Ticket,
    TicketId, TimestampField,
};
use crate::reference::{ReferenceKind, Resolution, same_name};
use crate::store::{
    EventKind, StoreError, TicketEvent, TicketFilter, TicketStore, apply_deltas,
};
use crate::validate::{
    Issue, ValidationReport, ValidationStage, Validator, timestamp_order_issues,
};

const DISPATCH: &str = "dispatch";
const FIELD: &str = "field";
const RECONCILE: &str = "reconcile";
const EXPORT: &str = "export";

/// A business-rule rejection. Never an infrastructure fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    Validation { report: ValidationReport },
    IllegalTransition { stage: Stage, message: String },
    DuplicateTimestamp { field: TimestampField },
    NotFound { ticket: TicketId },
    SequenceExhausted { date: NaiveDate },
    InvalidField { field: String, message: String },
}

impl Rejection {
    fn illegal(stage: Stage, message: impl Into<String>) -> Self {
        Self::IllegalTransition {
            stage,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationFailed,
            Self::IllegalTransition { .. } => ErrorCode::IllegalTransition,
            Self::DuplicateTimestamp { .. } => ErrorCode::DuplicateTimestamp,
            Self::NotFound { .. } => ErrorCode::TicketNotFound,
            Self::SequenceExhausted { .. } => ErrorCode::SequenceExhausted,
            Self::InvalidField { .. } => ErrorCode::InvalidFieldValue,
        }
    }

    /// Field-scoped reasons, suitable for per-field correction prompts.
    #[must_use]
    pub fn issues(&self) -> Vec<Issue> {
        let issue = |field: &str, message: String| Issue {
            field: field.to_string(),
            message,
        };
        match self {
            Self::Validation { report } => report.errors.clone(),
            Self::IllegalTransition { message, .. } => vec![issue("stage", message.clone())],
            Self::DuplicateTimestamp { field } => vec![issue(
                field.as_str(),
                format!("{} is already recorded", field.label()),
            )],
            Self::NotFound { ticket } => {
                vec![issue("ticket_id", format!("ticket {ticket} not found"))]
            }
            Self::SequenceExhausted { date } => vec![issue(
                "ticket_id",
                format!("no ticket numbers left for {date}"),
            )],
            Self::InvalidField { field, message } => vec![issue(field, message.clone())],
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let issues: Vec<String> = self.issues().iter().map(ToString::to_string).collect();
        write!(f, "{}: {}", self.code().message(), issues.join("; "))
    }
}

impl From<DeltaError> for Rejection {
    fn from(err: DeltaError) -> Self {
        match err {
            DeltaError::DuplicateTimestamp(field) => Self::DuplicateTimestamp { field },
            DeltaError::UnknownField(field) => Self::InvalidField {
                message: format!("unknown field '{field}'"),
                field,
            },
            DeltaError::InvalidValue { field, reason } => Self::InvalidField {
                field,
                message: reason,
            },
        }
    }
}

/// Result of a lifecycle operation that passed infrastructure.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    Applied { value: T, warnings: Vec<Issue> },
    Rejected { rejection: Rejection },
}

impl<T> Outcome<T> {
    pub const fn applied(value: T, warnings: Vec<Issue>) -> Self {
        Self::Applied { value, warnings }
    }

    pub const fn rejected(rejection: Rejection) -> Self {
        Self::Rejected { rejection }
    }

    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn into_result(self) -> Result<T, Rejection> {
        match self {
            Self::Applied { value, .. } => Ok(value),
            Self::Rejected { rejection } => Err(rejection),
        }
    }

    #[must_use]
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Applied { .. } => None,
            Self::Rejected { rejection } => Some(rejection),
        }
    }
}

/// Infrastructure failure during a lifecycle operation.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),

    #[error("ticket id allocation failed: {0}")]
    Ids(String),
}

impl LifecycleError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Storage(err) => err.code(),
            Self::Ids(_) => ErrorCode::StorageUnavailable,
        }
    }
}

/// Per-entry result of replaying offline deltas.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub ticket: Ticket,
    /// Field keys written.
    pub applied: Vec<String>,
    /// Field keys skipped because the stored value is as new or newer.
    pub conflicts: Vec<String>,
}

/// Who is occupying a driver or truck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceStatus {
    pub kind: ReferenceKind,
    pub name: String,
    /// False when the reference list is configured and lacks the name.
    pub known: bool,
    pub available: bool,
    pub busy_with: Vec<TicketId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Availability {
    pub driver: Option<ResourceStatus>,
    pub truck: Option<ResourceStatus>,
}

/// Validation outcome for every ticket subject to one rule set.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: ValidationStage,
    pub total: usize,
    pub passed: Vec<TicketId>,
    pub failed: Vec<TicketIssues>,
    pub warnings: Vec<TicketIssues>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketIssues {
    pub ticket: TicketId,
    pub issues: Vec<Issue>,
}

/// Dashboard counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub total: usize,
    pub by_stage: BTreeMap<String, usize>,
    pub by_partition: BTreeMap<String, usize>,
    pub unexported_completed: usize,
}

struct StoreSequence<'a>(&'a dyn TicketStore);

impl SequenceSource for StoreSequence<'_> {
    fn max_sequence(&self, date: NaiveDate) -> Result<u16, IdError> {
        self.0
            .max_sequence(date)
            .map_err(|err| IdError::Source(err.to_string()))
    }
}

/// Orchestrates every ticket mutation.
pub struct Lifecycle {
    store: Arc<dyn TicketStore>,
    ids: TicketIdGenerator,
    validator: Validator,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("validator", &self.validator)
            .field("tz", &self.tz)
            .finish_non_exhaustive()
    }
}

/// Attempts at inserting a freshly numbered ticket before giving up.
const INSERT_ATTEMPTS: usize = 3;

impl Lifecycle {
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        validator: Validator,
        clock: Arc<dyn Clock>,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            ids: TicketIdGenerator::new(),
            validator,
            clock,
            tz,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn TicketStore> {
        &self.store
    }

    #[must_use]
    pub const fn validator(&self) -> &Validator {
        &self.validator
    }

    #[must_use]
    pub const fn tz(&self) -> Tz {
        self.tz
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub fn get(&self, id: &TicketId) -> Result<Outcome<Ticket>, LifecycleError> {
        match self.store.get(id) {
            Ok(ticket) => Ok(Outcome::applied(ticket, Vec::new())),
            Err(err) => settle(err),
        }
    }

    pub fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, LifecycleError> {
        self.store.list(filter).map_err(LifecycleError::Storage)
    }

    /// Tickets changed after `since`, for polling or push delivery.
    pub fn pull(&self, since: DateTime<Utc>) -> Result<Vec<Ticket>, LifecycleError> {
        self.store.pull(since).map_err(LifecycleError::Storage)
    }

    pub fn history(&self, id: &TicketId) -> Result<Vec<TicketEvent>, LifecycleError> {
        self.store.history(id).map_err(LifecycleError::Storage)
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    /// Validate a creation request, number it and store it as `PENDING`.
    ///
    /// No id is consumed when validation fails.
    pub fn create(&self, job: JobDetails) -> Result<Outcome<Ticket>, LifecycleError> {
        let report = self.validator.validate_job(&job);
        if !report.is_valid() {
            return Ok(Outcome::rejected(Rejection::Validation { report }));
        }
        let job = self.canonicalize(job);
        let now = self.clock.now();
        let date = local_date(now, self.tz);

        for attempt in 1..=INSERT_ATTEMPTS {
            let id = match self.ids.next(date, &StoreSequence(self.store.as_ref())) {
                Ok(id) => id,
                Err(IdError::SequenceExhausted { date }) => {
                    return Ok(Outcome::rejected(Rejection::SequenceExhausted { date }));
                }
                Err(IdError::Source(message)) => return Err(LifecycleError::Ids(message)),
            };

            let ticket = Ticket::new(id.clone(), job.clone(), date, now);
            match self.store.insert(ticket.clone()) {
                Ok(()) => {
                    self.record_event(&id, DISPATCH, EventKind::Created, String::new());
                    tracing::info!(ticket = %id, customer = %ticket.job.customer, "ticket created");
                    return Ok(Outcome::applied(ticket, report.warnings));
                }
                Err(StoreError::AlreadyExists(_)) => {
                    // Another writer numbered this date; reseed from storage.
                    tracing::debug!(ticket = %id, attempt, "ticket id taken, reseeding");
                    self.ids.reset();
                }
                Err(err) => return Err(LifecycleError::Storage(err)),
            }
        }
        Err(LifecycleError::Ids(format!(
            "could not allocate a free ticket id for {date} after {INSERT_ATTEMPTS} attempts"
        )))
    }

    /// Change creation fields while the ticket is still `PENDING`.
    pub fn edit_pending(
        &self,
        id: &TicketId,
        deltas: &[FieldDelta],
    ) -> Result<Outcome<Ticket>, LifecycleError> {
        let validator = &self.validator;
        let now = self.clock.now();
        self.mutate(id, DISPATCH, EventKind::Edited, describe(deltas), |ticket| {
            if ticket.stage != Stage::Pending {
                return Err(Rejection::illegal(
                    ticket.stage,
                    format!(
                        "ticket is {}; creation fields can only be edited while PENDING (use amend)",
                        ticket.stage
                    ),
                ));
            }
            require_class(ticket.stage, deltas, FieldClass::Creation)?;
            apply_deltas_checked(ticket, deltas)?;
            let report = validator.validate_job(&ticket.job);
            if !report.is_valid() {
                return Err(Rejection::Validation { report });
            }
            ticket.job = self.canonicalize(ticket.job.clone());
            stamp_fields(ticket, deltas, now);
            Ok(report.warnings)
        })
    }

    /// The explicit confirmation step: re-validate and move to `ASSIGNED`.
    pub fn confirm_creation(&self, id: &TicketId) -> Result<Outcome<Ticket>, LifecycleError> {
        let validator = &self.validator;
        self.mutate(
            id,
            DISPATCH,
            EventKind::Transition,
            "PENDING -> ASSIGNED".to_string(),
            |ticket| {
                if ticket.stage != Stage::Pending {
                    return Err(Rejection::illegal(
                        ticket.stage,
                        format!("only PENDING tickets can be confirmed (stage is {})", ticket.stage),
                    ));
                }
                let report = validator.validate_job(&ticket.job);
                if !report.is_valid() {
                    return Err(Rejection::Validation { report });
                }
                ticket.stage = Stage::Assigned;
                Ok(report.warnings)
            },
        )
    }

    /// Human-reviewed correction of creation fields on an `ASSIGNED` ticket.
    ///
    /// Never reopens `PENDING`; the amendment is re-validated with creation
    /// rules and recorded in the audit trail under the reviewer's name.
    pub fn amend(
        &self,
        id: &TicketId,
        deltas: &[FieldDelta],
        reviewer: &str,
    ) -> Result<Outcome<Ticket>, LifecycleError> {
        let reviewer = reviewer.trim();
        if reviewer.is_empty() {
            return Ok(Outcome::rejected(Rejection::InvalidField {
                field: "reviewer".to_string(),
                message: "amendments need a named reviewer".to_string(),
            }));
        }
        let validator = &self.validator;
        let now = self.clock.now();
        let detail = format!("reviewed by {reviewer}: {}", describe(deltas));
        self.mutate(id, reviewer, EventKind::Amended, detail, |ticket| {
            if ticket.stage != Stage::Assigned {
                return Err(Rejection::illegal(
                    ticket.stage,
                    format!(
                        "amendments apply to ASSIGNED tickets (stage is {})",
                        ticket.stage
                    ),
                ));
            }
            require_class(ticket.stage, deltas, FieldClass::Creation)?;
            apply_deltas_checked(ticket, deltas)?;
            let report = validator.validate_job(&ticket.job);
            if !report.is_valid() {
                return Err(Rejection::Validation { report });
            }
            ticket.job = self.canonicalize(ticket.job.clone());
            stamp_fields(ticket, deltas, now);
            Ok(report.warnings)
        })
    }

    // ── Field capture ────────────────────────────────────────────────────

    /// Apply driver-captured fields. The first timestamp moves an `ASSIGNED`
    /// ticket to `IN_PROGRESS`.
    pub fn record_fields(
        &self,
        id: &TicketId,
        deltas: &[FieldDelta],
    ) -> Result<Outcome<Ticket>, LifecycleError> {
        let now = self.clock.now();
        self.mutate(id, FIELD, EventKind::FieldUpdate, describe(deltas), |ticket| {
            apply_field_deltas(ticket, deltas)?;
            stamp_fields(ticket, deltas, now);
            Ok(Vec::new())
        })
    }

    /// Apply any final fields and transition to `COMPLETED` in one write.
    ///
    /// From `ASSIGNED` the deltas must start the job. When completion
    /// validation fails nothing is written and the validator's errors come
    /// back as-is.
    pub fn complete(
        &self,
        id: &TicketId,
        deltas: &[FieldDelta],
    ) -> Result<Outcome<Ticket>, LifecycleError> {
        let validator = &self.validator;
        let now = self.clock.now();
        let detail = if deltas.is_empty() {
            "-> COMPLETED".to_string()
        } else {
            format!("-> COMPLETED with {}", describe(deltas))
        };
        self.mutate(id, FIELD, EventKind::Transition, detail, |ticket| {
            apply_field_deltas(ticket, deltas)?;
            if ticket.stage != Stage::InProgress {
                return Err(Rejection::illegal(
                    ticket.stage,
                    format!("only IN_PROGRESS tickets can be completed (stage is {})", ticket.stage),
                ));
            }
            let report = validator.validate(ticket, ValidationStage::Completion);
            if !report.is_valid() {
                return Err(Rejection::Validation { report });
            }
            stamp_fields(ticket, deltas, now);
            ticket.hours = ticket.computed_hours();
            ticket.wait_time = ticket.computed_wait_time();
            ticket.completed_at = Some(now);
            ticket.stage = Stage::Completed;
            Ok(report.warnings)
        })
    }

    /// Replay offline deltas with last-writer-wins by client timestamp.
    ///
    /// A delta whose client timestamp is not newer than the one recorded for
    /// its field is skipped as a conflict, which makes replay idempotent.
    /// When `complete` is set and the surviving deltas leave the ticket in
    /// progress, completion is attempted afterwards.
    pub fn reconcile(
        &self,
        id: &TicketId,
        deltas: &[FieldDelta],
        client_ts: DateTime<Utc>,
        complete: bool,
    ) -> Result<Outcome<ReconcileReport>, LifecycleError> {
        let mut applied = Vec::new();
        let mut conflicts = Vec::new();

        let outcome = self.mutate(id, RECONCILE, EventKind::FieldUpdate, describe(deltas), |ticket| {
            applied.clear();
            conflicts.clear();
            let mut fresh = Vec::new();
            for delta in deltas {
                let key = delta.key();
                let stale = ticket.field_clock.get(&key).is_some_and(|seen| *seen >= client_ts)
                    || delta
                        .timestamp()
                        .is_some_and(|(field, at)| ticket.timestamps.get(field) == Some(at));
                if stale {
                    conflicts.push(key);
                } else {
                    fresh.push(delta.clone());
                    applied.push(key);
                }
            }
            apply_field_deltas(ticket, &fresh)?;
            stamp_fields(ticket, &fresh, client_ts);
            Ok(Vec::new())
        })?;

        let mut ticket = match outcome {
            Outcome::Applied { value, .. } => value,
            Outcome::Rejected { rejection } => return Ok(Outcome::rejected(rejection)),
        };
        for key in &conflicts {
            tracing::warn!(ticket = %id, field = %key, %client_ts, "stale offline update discarded");
        }
        if !conflicts.is_empty() {
            self.record_event(id, RECONCILE, EventKind::Conflict, conflicts.join(", "));
        }

        if complete && ticket.stage == Stage::InProgress {
            match self.complete(id, &[])? {
                Outcome::Applied { value, warnings } => {
                    return Ok(Outcome::applied(
                        ReconcileReport {
                            ticket: value,
                            applied,
                            conflicts,
                        },
                        warnings,
                    ));
                }
                Outcome::Rejected { rejection } => return Ok(Outcome::rejected(rejection)),
            }
        }
        if complete && ticket.stage != Stage::Completed && ticket.stage != Stage::Exported {
            return Ok(Outcome::rejected(Rejection::illegal(
                ticket.stage,
                format!("cannot complete a {} ticket", ticket.stage),
            )));
        }

        Ok(Outcome::applied(
            ReconcileReport {
                ticket,
                applied,
                conflicts,
            },
            Vec::new(),
        ))
    }

    // ── Export ───────────────────────────────────────────────────────────

    /// Record that `id` went out in `batch`.
    ///
    /// With `force`, an already exported ticket is re-recorded under the new
    /// batch; the earlier batch stays in the audit trail.
    pub fn mark_exported(
        &self,
        id: &TicketId,
        batch: &str,
        at: DateTime<Utc>,
        force: bool,
    ) -> Result<Outcome<Ticket>, LifecycleError> {
        let mut previous = None;
        let outcome = self.mutate(id, EXPORT, EventKind::Exported, String::new(), |ticket| {
            let report = Validator::validate_export(ticket, force);
            if !report.is_valid() {
                return Err(Rejection::Validation { report });
            }
            previous = ticket.export_batch().map(str::to_string);
            ticket.hours = ticket.computed_hours();
            ticket.export = ExportStatus::Exported {
                at,
                batch: batch.to_string(),
            };
            if ticket.stage == Stage::Completed {
                ticket.stage = Stage::Exported;
            }
            Ok(Vec::new())
        })?;

        if outcome.is_applied() {
            let detail = previous.map_or_else(
                || format!("batch {batch}"),
                |old| format!("batch {batch} (replaces {old})"),
            );
            self.record_event(id, EXPORT, EventKind::Exported, detail);
        }
        Ok(outcome)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Is the driver and/or truck free? Busy means on an `ASSIGNED` or
    /// `IN_PROGRESS` ticket.
    pub fn check_availability(
        &self,
        driver: Option<&str>,
        truck: Option<&str>,
    ) -> Result<Availability, LifecycleError> {
        let mut active = self.store.list_by_stage(Stage::Assigned).map_err(LifecycleError::Storage)?;
        active.extend(
            self.store
                .list_by_stage(Stage::InProgress)
                .map_err(LifecycleError::Storage)?,
        );

        let status = |kind: ReferenceKind, name: &str| {
            let busy_with: Vec<TicketId> = active
                .iter()
                .filter(|ticket| {
                    let assigned = match kind {
                        ReferenceKind::Truck => &ticket.job.truck,
                        _ => &ticket.job.driver,
                    };
                    same_name(assigned, name)
                })
                .map(|ticket| ticket.id.clone())
                .collect();
            ResourceStatus {
                kind,
                name: name.trim().to_string(),
                known: self.validator.reference().resolve(kind, name) != Resolution::NotFound,
                available: busy_with.is_empty(),
                busy_with,
            }
        };

        Ok(Availability {
            driver: driver.map(|name| status(ReferenceKind::Driver, name)),
            truck: truck.map(|name| status(ReferenceKind::Truck, name)),
        })
    }

    /// Validate one ticket with the rule set its stage implies.
    pub fn validate(&self, id: &TicketId) -> Result<Outcome<ValidationReport>, LifecycleError> {
        match self.store.get(id) {
            Ok(ticket) => {
                let stage = ValidationStage::for_stage(ticket.stage);
                let report = match stage {
                    ValidationStage::Export => {
                        Validator::validate_export(&ticket, ticket.stage == Stage::Exported)
                    }
                    _ => self.validator.validate(&ticket, stage),
                };
                Ok(Outcome::applied(report, Vec::new()))
            }
            Err(err) => settle(err),
        }
    }

    /// Validate every ticket a rule set applies to.
    pub fn validate_stage(&self, stage: ValidationStage) -> Result<StageReport, LifecycleError> {
        let tickets = match stage {
            ValidationStage::Export => self.store.list_unexported(&TicketFilter::default()),
            _ => self.store.list_by_stage(stage.subject_stage()),
        }
        .map_err(LifecycleError::Storage)?;

        let mut report = StageReport {
            stage,
            total: tickets.len(),
            passed: Vec::new(),
            failed: Vec::new(),
            warnings: Vec::new(),
        };
        for ticket in tickets {
            let result = self.validator.validate(&ticket, stage);
            if !result.warnings.is_empty() {
                report.warnings.push(TicketIssues {
                    ticket: ticket.id.clone(),
                    issues: result.warnings.clone(),
                });
            }
            if result.is_valid() {
                report.passed.push(ticket.id);
            } else {
                report.failed.push(TicketIssues {
                    ticket: ticket.id,
                    issues: result.errors,
                });
            }
        }
        Ok(report)
    }

    /// Reports for all three rule sets.
    pub fn validation_report(&self) -> Result<Vec<StageReport>, LifecycleError> {
        ValidationStage::ALL
            .into_iter()
            .map(|stage| self.validate_stage(stage))
            .collect()
    }

    pub fn stats(&self) -> Result<Stats, LifecycleError> {
        let tickets = self
            .store
            .list(&TicketFilter::default())
            .map_err(LifecycleError::Storage)?;

        let mut stats = Stats {
            total: tickets.len(),
            ..Stats::default()
        };
        for stage in Stage::ALL {
            stats.by_stage.insert(stage.as_str().to_string(), 0);
        }
        for partition in [Partition::PreAssignment, Partition::Active, Partition::Completed] {
            stats.by_partition.insert(partition.as_str().to_string(), 0);
        }
        for ticket in &tickets {
            *stats.by_stage.entry(ticket.stage.as_str().to_string()).or_default() += 1;
            *stats
                .by_partition
                .entry(ticket.stage.partition().as_str().to_string())
                .or_default() += 1;
            if ticket.stage == Stage::Completed && !ticket.is_exported() {
                stats.unexported_completed += 1;
            }
        }
        Ok(stats)
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Atomic mutation with rejection capture and audit logging.
    ///
    /// `edit` returns the warnings to attach, or a rejection that aborts the
    /// store update with nothing written.
    fn mutate<F>(
        &self,
        id: &TicketId,
        actor: &str,
        kind: EventKind,
        detail: String,
        mut edit: F,
    ) -> Result<Outcome<Ticket>, LifecycleError>
    where
        F: FnMut(&mut Ticket) -> Result<Vec<Issue>, Rejection>,
    {
        let now = self.clock.now();
        let mut rejection = None;
        let mut warnings = Vec::new();
        let mut from = None;

        let result = self.store.update(id, &mut |ticket| {
            from = Some(ticket.stage);
            let before = ticket.clone();
            match edit(ticket) {
                Ok(found) => {
                    warnings = found;
                    if *ticket != before {
                        ticket.updated_at = now;
                    }
                    Ok(())
                }
                Err(reason) => {
                    rejection = Some(reason);
                    Err(StoreError::Aborted)
                }
            }
        });

        match result {
            Ok(ticket) => {
                if from.is_some_and(|stage| stage != ticket.stage) {
                    tracing::info!(
                        ticket = %id,
                        from = %from.map_or("?", Stage::as_str),
                        to = %ticket.stage,
                        "stage transition"
                    );
                }
                if kind != EventKind::Exported {
                    self.record_event(id, actor, kind, detail);
                }
                Ok(Outcome::applied(ticket, warnings))
            }
            Err(StoreError::Aborted) => match rejection {
                Some(rejection) => {
                    tracing::debug!(ticket = %id, code = rejection.code().code(), "mutation rejected");
                    Ok(Outcome::rejected(rejection))
                }
                None => Err(LifecycleError::Storage(StoreError::Aborted)),
            },
            Err(err) => settle(err),
        }
    }

    fn record_event(&self, id: &TicketId, actor: &str, kind: EventKind, detail: String) {
        let event = TicketEvent {
            ticket_id: id.clone(),
            at: self.clock.now(),
            actor: actor.to_string(),
            kind,
            detail,
        };
        if let Err(err) = self.store.append_event(&event) {
            tracing::warn!(ticket = %id, error = %err, "failed to append audit event");
        }
    }

    /// Trim free text and replace reference values with their canonical spelling.
    fn canonicalize(&self, mut job: JobDetails) -> JobDetails {
        let reference = self.validator.reference();
        let canonical = |kind: ReferenceKind, value: &mut String| {
            *value = match reference.resolve(kind, value) {
                Resolution::Found(name) => name,
                Resolution::NotFound | Resolution::Unconfigured => value.trim().to_string(),
            };
        };
        canonical(ReferenceKind::Customer, &mut job.customer);
        canonical(ReferenceKind::Driver, &mut job.driver);
        canonical(ReferenceKind::Product, &mut job.product);
        canonical(ReferenceKind::Truck, &mut job.truck);
        if let Some(trailer) = job.trailer.as_mut() {
            canonical(ReferenceKind::Trailer, trailer);
        }
        job.trailer = job.trailer.filter(|t| !t.is_empty());
        job.origin = job.origin.trim().to_string();
        job.destination = job.destination.trim().to_string();
        job.instructions = job
            .instructions
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        job
    }
}

/// Map a store error to a rejection when it is a business-rule failure.
fn settle<T>(err: StoreError) -> Result<Outcome<T>, LifecycleError> {
    let rejection = match err {
        StoreError::NotFound(ticket) => Rejection::NotFound { ticket },
        StoreError::DuplicateTimestamp { field, .. } => Rejection::DuplicateTimestamp { field },
        StoreError::IllegalTransition { from, reason, .. } => Rejection::illegal(from, reason),
        StoreError::InvalidDelta { source, .. } => Rejection::from(source),
        StoreError::Immutable { field, .. } => Rejection::InvalidField {
            field: field.to_string(),
            message: format!("{field} cannot be changed"),
        },
        other => return Err(LifecycleError::Storage(other)),
    };
    Ok(Outcome::rejected(rejection))
}

/// Record when each field's stored value was written; offline replays
/// older than this lose to it.
fn stamp_fields(ticket: &mut Ticket, deltas: &[FieldDelta], at: DateTime<Utc>) {
    for delta in deltas {
        let seen = ticket.field_clock.entry(delta.key()).or_insert(at);
        *seen = (*seen).max(at);
    }
}

fn describe(deltas: &[FieldDelta]) -> String {
    deltas
        .iter()
        .map(FieldDelta::key)
        .collect::<Vec<_>>()
        .join(", ")
}

fn require_class(stage: Stage, deltas: &[FieldDelta], class: FieldClass) -> Result<(), Rejection> {
    match deltas.iter().find(|delta| delta.class() != class) {
        Some(delta) => Err(Rejection::illegal(
            stage,
            format!("{} cannot be changed here", delta.name()),
        )),
        None => Ok(()),
    }
}

fn apply_deltas_checked(ticket: &mut Ticket, deltas: &[FieldDelta]) -> Result<(), Rejection> {
    apply_deltas(ticket, deltas).map_err(|err| match err {
        StoreError::DuplicateTimestamp { field, .. } => Rejection::DuplicateTimestamp { field },
        StoreError::InvalidDelta { source, .. } => Rejection::from(source),
        other => Rejection::InvalidField {
            field: "ticket".to_string(),
            message: other.to_string(),
        },
    })
}

/// Apply driver-side deltas under the per-stage mutation rules.
///
/// Timestamps go first so a batch that starts the job may also carry
/// completion fields.
fn apply_field_deltas(ticket: &mut Ticket, deltas: &[FieldDelta]) -> Result<(), Rejection> {
    let is_timestamp = |delta: &&FieldDelta| delta.class() == FieldClass::Timestamp;
    let ordered = deltas
        .iter()
        .filter(is_timestamp)
        .chain(deltas.iter().filter(|delta| !is_timestamp(delta)));
    for delta in ordered {
        let stage = ticket.stage;
        match (delta.class(), stage) {
            (FieldClass::Creation, _) => {
                return Err(Rejection::illegal(
                    stage,
                    format!(
                        "{} is a dispatch field; edit it while PENDING or amend it while ASSIGNED",
                        delta.name()
                    ),
                ));
            }
            (_, Stage::Pending) => {
                return Err(Rejection::illegal(
                    stage,
                    "ticket must be confirmed before field updates",
                ));
            }
            (FieldClass::Completion, Stage::Assigned) => {
                return Err(Rejection::illegal(
                    stage,
                    format!("record the first timestamp before {}", delta.name()),
                ));
            }
            (_, Stage::Completed | Stage::Exported) => {
                return Err(Rejection::illegal(
                    stage,
                    format!("ticket is {stage}; field data is closed"),
                ));
            }
            _ => {}
        }

        apply_deltas_checked(ticket, std::slice::from_ref(delta))?;
        if stage == Stage::Assigned && delta.class() == FieldClass::Timestamp {
            ticket.stage = Stage::InProgress;
        }
    }

    let order = timestamp_order_issues(ticket);
    if !order.is_empty() {
        return Err(Rejection::Validation {
            report: ValidationReport {
                stage: ValidationStage::Completion,
                errors: order,
                warnings: Vec::new(),
            },
        });
    }
    Ok(())
}
