//! Fixed-column billing export.
//!
//! A batch selects completed tickets, runs export validation on each, turns
//! the passing ones into 19-column records and reports the rest as skipped.
//! Recording the export is a separate [`ExportFormatter::commit`] step so a
//! file can be produced without marking anything, and so a failure to mark
//! one ticket is reported per ticket instead of losing track of the batch.
//!
//! Column order and encoding are fixed by the billing system import:
//!
//! ```text
//! Attachment,Customer,Location,Start Date,Reference,Ticket#,Truck#,Operator,
//! Trailer#,Product,Actual Vol,Product2,From LSD,To LSD,Hours,Charge,Job Desc,
//! Company,Status
//! ```
//!
//! UTF-8 without BOM, CRLF line ends, fields quoted only when they contain a
//! comma or quote, embedded line breaks flattened to a space.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::borrow::Cow;
use std::io::{self, Write};
use std::sync::Arc;

use crate::error::ErrorCode;
use crate::lifecycle::{Lifecycle, LifecycleError, Outcome};
use crate::model::{Stage, Ticket, TicketId, format2};
use crate::store::TicketFilter;
use crate::validate::{Issue, Validator};

/// Header row, in import order.
pub const EXPORT_COLUMNS: [&str; 19] = [
    "Attachment",
    "Customer",
    "Location",
    "Start Date",
    "Reference",
    "Ticket#",
    "Truck#",
    "Operator",
    "Trailer#",
    "Product",
    "Actual Vol",
    "Product2",
    "From LSD",
    "To LSD",
    "Hours",
    "Charge",
    "Job Desc",
    "Company",
    "Status",
];

const START_DATE_FORMAT: &str = "%d-%m-%Y %H:%M";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("refusing to export every completed ticket without --all")]
    Unscoped,

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("failed to write export: {0}")]
    Io(#[from] io::Error),
}

impl ExportError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unscoped => ErrorCode::InvalidFieldValue,
            Self::Lifecycle(err) => err.code(),
            Self::Io(_) => ErrorCode::StorageUnavailable,
        }
    }
}

/// One billing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRecord {
    pub attachment: String,
    pub customer: String,
    pub location: String,
    pub start_date: String,
    pub reference: String,
    pub ticket_number: String,
    pub truck: String,
    pub operator: String,
    pub trailer: String,
    pub product: String,
    pub actual_volume: String,
    pub product2: String,
    pub from_location: String,
    pub to_location: String,
    pub hours: String,
    pub charge: String,
    pub job_description: String,
    pub company: String,
    pub status: String,
}

impl ExportRecord {
    /// Build the row for `ticket`. Derived fields are recomputed from the
    /// current ticket state.
    #[must_use]
    pub fn from_ticket(ticket: &Ticket, company: &str, tz: Tz) -> Self {
        let job = &ticket.job;
        let start_date = ticket
            .timestamps
            .arrive_origin
            .map(|at| at.with_timezone(&tz).format(START_DATE_FORMAT).to_string())
            .unwrap_or_default();
        let hours = ticket.computed_hours().or(ticket.hours);

        Self {
            attachment: "FALSE".to_string(),
            customer: job.customer.clone(),
            location: format!("{} to {}", job.origin, job.destination),
            start_date,
            reference: String::new(),
            ticket_number: ticket.id.to_string(),
            truck: job.truck.clone(),
            operator: operator_name(&job.driver),
            trailer: job.trailer.clone().unwrap_or_default(),
            product: job.product.clone(),
            actual_volume: ticket.actual_volume.map(format2).unwrap_or_default(),
            product2: String::new(),
            from_location: job.origin.clone(),
            to_location: job.destination.clone(),
            hours: hours.map(format2).unwrap_or_default(),
            charge: String::new(),
            job_description: format!("{} - {}", job.product, job.customer),
            company: company.to_string(),
            status: "Completed".to_string(),
        }
    }

    /// Values in column order.
    #[must_use]
    pub fn fields(&self) -> [&str; 19] {
        [
            &self.attachment,
            &self.customer,
            &self.location,
            &self.start_date,
            &self.reference,
            &self.ticket_number,
            &self.truck,
            &self.operator,
            &self.trailer,
            &self.product,
            &self.actual_volume,
            &self.product2,
            &self.from_location,
            &self.to_location,
            &self.hours,
            &self.charge,
            &self.job_description,
            &self.company,
            &self.status,
        ]
    }
}

/// "First Last" becomes "Last, First"; a single name is kept as-is.
#[must_use]
pub fn operator_name(driver: &str) -> String {
    let parts: Vec<&str> = driver.split_whitespace().collect();
    match parts.as_slice() {
        [first, .., last] => format!("{last}, {first}"),
        _ => driver.trim().to_string(),
    }
}

/// Encode one field: line breaks become a single space, then the value is
/// quoted when it contains a delimiter or a quote.
#[must_use]
pub fn encode_field(value: &str) -> Cow<'_, str> {
    let flattened: Cow<'_, str> = if value.contains(['\r', '\n']) {
        Cow::Owned(
            value
                .replace("\r\n", " ")
                .replace(['\r', '\n'], " "),
        )
    } else {
        Cow::Borrowed(value)
    };

    if flattened.contains([',', '"']) {
        Cow::Owned(format!("\"{}\"", flattened.replace('"', "\"\"")))
    } else {
        flattened
    }
}

fn write_row<W: Write>(out: &mut W, fields: &[&str]) -> io::Result<()> {
    let line: Vec<Cow<'_, str>> = fields.iter().map(|f| encode_field(f)).collect();
    out.write_all(line.join(",").as_bytes())?;
    out.write_all(b"\r\n")
}

/// Write the header and `records`.
pub fn write_csv<W: Write>(records: &[ExportRecord], out: &mut W) -> io::Result<()> {
    write_row(out, &EXPORT_COLUMNS)?;
    for record in records {
        write_row(out, &record.fields())?;
    }
    out.flush()
}

/// `TicketDrop_Export_YYYYMMDD_HHMMSS.csv` in the dispatch zone.
#[must_use]
pub fn default_file_name(at: DateTime<Utc>, tz: Tz) -> String {
    format!(
        "TicketDrop_Export_{}.csv",
        at.with_timezone(&tz).format("%Y%m%d_%H%M%S")
    )
}

/// Which tickets a batch covers.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub filter: TicketFilter,
    /// Export every completed ticket when no filter narrows the selection.
    pub all: bool,
    /// Include already exported tickets.
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedTicket {
    pub ticket: TicketId,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportBatch {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub force: bool,
    pub records: Vec<ExportRecord>,
    /// Ticket ids of `records`, same order.
    pub tickets: Vec<TicketId>,
    pub skipped: Vec<SkippedTicket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    Complete,
    PartialFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitReport {
    pub batch_id: String,
    pub status: CommitStatus,
    pub marked: Vec<TicketId>,
    pub failed: Vec<SkippedTicket>,
}

impl CommitReport {
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self.status {
            CommitStatus::Complete => None,
            CommitStatus::PartialFailure => Some(ErrorCode::ExportPartialFailure),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub batch: ExportBatch,
    /// `None` when the export was not recorded.
    pub commit: Option<CommitReport>,
}

/// Produces billing batches from the ticket store.
#[derive(Debug)]
pub struct ExportFormatter {
    lifecycle: Arc<Lifecycle>,
    company: String,
}

impl ExportFormatter {
    #[must_use]
    pub fn new(lifecycle: Arc<Lifecycle>, company: impl Into<String>) -> Self {
        Self {
            lifecycle,
            company: company.into(),
        }
    }

    /// Select, validate and format the tickets matching `request`.
    pub fn build_batch(&self, request: &ExportRequest) -> Result<ExportBatch, ExportError> {
        if request.filter.is_unscoped() && !request.all {
            return Err(ExportError::Unscoped);
        }

        let mut filter = request.filter.clone();
        filter.stage = None;
        let mut candidates: Vec<Ticket> = if request.force {
            self.lifecycle
                .list(&filter)?
                .into_iter()
                .filter(|t| matches!(t.stage, Stage::Completed | Stage::Exported))
                .collect()
        } else {
            self.lifecycle.store().list_unexported(&filter).map_err(LifecycleError::Storage)?
        };
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        let created_at = self.lifecycle.now();
        let tz = self.lifecycle.tz();
        let mut batch = ExportBatch {
            batch_id: batch_id(created_at, &candidates),
            created_at,
            force: request.force,
            records: Vec::new(),
            tickets: Vec::new(),
            skipped: Vec::new(),
        };

        for ticket in candidates {
            let report = Validator::validate_export(&ticket, request.force);
            if report.is_valid() {
                batch.records.push(ExportRecord::from_ticket(&ticket, &self.company, tz));
                batch.tickets.push(ticket.id);
            } else {
                tracing::debug!(ticket = %ticket.id, errors = report.errors.len(), "ticket skipped from export");
                batch.skipped.push(SkippedTicket {
                    ticket: ticket.id,
                    issues: report.errors,
                });
            }
        }

        tracing::info!(
            batch = %batch.batch_id,
            records = batch.records.len(),
            skipped = batch.skipped.len(),
            "export batch built"
        );
        Ok(batch)
    }

    /// Record the export of every ticket in `batch`.
    ///
    /// Every ticket is attempted; failures are itemized and turn the report
    /// into a partial failure instead of aborting.
    pub fn commit(&self, batch: &ExportBatch) -> CommitReport {
        let mut marked = Vec::new();
        let mut failed = Vec::new();

        for id in &batch.tickets {
            let issues = match self
                .lifecycle
                .mark_exported(id, &batch.batch_id, batch.created_at, batch.force)
            {
                Ok(Outcome::Applied { .. }) => {
                    marked.push(id.clone());
                    continue;
                }
                Ok(Outcome::Rejected { rejection }) => rejection.issues(),
                Err(err) => vec![Issue {
                    field: "ticket".to_string(),
                    message: err.to_string(),
                }],
            };
            failed.push(SkippedTicket {
                ticket: id.clone(),
                issues,
            });
        }

        let status = if failed.is_empty() {
            CommitStatus::Complete
        } else {
            tracing::warn!(
                batch = %batch.batch_id,
                marked = marked.len(),
                failed = failed.len(),
                "export written but not every ticket was marked exported"
            );
            CommitStatus::PartialFailure
        };
        tracing::info!(batch = %batch.batch_id, marked = marked.len(), "export recorded");

        CommitReport {
            batch_id: batch.batch_id.clone(),
            status,
            marked,
            failed,
        }
    }

    /// Build a batch, write it to `sink`, and record it when `mark` is set.
    ///
    /// Nothing is marked unless the file was written in full.
    pub fn export<W: Write>(
        &self,
        request: &ExportRequest,
        sink: &mut W,
        mark: bool,
    ) -> Result<ExportSummary, ExportError> {
        let batch = self.build_batch(request)?;
        write_csv(&batch.records, sink)?;
        let commit = (mark && !batch.tickets.is_empty()).then(|| self.commit(&batch));
        Ok(ExportSummary { batch, commit })
    }
}

/// `exp-<UTC seconds>-<hash of ticket ids>`.
fn batch_id(at: DateTime<Utc>, tickets: &[Ticket]) -> String {
    let mut input = at.timestamp_micros().to_string();
    for ticket in tickets {
        input.push('\t');
        input.push_str(ticket.id.as_str());
    }
    let hash = blake3::hash(input.as_bytes()).to_hex();
    format!("exp-{}-{}", at.format("%Y%m%d%H%M%S"), &hash.as_str()[..8])
}
