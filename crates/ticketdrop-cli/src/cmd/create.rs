//! `td create`: dispatch a new ticket, or a CSV batch of them.

use crate::cmd::render_ticket;
use crate::output::{CliError, OutputMode, fail, pretty_kv, pretty_section, render_mode};
use crate::project::{Project, settle};
use anyhow::Context as _;
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use ticketdrop_core::error::ErrorCode;
use ticketdrop_core::lifecycle::{Lifecycle, Outcome};
use ticketdrop_core::model::{JobDetails, Priority, Stage, TicketId};
use ticketdrop_core::validate::Issue;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Customer (resolved against the configured customer list).
    #[arg(long, required_unless_present = "batch")]
    pub customer: Option<String>,

    /// Pickup location: an LSD such as 10-15-052-20W4 or a named site.
    #[arg(long = "from", required_unless_present = "batch")]
    pub origin: Option<String>,

    /// Delivery location.
    #[arg(long = "to", required_unless_present = "batch")]
    pub destination: Option<String>,

    #[arg(long, required_unless_present = "batch")]
    pub product: Option<String>,

    #[arg(long, required_unless_present = "batch")]
    pub driver: Option<String>,

    #[arg(long, required_unless_present = "batch")]
    pub truck: Option<String>,

    #[arg(long)]
    pub trailer: Option<String>,

    /// Estimated volume in cubic metres.
    #[arg(long = "volume")]
    pub estimated_volume: Option<Decimal>,

    /// Special instructions for the driver.
    #[arg(long)]
    pub instructions: Option<String>,

    /// Normal, HotShot or Emergency.
    #[arg(long, default_value = "Normal")]
    pub priority: Priority,

    /// Also confirm the ticket, moving it to ASSIGNED.
    #[arg(long)]
    pub confirm: bool,

    /// Create one ticket per row of a CSV file.
    #[arg(
        long,
        value_name = "CSV",
        conflicts_with_all = ["customer", "origin", "destination", "product", "driver", "truck", "trailer", "estimated_volume", "instructions"]
    )]
    pub batch: Option<PathBuf>,
}

impl CreateArgs {
    fn job(&self) -> JobDetails {
        JobDetails {
            customer: self.customer.clone().unwrap_or_default(),
            origin: self.origin.clone().unwrap_or_default(),
            destination: self.destination.clone().unwrap_or_default(),
            product: self.product.clone().unwrap_or_default(),
            driver: self.driver.clone().unwrap_or_default(),
            truck: self.truck.clone().unwrap_or_default(),
            trailer: self.trailer.clone(),
            estimated_volume: self.estimated_volume,
            instructions: self.instructions.clone(),
            priority: self.priority,
        }
    }
}

pub fn run_create(args: &CreateArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = Project::open(project_root, output)?;
    if let Some(path) = &args.batch {
        return run_batch(&project, path, args.confirm, output);
    }

    let lifecycle = &project.lifecycle;
    let (mut ticket, mut warnings) = settle(lifecycle.create(args.job()), output)?;
    if args.confirm {
        let (confirmed, more) = settle(lifecycle.confirm_creation(&ticket.id), output)?;
        ticket = confirmed;
        warnings.extend(more);
    }
    render_ticket(output, &ticket, &warnings, lifecycle.tz())
}

// ── Batch ────────────────────────────────────────────────────────────────

/// Columns of a batch file. Only the first six are required.
pub const BATCH_COLUMNS: [&str; 10] = [
    "customer",
    "from_lsd",
    "to_lsd",
    "product",
    "driver",
    "truck",
    "trailer",
    "est_volume",
    "special_instructions",
    "priority",
];

const REQUIRED_COLUMNS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Created,
    Failed,
}

/// Outcome of one CSV row. Row numbers count data rows from 1.
#[derive(Debug, Serialize)]
pub struct RowResult {
    pub row: usize,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Issue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Issue>,
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub file: String,
    pub created: usize,
    pub failed: usize,
    pub rows: Vec<RowResult>,
}

fn run_batch(project: &Project, path: &Path, confirm: bool, output: OutputMode) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file {}", path.display()))?;
    let rows = match parse_batch(&text) {
        Ok(rows) => rows,
        Err(err) => return fail(output, &err),
    };

    // One writer allocates the whole batch so its ids stay contiguous.
    let _lock = project.lock(output)?;
    let mut report = BatchReport {
        file: path.display().to_string(),
        created: 0,
        failed: 0,
        rows: Vec::with_capacity(rows.len()),
    };
    for (index, row) in rows.into_iter().enumerate() {
        let result = match row {
            Ok(job) => create_row(&project.lifecycle, index + 1, job, confirm)?,
            Err(errors) => RowResult {
                row: index + 1,
                status: RowStatus::Failed,
                ticket: None,
                stage: None,
                error_code: Some(ErrorCode::InvalidFieldValue.code()),
                errors,
                warnings: Vec::new(),
            },
        };
        match result.status {
            RowStatus::Created => report.created += 1,
            RowStatus::Failed => report.failed += 1,
        }
        report.rows.push(result);
    }
    tracing::info!(created = report.created, failed = report.failed, "batch creation finished");

    render_mode(output, &report, render_batch_text, render_batch_pretty)?;
    if report.created == 0 && report.failed > 0 {
        anyhow::bail!("no ticket in {} was created", report.file);
    }
    Ok(())
}

fn create_row(
    lifecycle: &Lifecycle,
    row: usize,
    job: JobDetails,
    confirm: bool,
) -> anyhow::Result<RowResult> {
    let failed = |code: ErrorCode, errors: Vec<Issue>, ticket: Option<TicketId>| RowResult {
        row,
        status: RowStatus::Failed,
        stage: ticket.as_ref().map(|_| Stage::Pending),
        ticket,
        error_code: Some(code.code()),
        errors,
        warnings: Vec::new(),
    };

    let (ticket, mut warnings) = match lifecycle.create(job)? {
        Outcome::Applied { value, warnings } => (value, warnings),
        Outcome::Rejected { rejection } => {
            return Ok(failed(rejection.code(), rejection.issues(), None));
        }
    };

    let mut stage = ticket.stage;
    if confirm {
        match lifecycle.confirm_creation(&ticket.id)? {
            Outcome::Applied {
                value,
                warnings: more,
            } => {
                stage = value.stage;
                warnings.extend(more);
            }
            // The ticket exists; report it as left PENDING.
            Outcome::Rejected { rejection } => {
                return Ok(failed(rejection.code(), rejection.issues(), Some(ticket.id)));
            }
        }
    }

    Ok(RowResult {
        row,
        status: RowStatus::Created,
        ticket: Some(ticket.id),
        stage: Some(stage),
        error_code: None,
        errors: Vec::new(),
        warnings,
    })
}

fn render_batch_text(report: &BatchReport, w: &mut dyn Write) -> std::io::Result<()> {
    for row in &report.rows {
        match row.status {
            RowStatus::Created => writeln!(
                w,
                "row {}  created  {}",
                row.row,
                row.ticket.as_ref().map_or("-", TicketId::as_str)
            )?,
            RowStatus::Failed => {
                let reasons: Vec<String> = row.errors.iter().map(ToString::to_string).collect();
                writeln!(w, "row {}  failed  {}", row.row, reasons.join("; "))?;
            }
        }
    }
    writeln!(w, "created={} failed={}", report.created, report.failed)
}

fn render_batch_pretty(report: &BatchReport, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, &format!("Batch {}", report.file))?;
    for row in &report.rows {
        match (&row.status, &row.ticket) {
            (RowStatus::Created, Some(id)) => {
                writeln!(w, "  row {:>3}  ✓ {id}", row.row)?;
            }
            _ => {
                writeln!(w, "  row {:>3}  ✗ failed", row.row)?;
                for issue in &row.errors {
                    writeln!(w, "             {}: {}", issue.field, issue.message)?;
                }
            }
        }
        for warning in &row.warnings {
            writeln!(w, "             warning: {}: {}", warning.field, warning.message)?;
        }
    }
    writeln!(w)?;
    pretty_kv(w, "Created", report.created.to_string())?;
    pretty_kv(w, "Failed", report.failed.to_string())
}

/// Parse a batch file into one job (or list of row errors) per data row.
///
/// A missing required column fails the whole file; everything else is
/// reported against its row.
pub fn parse_batch(text: &str) -> Result<Vec<Result<JobDetails, Vec<Issue>>>, CliError> {
    let mut records = read_records(text).into_iter();
    let Some(header) = records.next() else {
        return Err(CliError::coded(ErrorCode::InvalidFieldValue, "batch file is empty"));
    };

    let columns: Vec<Option<usize>> = BATCH_COLUMNS
        .iter()
        .map(|name| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        })
        .collect();
    let missing: Vec<Issue> = BATCH_COLUMNS[..REQUIRED_COLUMNS]
        .iter()
        .zip(&columns)
        .filter(|(_, index)| index.is_none())
        .map(|(name, _)| Issue {
            field: (*name).to_string(),
            message: "required column missing from header".to_string(),
        })
        .collect();
    if !missing.is_empty() {
        let mut error = CliError::coded(ErrorCode::InvalidFieldValue, "batch header is incomplete");
        error.issues = missing;
        return Err(error);
    }

    Ok(records
        .filter(|record| record.iter().any(|cell| !cell.trim().is_empty()))
        .map(|record| {
            let cell = |column: usize| {
                columns[column]
                    .and_then(|index| record.get(index))
                    .map_or("", |value| value.trim())
            };
            row_job(cell)
        })
        .collect())
}

fn row_job<'a>(cell: impl Fn(usize) -> &'a str) -> Result<JobDetails, Vec<Issue>> {
    let optional = |value: &str| (!value.is_empty()).then(|| value.to_string());
    let mut errors = Vec::new();

    let estimated_volume = match cell(7) {
        "" => None,
        raw => match Decimal::from_str(raw) {
            Ok(volume) => Some(volume),
            Err(_) => {
                errors.push(Issue {
                    field: "est_volume".to_string(),
                    message: format!("'{raw}' is not a number"),
                });
                None
            }
        },
    };
    let priority = match cell(9) {
        "" => Priority::Normal,
        raw => raw.parse().unwrap_or_else(|err: ticketdrop_core::model::ParseEnumError| {
            errors.push(Issue {
                field: "priority".to_string(),
                message: err.to_string(),
            });
            Priority::Normal
        }),
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(JobDetails {
        customer: cell(0).to_string(),
        origin: cell(1).to_string(),
        destination: cell(2).to_string(),
        product: cell(3).to_string(),
        driver: cell(4).to_string(),
        truck: cell(5).to_string(),
        trailer: optional(cell(6)),
        estimated_volume,
        instructions: optional(cell(8)),
        priority,
    })
}

/// Split CSV text into records of unquoted fields. Handles quoted fields
/// with embedded commas, doubled quotes and line breaks, and both LF and
/// CRLF terminators.
fn read_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.trim_start_matches('\u{feff}').chars().peekable();

    while let Some(c) = chars.next() {
        match (quoted, c) {
            (true, '"') if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            (true, '"') => quoted = false,
            (true, c) => field.push(c),
            (false, '"') if field.is_empty() => quoted = true,
            (false, ',') => record.push(std::mem::take(&mut field)),
            (false, '\r') if chars.peek() == Some(&'\n') => {}
            (false, '\n') => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            (false, c) => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "customer,from_lsd,to_lsd,product,driver,truck,trailer,est_volume,special_instructions,priority";

    #[test]
    fn create_args_require_job_fields_without_batch() {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: CreateArgs,
        }
        assert!(Wrapper::try_parse_from(["test", "--customer", "Spur"]).is_err());

        let w = Wrapper::parse_from(["test", "--batch", "jobs.csv"]);
        assert_eq!(w.args.batch, Some(PathBuf::from("jobs.csv")));
        assert_eq!(w.args.priority, Priority::Normal);

        let w = Wrapper::parse_from([
            "test", "--customer", "Spur", "--from", "10-15-052-20W4", "--to", "Rimbey Lease",
            "--product", "Crude Oil", "--driver", "Brant Fandrey", "--truck", "Unit 7",
            "--volume", "85.5",
        ]);
        let job = w.args.job();
        assert_eq!(job.origin, "10-15-052-20W4");
        assert_eq!(job.estimated_volume, Some(Decimal::new(855, 1)));
        assert_eq!(job.trailer, None);
    }

    #[test]
    fn quoted_fields_keep_commas_quotes_and_newlines() {
        let records = read_records("a,\"b, c\",\"say \"\"hi\"\"\"\r\n\"multi\nline\",x,\n");
        assert_eq!(
            records,
            vec![
                vec!["a".to_string(), "b, c".to_string(), "say \"hi\"".to_string()],
                vec!["multi\nline".to_string(), "x".to_string(), String::new()],
            ]
        );
    }

    #[test]
    fn rows_map_by_header_name_and_report_row_errors() {
        let text = format!(
            "{HEADER}\n\
             Spur Petroleum Corp,10-15-052-20W4,Rimbey Lease,Crude Oil,Brant Fandrey,Unit 7,,85,,HotShot\n\
             \n\
             Spur Petroleum Corp,10-15-052-20W4,Rimbey Lease,Crude Oil,Brant Fandrey,Unit 7,T-1,lots,,Whenever\n"
        );
        let rows = parse_batch(&text).unwrap();
        assert_eq!(rows.len(), 2);

        let job = rows[0].as_ref().unwrap();
        assert_eq!(job.customer, "Spur Petroleum Corp");
        assert_eq!(job.priority, Priority::HotShot);
        assert_eq!(job.estimated_volume, Some(Decimal::from(85)));

        let errors = rows[1].as_ref().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, ["est_volume", "priority"]);
    }

    #[test]
    fn optional_columns_may_be_left_out() {
        let text = "truck,driver,product,to_lsd,from_lsd,customer\n\
                    Unit 7,Brant Fandrey,Crude Oil,Rimbey Lease,10-15-052-20W4,Spur Petroleum Corp\n";
        let rows = parse_batch(text).unwrap();
        let job = rows[0].as_ref().unwrap();
        assert_eq!(job.truck, "Unit 7");
        assert_eq!(job.origin, "10-15-052-20W4");
        assert_eq!(job.instructions, None);
    }

    #[test]
    fn missing_required_column_rejects_the_file() {
        let err = parse_batch("customer,from_lsd,to_lsd,product,driver\n").unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].field, "truck");
    }
}
