//! `td export`: write a billing CSV of completed tickets and record the batch.

use crate::output::{CliError, OutputMode, fail, pretty_kv, pretty_section, render_mode};
use crate::project::{Project, parse_ids};
use anyhow::Context as _;
use chrono::NaiveDate;
use clap::Args;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use ticketdrop_core::export::{
    CommitReport, CommitStatus, ExportError, ExportFormatter, ExportRequest, SkippedTicket,
    default_file_name, write_csv,
};
use ticketdrop_core::model::TicketId;
use ticketdrop_core::store::TicketFilter;

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Export every completed ticket not yet exported.
    #[arg(long)]
    pub all: bool,

    /// Created on or after this date (YYYY-MM-DD).
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Created on or before this date (YYYY-MM-DD).
    #[arg(long)]
    pub to: Option<NaiveDate>,

    #[arg(long)]
    pub customer: Option<String>,

    /// Export only these tickets. Repeatable.
    #[arg(long = "ticket", value_name = "ID")]
    pub tickets: Vec<String>,

    /// Include tickets that were already exported; their fields are
    /// recomputed from the current ticket.
    #[arg(long)]
    pub force: bool,

    /// Write the file without marking tickets exported.
    #[arg(long)]
    pub no_mark: bool,

    /// Output file. Defaults to `TicketDrop_Export_<local time>.csv` in the
    /// configured export directory.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ExportOutcome {
    batch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    tickets: Vec<TicketId>,
    skipped: Vec<SkippedTicket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<CommitReport>,
}

fn write_skipped(w: &mut dyn Write, skipped: &[SkippedTicket], indent: &str) -> io::Result<()> {
    for entry in skipped {
        for issue in &entry.issues {
            writeln!(w, "{indent}{}  {}: {}", entry.ticket, issue.field, issue.message)?;
        }
    }
    Ok(())
}

fn write_text(o: &ExportOutcome, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}  records={} skipped={} file={}",
        o.batch_id,
        o.tickets.len(),
        o.skipped.len(),
        o.file.as_deref().unwrap_or("-")
    )?;
    write_skipped(w, &o.skipped, "skipped ")?;
    if let Some(commit) = &o.commit {
        writeln!(w, "marked={} failed={}", commit.marked.len(), commit.failed.len())?;
        write_skipped(w, &commit.failed, "unmarked ")?;
    }
    Ok(())
}

fn write_pretty(o: &ExportOutcome, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Export {}", o.batch_id))?;
    pretty_kv(w, "File", o.file.as_deref().unwrap_or("(nothing to export)"))?;
    pretty_kv(w, "Records", o.tickets.len().to_string())?;
    if !o.skipped.is_empty() {
        pretty_kv(w, "Skipped", o.skipped.len().to_string())?;
        write_skipped(w, &o.skipped, "  ")?;
    }
    match &o.commit {
        Some(commit) if commit.status == CommitStatus::Complete => {
            pretty_kv(w, "Marked exported", commit.marked.len().to_string())?;
        }
        Some(commit) => {
            pretty_kv(
                w,
                "Marked exported",
                format!("{} of {}", commit.marked.len(), o.tickets.len()),
            )?;
            write_skipped(w, &commit.failed, "  ")?;
        }
        None if !o.tickets.is_empty() => pretty_kv(w, "Marked exported", "no (--no-mark)")?,
        None => {}
    }
    Ok(())
}

impl ExportArgs {
    fn request(&self, tickets: Vec<TicketId>) -> ExportRequest {
        ExportRequest {
            filter: TicketFilter {
                date_from: self.from,
                date_to: self.to,
                customer: self.customer.clone(),
                ids: tickets,
                ..TicketFilter::default()
            },
            all: self.all,
            force: self.force,
        }
    }
}

/// Tickets failing export validation are itemized as skipped. The CSV is
/// written in full before any ticket is marked; a batch where some tickets
/// could not be marked is reported and fails the command.
pub fn run_export(args: &ExportArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let tickets = parse_ids(&args.tickets, output)?;
    let project = Project::open(project_root, output)?;
    let lifecycle = &project.lifecycle;
    let formatter = ExportFormatter::new(Arc::clone(lifecycle), project.config.dispatch.company.clone());

    let _lock = project.lock(output)?;
    let batch = match formatter.build_batch(&args.request(tickets)) {
        Ok(batch) => batch,
        Err(err) => {
            let mut error = CliError::coded(err.code(), err.to_string());
            if matches!(err, ExportError::Unscoped) {
                error.suggestion =
                    Some("Pass --all, or narrow with --from/--to/--customer/--ticket.".to_string());
            }
            return fail(output, &error);
        }
    };

    let mut file = None;
    let mut commit = None;
    if !batch.records.is_empty() {
        let path = args.output.clone().unwrap_or_else(|| {
            project
                .paths
                .exports(&project.config.export)
                .join(default_file_name(batch.created_at, lifecycle.tz()))
        });
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let handle = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(handle);
        write_csv(&batch.records, &mut writer)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        writer
            .into_inner()
            .map_err(io::IntoInnerError::into_error)?
            .sync_all()
            .with_context(|| format!("Failed to sync {}", path.display()))?;
        tracing::info!(batch = %batch.batch_id, file = %path.display(), "export file written");

        file = Some(path.display().to_string());
        if !args.no_mark {
            commit = Some(formatter.commit(&batch));
        }
    }

    let partial = commit.as_ref().and_then(CommitReport::code);
    let outcome = ExportOutcome {
        batch_id: batch.batch_id,
        file,
        tickets: batch.tickets,
        skipped: batch.skipped,
        commit,
    };
    render_mode(output, &outcome, write_text, write_pretty)?;

    if let Some(code) = partial {
        return fail(output, &CliError::from(code));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_args_build_a_scoped_request() {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: ExportArgs,
        }
        let w = Wrapper::parse_from(["test", "--customer", "Spur", "--ticket", "260101001", "--force"]);
        let ids = vec!["260101001".parse::<TicketId>().unwrap()];
        let request = w.args.request(ids.clone());
        assert!(!request.all);
        assert!(request.force);
        assert_eq!(request.filter.ids, ids);
        assert!(!request.filter.is_unscoped());

        let w = Wrapper::parse_from(["test"]);
        assert!(w.args.request(Vec::new()).filter.is_unscoped());
    }
}
