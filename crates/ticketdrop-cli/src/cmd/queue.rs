//! `td queue`: offline field updates, queued and replayed later.

use crate::cmd::{deltas_or_fail, local};
use crate::output::{CliError, OutputMode, fail, pretty_kv, pretty_section, render_mode};
use crate::project::{Project, parse_id};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use ticketdrop_core::error::ErrorCode;
use ticketdrop_core::queue::{ApplyResult, OfflineQueue, QueueEntry, QueueError, spawn_drain_worker};

#[derive(Args, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommand,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// Queue field updates captured while offline.
    Enqueue(EnqueueArgs),
    /// Replay every due entry now, or keep draining in the background.
    Drain(DrainArgs),
    /// Entries waiting to be applied.
    List,
    /// Entries that exhausted their retries and need manual reconciliation.
    Failed,
}

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Ticket id (YYMMDDNNN).
    pub id: String,

    /// Field assignments, as for `td update`.
    #[arg(required = true, value_name = "FIELD=VALUE")]
    pub set: Vec<String>,

    /// When the client captured the values (RFC 3339). Defaults to now.
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,

    /// Complete the ticket once these values apply.
    #[arg(long)]
    pub complete: bool,
}

#[derive(Args, Debug)]
pub struct DrainArgs {
    /// Run the background drain loop for this many seconds instead of a
    /// single pass.
    #[arg(long, value_name = "SECS")]
    pub watch: Option<u64>,
}

pub fn run_queue(args: &QueueArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = Project::open(project_root, output)?;
    let queue = project.queue(output)?;
    let tz = project.lifecycle.tz();
    match &args.command {
        QueueCommand::Enqueue(enqueue) => run_enqueue(&queue, enqueue, tz, output),
        QueueCommand::Drain(drain) => match drain.watch {
            Some(secs) => run_watch(queue, project.drain_interval(), Duration::from_secs(secs), output),
            None => run_drain(&queue, output),
        },
        QueueCommand::List => {
            let entries = queue.pending().or_else(|err| queue_failure(&err, output))?;
            render_entries(&entries, tz, output)
        }
        QueueCommand::Failed => {
            let entries = queue.failed().or_else(|err| queue_failure(&err, output))?;
            render_entries(&entries, tz, output)
        }
    }
}

fn queue_failure<T>(err: &QueueError, output: OutputMode) -> anyhow::Result<T> {
    fail(output, &CliError::coded(err.code(), err.to_string()))
}

fn run_enqueue(queue: &OfflineQueue, args: &EnqueueArgs, tz: Tz, output: OutputMode) -> anyhow::Result<()> {
    let id = parse_id(&args.id, output)?;
    let deltas = deltas_or_fail(&args.set, tz, output)?;
    let client_ts = args.at.unwrap_or_else(|| queue.lifecycle().now());
    let result = if args.complete {
        queue.enqueue_completion(id, deltas, client_ts)
    } else {
        queue.enqueue(id, deltas, client_ts)
    };
    let entry = result.or_else(|err| queue_failure(&err, output))?;
    render_mode(
        output,
        &entry,
        |e, w| writeln!(w, "queued {}  {}  {}", e.id, e.ticket_id, e.intent.as_str()),
        |e, w| {
            writeln!(w, "Queued entry {} for ticket {}", e.id, e.ticket_id)?;
            pretty_kv(w, "Intent", e.intent.as_str())?;
            pretty_kv(w, "Fields", e.deltas.len().to_string())?;
            pretty_kv(w, "Captured", local(e.client_ts, tz))
        },
    )
}

#[derive(Debug, Default, Serialize)]
struct DrainReport {
    applied: usize,
    conflicts: usize,
    retrying: usize,
    failed: usize,
    results: Vec<ApplyResult>,
}

impl DrainReport {
    fn new(results: Vec<ApplyResult>) -> Self {
        let mut report = Self::default();
        for result in &results {
            match result {
                ApplyResult::Applied { .. } => report.applied += 1,
                ApplyResult::Conflict { .. } => report.conflicts += 1,
                ApplyResult::Retrying { .. } => report.retrying += 1,
                ApplyResult::PermanentFailure { .. } => report.failed += 1,
            }
        }
        report.results = results;
        report
    }
}

fn write_drain(report: &DrainReport, w: &mut dyn Write, pretty: bool) -> io::Result<()> {
    if pretty {
        pretty_section(w, "Offline queue drain")?;
    }
    for result in &report.results {
        writeln!(w, "{}{result}", if pretty { "  " } else { "" })?;
    }
    writeln!(
        w,
        "applied={} conflicts={} retrying={} failed={}",
        report.applied, report.conflicts, report.retrying, report.failed
    )
}

fn run_drain(queue: &OfflineQueue, output: OutputMode) -> anyhow::Result<()> {
    let now = queue.lifecycle().now();
    let results = queue.drain(now).or_else(|err| queue_failure(&err, output))?;
    let report = DrainReport::new(results);
    render_mode(
        output,
        &report,
        |r, w| write_drain(r, w, false),
        |r, w| write_drain(r, w, true),
    )?;
    if report.failed > 0 {
        return fail(output, &CliError::from(ErrorCode::ReconciliationFailed));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct WatchReport {
    passes: u64,
    pending: usize,
    failed: usize,
}

fn run_watch(
    queue: OfflineQueue,
    interval: Duration,
    duration: Duration,
    output: OutputMode,
) -> anyhow::Result<()> {
    let queue = Arc::new(queue);
    let worker = spawn_drain_worker(Arc::clone(&queue), interval)?;
    std::thread::sleep(duration);
    let passes = worker.passes();
    worker.stop();

    let report = WatchReport {
        passes,
        pending: queue.pending().or_else(|err| queue_failure(&err, output))?.len(),
        failed: queue.failed().or_else(|err| queue_failure(&err, output))?.len(),
    };
    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "passes={} pending={} failed={}", r.passes, r.pending, r.failed),
        |r, w| {
            pretty_section(w, "Offline queue drain")?;
            pretty_kv(w, "Passes", r.passes.to_string())?;
            pretty_kv(w, "Still pending", r.pending.to_string())?;
            pretty_kv(w, "Failed", r.failed.to_string())
        },
    )
}

fn write_entries(entries: &[QueueEntry], w: &mut dyn Write, tz: Tz, pretty: bool) -> io::Result<()> {
    for e in entries {
        if pretty {
            writeln!(
                w,
                "#{:<4} {}  {:<8} {} field(s)  captured {}  attempts {}",
                e.id,
                e.ticket_id,
                e.intent.as_str(),
                e.deltas.len(),
                local(e.client_ts, tz),
                e.attempts
            )?;
            if let Some(error) = &e.last_error {
                writeln!(w, "      last error: {error}")?;
            }
        } else {
            writeln!(
                w,
                "{}  {}  {}  {}  {}  {}",
                e.id,
                e.ticket_id,
                e.intent.as_str(),
                e.attempts,
                e.client_ts.to_rfc3339(),
                e.last_error.as_deref().unwrap_or("-")
            )?;
        }
    }
    Ok(())
}

fn render_entries(entries: &[QueueEntry], tz: Tz, output: OutputMode) -> anyhow::Result<()> {
    if entries.is_empty() && !output.is_json() {
        eprintln!("queue is empty");
    }
    render_mode(
        output,
        &entries,
        |es, w| write_entries(es, w, tz, false),
        |es, w| write_entries(es, w, tz, true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: QueueArgs,
    }

    #[test]
    fn queue_subcommands_parse() {
        let w = Wrapper::parse_from([
            "test",
            "enqueue",
            "260101001",
            "arrive_origin=2026-01-01T15:00:00Z",
            "--at",
            "2026-01-01T15:00:05Z",
            "--complete",
        ]);
        let QueueCommand::Enqueue(args) = w.args.command else {
            panic!("expected enqueue");
        };
        assert!(args.complete);
        assert_eq!(args.at, Some("2026-01-01T15:00:05Z".parse().unwrap()));

        let w = Wrapper::parse_from(["test", "drain", "--watch", "2"]);
        assert!(matches!(w.args.command, QueueCommand::Drain(DrainArgs { watch: Some(2) })));
        assert!(matches!(Wrapper::parse_from(["test", "failed"]).args.command, QueueCommand::Failed));
    }
}
