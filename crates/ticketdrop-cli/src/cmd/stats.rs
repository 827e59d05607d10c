//! `td stats`: dashboard counts.

use crate::output::{CliError, OutputMode, fail, pretty_kv, pretty_section, render_mode};
use crate::project::{Project, infra};
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use ticketdrop_core::lifecycle::Stats;

#[derive(Args, Debug)]
pub struct StatsArgs {}

#[derive(Debug, Serialize)]
struct Dashboard {
    #[serde(flatten)]
    tickets: Stats,
    queue_pending: usize,
    queue_failed: usize,
}

pub fn run_stats(_args: &StatsArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = Project::open(project_root, output)?;
    let tickets = match project.lifecycle.stats() {
        Ok(stats) => stats,
        Err(err) => return infra(&err, output),
    };
    let queue = project.queue(output)?;
    let counts = queue
        .pending()
        .and_then(|pending| queue.failed().map(|failed| (pending.len(), failed.len())));
    let (queue_pending, queue_failed) = match counts {
        Ok(counts) => counts,
        Err(err) => return fail(output, &CliError::coded(err.code(), err.to_string())),
    };
    let dashboard = Dashboard {
        tickets,
        queue_pending,
        queue_failed,
    };

    render_mode(
        output,
        &dashboard,
        |d, w| {
            let stages: Vec<String> = d
                .tickets
                .by_stage
                .iter()
                .map(|(stage, n)| format!("{}={n}", stage.to_ascii_lowercase()))
                .collect();
            writeln!(
                w,
                "total={} {} unexported={} queue_pending={} queue_failed={}",
                d.tickets.total,
                stages.join(" "),
                d.tickets.unexported_completed,
                d.queue_pending,
                d.queue_failed
            )
        },
        |d, w| {
            pretty_section(w, "Tickets")?;
            pretty_kv(w, "Total", d.tickets.total.to_string())?;
            for (stage, n) in &d.tickets.by_stage {
                pretty_kv(w, stage, n.to_string())?;
            }
            writeln!(w)?;
            pretty_section(w, "Partitions")?;
            for (partition, n) in &d.tickets.by_partition {
                pretty_kv(w, partition, n.to_string())?;
            }
            writeln!(w)?;
            pretty_section(w, "Billing and sync")?;
            pretty_kv(w, "Awaiting export", d.tickets.unexported_completed.to_string())?;
            pretty_kv(w, "Queued updates", d.queue_pending.to_string())?;
            pretty_kv(w, "Failed updates", d.queue_failed.to_string())
        },
    )
}
