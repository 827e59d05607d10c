//! `td complete`: apply final field values and close the job.

use crate::cmd::{deltas_or_fail, render_ticket};
use crate::output::OutputMode;
use crate::project::{Project, parse_id, settle};
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct CompleteArgs {
    /// Ticket id (YYMMDDNNN).
    pub id: String,

    /// Last field values to record before completing, if any.
    #[arg(value_name = "FIELD=VALUE")]
    pub set: Vec<String>,
}

/// Nothing is written unless the ticket passes completion validation with
/// the given values applied.
pub fn run_complete(args: &CompleteArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let id = parse_id(&args.id, output)?;
    let project = Project::open(project_root, output)?;
    let lifecycle = &project.lifecycle;
    let deltas = deltas_or_fail(&args.set, lifecycle.tz(), output)?;
    let (ticket, warnings) = settle(lifecycle.complete(&id, &deltas), output)?;
    render_ticket(output, &ticket, &warnings, lifecycle.tz())
}
