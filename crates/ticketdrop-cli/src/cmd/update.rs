//! `td update`: record field-captured values on an ASSIGNED or IN_PROGRESS
//! ticket while connected.

use crate::cmd::{deltas_or_fail, render_ticket};
use crate::output::OutputMode;
use crate::project::{Project, parse_id, settle};
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Ticket id (YYMMDDNNN).
    pub id: String,

    /// Field assignments: timestamps (`arrive_origin="2026-01-01 08:00"`),
    /// `volume=`, `hazard.<item>=yes`, `signature=yes`, `notes=`, `photo=`.
    #[arg(required = true, value_name = "FIELD=VALUE")]
    pub set: Vec<String>,
}

/// The first timestamp moves an ASSIGNED ticket to IN_PROGRESS. All deltas
/// apply together or not at all.
pub fn run_update(args: &UpdateArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let id = parse_id(&args.id, output)?;
    let project = Project::open(project_root, output)?;
    let lifecycle = &project.lifecycle;
    let deltas = deltas_or_fail(&args.set, lifecycle.tz(), output)?;
    let (ticket, warnings) = settle(lifecycle.record_fields(&id, &deltas), output)?;
    render_ticket(output, &ticket, &warnings, lifecycle.tz())
}
