//! `td confirm`: validate a PENDING ticket and move it to ASSIGNED.

use crate::cmd::render_ticket;
use crate::output::OutputMode;
use crate::project::{Project, parse_id, settle};
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct ConfirmArgs {
    /// Ticket id (YYMMDDNNN).
    pub id: String,
}

pub fn run_confirm(args: &ConfirmArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let id = parse_id(&args.id, output)?;
    let project = Project::open(project_root, output)?;
    let lifecycle = &project.lifecycle;
    let (ticket, warnings) = settle(lifecycle.confirm_creation(&id), output)?;
    render_ticket(output, &ticket, &warnings, lifecycle.tz())
}
