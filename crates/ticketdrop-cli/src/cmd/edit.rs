//! `td edit`: change dispatch fields while a ticket is still PENDING.

use crate::cmd::{deltas_or_fail, render_ticket};
use crate::output::OutputMode;
use crate::project::{Project, parse_id, settle};
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Ticket id (YYMMDDNNN).
    pub id: String,

    /// Field assignments such as `truck="Unit 7"` or `priority=HotShot`.
    #[arg(required = true, value_name = "FIELD=VALUE")]
    pub set: Vec<String>,
}

pub fn run_edit(args: &EditArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let id = parse_id(&args.id, output)?;
    let project = Project::open(project_root, output)?;
    let lifecycle = &project.lifecycle;
    let deltas = deltas_or_fail(&args.set, lifecycle.tz(), output)?;
    let (ticket, warnings) = settle(lifecycle.edit_pending(&id, &deltas), output)?;
    render_ticket(output, &ticket, &warnings, lifecycle.tz())
}
