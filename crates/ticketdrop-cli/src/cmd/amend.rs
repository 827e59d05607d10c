//! `td amend`: reviewed correction of dispatch fields on an ASSIGNED ticket.

use crate::cmd::{deltas_or_fail, render_ticket};
use crate::output::OutputMode;
use crate::project::{Project, parse_id, settle};
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct AmendArgs {
    /// Ticket id (YYMMDDNNN).
    pub id: String,

    /// Person approving the amendment; recorded in the audit trail.
    #[arg(long)]
    pub reviewer: String,

    /// Field assignments such as `truck="Unit 7"`.
    #[arg(required = true, value_name = "FIELD=VALUE")]
    pub set: Vec<String>,
}

pub fn run_amend(args: &AmendArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let id = parse_id(&args.id, output)?;
    let project = Project::open(project_root, output)?;
    let lifecycle = &project.lifecycle;
    let deltas = deltas_or_fail(&args.set, lifecycle.tz(), output)?;
    let (ticket, warnings) = settle(lifecycle.amend(&id, &deltas, &args.reviewer), output)?;
    render_ticket(output, &ticket, &warnings, lifecycle.tz())
}
