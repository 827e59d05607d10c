//! `td show`: full details of one ticket, optionally with its audit trail.

use crate::cmd::{local, write_ticket_line, write_ticket_pretty};
use crate::output::{OutputMode, pretty_section, render_mode};
use crate::project::{Project, infra, parse_id, settle};
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use ticketdrop_core::model::Ticket;
use ticketdrop_core::store::TicketEvent;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Ticket id (YYMMDDNNN).
    pub id: String,

    /// Include the audit trail.
    #[arg(long)]
    pub history: bool,
}

#[derive(Debug, Serialize)]
struct ShowTicket {
    #[serde(flatten)]
    ticket: Ticket,
    #[serde(skip_serializing_if = "Option::is_none")]
    history: Option<Vec<TicketEvent>>,
}

pub fn run_show(args: &ShowArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let id = parse_id(&args.id, output)?;
    let project = Project::open(project_root, output)?;
    let lifecycle = &project.lifecycle;
    let (ticket, _) = settle(lifecycle.get(&id), output)?;
    let history = if args.history {
        match lifecycle.history(&id) {
            Ok(events) => Some(events),
            Err(err) => return infra(&err, output),
        }
    } else {
        None
    };

    let tz = lifecycle.tz();
    let view = ShowTicket { ticket, history };
    render_mode(
        output,
        &view,
        |v, w| {
            write_ticket_line(w, &v.ticket)?;
            for event in v.history.iter().flatten() {
                writeln!(w, "{}  {}  {}  {}", event.at.to_rfc3339(), event.kind, event.actor, event.detail)?;
            }
            Ok(())
        },
        |v, w| {
            write_ticket_pretty(w, &v.ticket, tz)?;
            if let Some(events) = &v.history {
                writeln!(w)?;
                pretty_section(w, "History")?;
                for event in events {
                    writeln!(
                        w,
                        "{}  {:<12} {:<10} {}",
                        local(event.at, tz),
                        event.kind.as_str(),
                        event.actor,
                        event.detail
                    )?;
                }
            }
            Ok(())
        },
    )
}
