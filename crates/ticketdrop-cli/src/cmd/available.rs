//! `td available`: is a driver or truck free for a new assignment?

use crate::output::{OutputMode, pretty_kv, render_mode};
use crate::project::{Project, infra};
use clap::Args;
use std::io::{self, Write};
use std::path::Path;
use ticketdrop_core::lifecycle::{Availability, ResourceStatus};
use ticketdrop_core::model::TicketId;

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("resource").required(true).multiple(true).args(["driver", "truck"])))]
pub struct AvailableArgs {
    #[arg(long)]
    pub driver: Option<String>,

    #[arg(long)]
    pub truck: Option<String>,
}

fn busy_list(status: &ResourceStatus) -> String {
    status
        .busy_with
        .iter()
        .map(TicketId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_status(w: &mut dyn Write, status: &ResourceStatus, pretty: bool) -> io::Result<()> {
    let state = if status.available { "available" } else { "busy" };
    if pretty {
        let mut line = state.to_string();
        if !status.available {
            line.push_str(&format!(" on {}", busy_list(status)));
        }
        if !status.known {
            line.push_str(" (not in reference list)");
        }
        pretty_kv(w, &format!("{} {}", status.kind, status.name), line)
    } else {
        writeln!(w, "{}  {}  {}  {}", status.kind, status.name, state, busy_list(status))
    }
}

fn write_availability(w: &mut dyn Write, availability: &Availability, pretty: bool) -> io::Result<()> {
    for status in [&availability.driver, &availability.truck].into_iter().flatten() {
        write_status(w, status, pretty)?;
    }
    Ok(())
}

/// Busy means assigned to an ASSIGNED or IN_PROGRESS ticket.
pub fn run_available(args: &AvailableArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = Project::open(project_root, output)?;
    let availability = match project
        .lifecycle
        .check_availability(args.driver.as_deref(), args.truck.as_deref())
    {
        Ok(availability) => availability,
        Err(err) => return infra(&err, output),
    };
    render_mode(
        output,
        &availability,
        |a, w| write_availability(w, a, false),
        |a, w| write_availability(w, a, true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_driver_or_truck() {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: AvailableArgs,
        }
        assert!(Wrapper::try_parse_from(["test"]).is_err());
        let w = Wrapper::parse_from(["test", "--truck", "Unit 7"]);
        assert_eq!(w.args.truck.as_deref(), Some("Unit 7"));
        assert!(w.args.driver.is_none());
    }
}
