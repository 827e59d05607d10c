//! `td list`: list tickets with filtering.

use crate::output::{OutputMode, Renderable, render_list};
use crate::project::{Project, infra};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use std::io::{self, Write};
use std::path::Path;
use ticketdrop_core::model::{Stage, Ticket};
use ticketdrop_core::store::TicketFilter;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter by stage: pending, assigned, in_progress, completed, exported.
    #[arg(short, long)]
    pub stage: Option<Stage>,

    /// Created on or after this date (YYYY-MM-DD).
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Created on or before this date (YYYY-MM-DD).
    #[arg(long)]
    pub to: Option<NaiveDate>,

    #[arg(long)]
    pub customer: Option<String>,

    #[arg(long)]
    pub driver: Option<String>,

    #[arg(long)]
    pub truck: Option<String>,

    /// Only tickets changed after this RFC 3339 instant, for polling clients.
    #[arg(long, conflicts_with_all = ["stage", "from", "to", "customer", "driver", "truck"])]
    pub since: Option<DateTime<Utc>>,

    /// Maximum tickets to show.
    #[arg(short = 'n', long, default_value = "50")]
    pub limit: usize,
}

impl ListArgs {
    fn filter(&self) -> TicketFilter {
        TicketFilter {
            stage: self.stage,
            date_from: self.from,
            date_to: self.to,
            customer: self.customer.clone(),
            driver: self.driver.clone(),
            truck: self.truck.clone(),
            ids: Vec::new(),
            limit: Some(self.limit),
        }
    }
}

struct TicketRow<'a>(&'a Ticket);

impl Renderable for TicketRow<'_> {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        let t = self.0;
        writeln!(w, "{}  {:<11} {}", t.id, t.stage.as_str(), t.job.customer)?;
        writeln!(
            w,
            "           {} -> {}  ·  {} / {}",
            t.job.origin, t.job.destination, t.job.driver, t.job.truck
        )
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(&mut *w, self.0).map_err(io::Error::other)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        let t = self.0;
        writeln!(
            w,
            "{}  {}  {}  {}  {}  {}  {}",
            t.id, t.stage, t.job.customer, t.job.origin, t.job.destination, t.job.driver, t.job.truck
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["id", "stage", "customer", "from", "to", "driver", "truck"]
    }
}

pub fn run_list(args: &ListArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = Project::open(project_root, output)?;
    let lifecycle = &project.lifecycle;
    let result = match args.since {
        Some(since) => lifecycle.pull(since).map(|mut tickets| {
            tickets.truncate(args.limit);
            tickets
        }),
        None => lifecycle.list(&args.filter()),
    };
    let tickets = match result {
        Ok(tickets) => tickets,
        Err(err) => return infra(&err, output),
    };

    if tickets.is_empty() && !output.is_json() {
        eprintln!("no tickets found");
    }
    let rows: Vec<TicketRow<'_>> = tickets.iter().map(TicketRow).collect();
    render_list(&rows, output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_args_defaults() {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: ListArgs,
        }
        let w = Wrapper::parse_from(["test"]);
        assert!(w.args.stage.is_none());
        assert_eq!(w.args.limit, 50);
        assert!(w.args.filter().is_unscoped());

        let w = Wrapper::parse_from(["test", "--stage", "in_progress", "--from", "2026-01-01"]);
        assert_eq!(w.args.stage, Some(Stage::InProgress));
        let filter = w.args.filter();
        assert_eq!(filter.date_from, NaiveDate::from_ymd_opt(2026, 1, 1));
        assert!(!filter.is_unscoped());
    }

    #[test]
    fn since_excludes_other_filters() {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: ListArgs,
        }
        assert!(
            Wrapper::try_parse_from(["test", "--since", "2026-01-01T00:00:00Z", "--stage", "assigned"])
                .is_err()
        );
    }
}
