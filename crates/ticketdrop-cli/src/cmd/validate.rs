//! `td validate`: run the stage-gated rule sets without changing anything.

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::project::{Project, infra, parse_id, settle};
use clap::Args;
use std::io::{self, Write};
use std::path::Path;
use ticketdrop_core::lifecycle::{StageReport, TicketIssues};
use ticketdrop_core::validate::{ValidationReport, ValidationStage};

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("target").required(true).args(["id", "stage", "report"])))]
pub struct ValidateArgs {
    /// Validate one ticket with the rules its stage implies.
    pub id: Option<String>,

    /// Validate every ticket a rule set applies to: creation, completion
    /// or export.
    #[arg(long)]
    pub stage: Option<ValidationStage>,

    /// Combined report over all three rule sets.
    #[arg(long)]
    pub report: bool,
}

fn write_ticket_issues(w: &mut dyn Write, label: &str, entries: &[TicketIssues]) -> io::Result<()> {
    for entry in entries {
        for issue in &entry.issues {
            writeln!(w, "  {label} {}  {}: {}", entry.ticket, issue.field, issue.message)?;
        }
    }
    Ok(())
}

fn write_stage_report(w: &mut dyn Write, report: &StageReport, pretty: bool) -> io::Result<()> {
    if pretty {
        pretty_section(w, &format!("{} rules", report.stage))?;
        pretty_kv(w, "Tickets", report.total.to_string())?;
        pretty_kv(w, "Passed", report.passed.len().to_string())?;
        pretty_kv(w, "Failed", report.failed.len().to_string())?;
    } else {
        writeln!(
            w,
            "{}  total={} passed={} failed={} warned={}",
            report.stage,
            report.total,
            report.passed.len(),
            report.failed.len(),
            report.warnings.len()
        )?;
    }
    write_ticket_issues(w, "error", &report.failed)?;
    write_ticket_issues(w, "warning", &report.warnings)?;
    if pretty {
        writeln!(w)?;
    }
    Ok(())
}

fn write_ticket_report(w: &mut dyn Write, report: &ValidationReport) -> io::Result<()> {
    let verdict = if report.is_valid() { "valid" } else { "invalid" };
    writeln!(w, "{} rules: {verdict}", report.stage)?;
    for issue in &report.errors {
        writeln!(w, "  error    {}: {}", issue.field, issue.message)?;
    }
    for issue in &report.warnings {
        writeln!(w, "  warning  {}: {}", issue.field, issue.message)?;
    }
    Ok(())
}

/// Fails when anything validated has errors, after printing the report.
pub fn run_validate(args: &ValidateArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = Project::open(project_root, output)?;
    let lifecycle = &project.lifecycle;

    if let Some(raw) = &args.id {
        let id = parse_id(raw, output)?;
        let (report, _) = settle(lifecycle.validate(&id), output)?;
        render_mode(
            output,
            &report,
            |r, w| write_ticket_report(w, r),
            |r, w| write_ticket_report(w, r),
        )?;
        if !report.is_valid() {
            anyhow::bail!("ticket {id} failed {} validation", report.stage);
        }
        return Ok(());
    }

    let reports = match args.stage {
        Some(stage) => lifecycle.validate_stage(stage).map(|report| vec![report]),
        None => lifecycle.validation_report(),
    };
    let reports = match reports {
        Ok(reports) => reports,
        Err(err) => return infra(&err, output),
    };

    render_mode(
        output,
        &reports,
        |rs, w| rs.iter().try_for_each(|r| write_stage_report(w, r, false)),
        |rs, w| rs.iter().try_for_each(|r| write_stage_report(w, r, true)),
    )?;
    let failed: usize = reports.iter().map(|r| r.failed.len()).sum();
    if failed > 0 {
        anyhow::bail!("{failed} ticket(s) failed validation");
    }
    Ok(())
}
