pub mod amend;
pub mod available;
pub mod completions;
pub mod complete;
pub mod confirm;
pub mod create;
pub mod edit;
pub mod export;
pub mod init;
pub mod list;
pub mod queue;
pub mod show;
pub mod stats;
pub mod update;
pub mod validate;

use crate::output::{
    CliError, OutputMode, fail, pretty_kv, pretty_section, render_mode, render_warnings,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::io::{self, Write};
use ticketdrop_core::error::ErrorCode;
use ticketdrop_core::lifecycle::Rejection;
use ticketdrop_core::model::{ExportStatus, FieldDelta, Ticket, format2};
use ticketdrop_core::validate::Issue;

/// A ticket as returned by mutating commands, with non-blocking warnings.
#[derive(Debug, Serialize)]
pub struct TicketResult<'a> {
    #[serde(flatten)]
    pub ticket: &'a Ticket,
    #[serde(skip_serializing_if = "<[Issue]>::is_empty")]
    pub warnings: &'a [Issue],
}

/// `2026-01-01 08:00` in the dispatch zone.
pub fn local(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string()
}

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

/// One-line summary used by text output of single-ticket commands.
pub fn write_ticket_line(w: &mut dyn Write, ticket: &Ticket) -> io::Result<()> {
    writeln!(
        w,
        "{}  {}  {}  {} -> {}  {}  {}",
        ticket.id,
        ticket.stage,
        ticket.job.customer,
        ticket.job.origin,
        ticket.job.destination,
        ticket.job.driver,
        ticket.job.truck
    )
}

/// Full pretty rendering of one ticket.
pub fn write_ticket_pretty(w: &mut dyn Write, ticket: &Ticket, tz: Tz) -> io::Result<()> {
    pretty_section(w, &format!("Ticket {}  [{}]", ticket.id, ticket.stage))?;
    let job = &ticket.job;
    pretty_kv(w, "Customer", &job.customer)?;
    pretty_kv(w, "From", &job.origin)?;
    pretty_kv(w, "To", &job.destination)?;
    pretty_kv(w, "Product", &job.product)?;
    pretty_kv(w, "Driver", &job.driver)?;
    pretty_kv(w, "Truck", &job.truck)?;
    pretty_kv(w, "Trailer", or_dash(job.trailer.as_deref()))?;
    pretty_kv(
        w,
        "Est. volume",
        job.estimated_volume.map_or_else(|| "-".to_string(), |v| v.to_string()),
    )?;
    pretty_kv(w, "Priority", job.priority.as_str())?;
    pretty_kv(w, "Instructions", or_dash(job.instructions.as_deref()))?;
    pretty_kv(w, "Created", local(ticket.created_at, tz))?;

    if ticket.timestamps.any_set() || ticket.stage != ticketdrop_core::model::Stage::Pending {
        writeln!(w)?;
        pretty_section(w, "Field capture")?;
        for (field, at) in ticket.timestamps.iter() {
            pretty_kv(w, field.label(), local(at, tz))?;
        }
        pretty_kv(
            w,
            "Actual volume",
            ticket.actual_volume.map_or_else(|| "-".to_string(), |v| v.to_string()),
        )?;
        pretty_kv(w, "Hazard checks", format!("{}/10", ticket.hazards.checked_count()))?;
        pretty_kv(w, "Signature", if ticket.signature { "yes" } else { "no" })?;
        if !ticket.photos.is_empty() {
            pretty_kv(w, "Photos", ticket.photos.join(", "))?;
        }
        if !ticket.notes.is_empty() {
            pretty_kv(w, "Notes", &ticket.notes)?;
        }
        if let Some(hours) = ticket.hours {
            pretty_kv(w, "Hours", format2(hours))?;
        }
        if let Some(wait) = ticket.wait_time {
            pretty_kv(w, "Wait time", format2(wait))?;
        }
    }

    if let ExportStatus::Exported { at, batch } = &ticket.export {
        writeln!(w)?;
        pretty_kv(w, "Exported", format!("{} ({batch})", local(*at, tz)))?;
    }
    Ok(())
}

/// Render the result of a mutation that returns the updated ticket.
pub fn render_ticket(
    output: OutputMode,
    ticket: &Ticket,
    warnings: &[Issue],
    tz: Tz,
) -> anyhow::Result<()> {
    render_warnings(output, warnings)?;
    let result = TicketResult { ticket, warnings };
    render_mode(
        output,
        &result,
        |r, w| write_ticket_line(w, r.ticket),
        |r, w| write_ticket_pretty(w, r.ticket, tz),
    )
}

/// Split `field=value` assignments and parse each into a delta.
///
/// Every malformed assignment is reported, not just the first.
pub fn parse_assignments(assignments: &[String], tz: Tz) -> Result<Vec<FieldDelta>, CliError> {
    let mut deltas = Vec::with_capacity(assignments.len());
    let mut issues = Vec::new();
    for raw in assignments {
        let Some((field, value)) = raw.split_once('=') else {
            issues.push(Issue {
                field: raw.trim().to_string(),
                message: "expected field=value".to_string(),
            });
            continue;
        };
        match FieldDelta::parse(field, value, tz) {
            Ok(delta) => deltas.push(delta),
            Err(err) => issues.extend(Rejection::from(err).issues()),
        }
    }
    if issues.is_empty() {
        Ok(deltas)
    } else {
        let mut error = CliError::from(ErrorCode::InvalidFieldValue);
        error.issues = issues;
        Err(error)
    }
}

/// [`parse_assignments`], rendering the failure.
pub fn deltas_or_fail(
    assignments: &[String],
    tz: Tz,
    output: OutputMode,
) -> anyhow::Result<Vec<FieldDelta>> {
    parse_assignments(assignments, tz).or_else(|err| fail(output, &err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_parse_in_dispatch_zone() {
        let deltas = parse_assignments(
            &[
                "arrive_origin=2026-01-01 08:00".to_string(),
                "hazard.ppe_used=yes".to_string(),
                "volume=85.5".to_string(),
            ],
            chrono_tz::America::Edmonton,
        )
        .unwrap();
        assert_eq!(deltas.len(), 3);
        assert_eq!(
            deltas[0],
            FieldDelta::ArriveOrigin("2026-01-01T15:00:00Z".parse().unwrap())
        );
    }

    #[test]
    fn every_bad_assignment_is_reported() {
        let err = parse_assignments(
            &[
                "volume".to_string(),
                "colour=red".to_string(),
                "signature=maybe".to_string(),
            ],
            chrono_tz::UTC,
        )
        .unwrap_err();
        assert_eq!(err.error_code.as_deref(), Some(ErrorCode::InvalidFieldValue.code()));
        let fields: Vec<&str> = err.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, ["volume", "colour", "signature"]);
    }
}
