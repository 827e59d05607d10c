//! Stage-aware validation.
//!
//! [`Validator::validate`] is a pure function of a ticket snapshot and a rule
//! set. Errors block the transition being attempted; warnings ride along on
//! the report and never block. Every issue names the field it concerns.

use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use crate::config::ValidationConfig;
use crate::model::{JobDetails, ParseEnumError, Stage, Ticket, TimestampField, format2};
use crate::reference::{ReferenceData, ReferenceKind, Resolution};

static LSD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,2}-\d{1,2}-\d{1,3}-\d{1,2}W\d$").expect("LSD pattern is a valid regex")
});

/// Which rule set to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Creation,
    Completion,
    Export,
}

impl ValidationStage {
    pub const ALL: [Self; 3] = [Self::Creation, Self::Completion, Self::Export];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creation => "creation",
            Self::Completion => "completion",
            Self::Export => "export",
        }
    }

    /// Rule set that gates a ticket's next transition.
    #[must_use]
    pub const fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Pending => Self::Creation,
            Stage::Assigned | Stage::InProgress => Self::Completion,
            Stage::Completed | Stage::Exported => Self::Export,
        }
    }

    /// Lifecycle stage whose tickets this rule set is run against in reports.
    #[must_use]
    pub const fn subject_stage(self) -> Stage {
        match self {
            Self::Creation => Stage::Pending,
            Self::Completion => Stage::InProgress,
            Self::Export => Stage::Completed,
        }
    }
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStage {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "creation" | "create" => Ok(Self::Creation),
            "completion" | "complete" => Ok(Self::Completion),
            "export" => Ok(Self::Export),
            _ => Err(ParseEnumError {
                expected: "validation stage",
                got: s.to_string(),
            }),
        }
    }
}

/// A single field-scoped finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub field: String,
    pub message: String,
}

impl Issue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub stage: ValidationStage,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

impl ValidationReport {
    const fn new(stage: ValidationStage) -> Self {
        Self {
            stage,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// True when some error names `field`.
    #[must_use]
    pub fn has_error_for(&self, field: &str) -> bool {
        self.errors.iter().any(|issue| issue.field == field)
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(Issue::new(field, message));
    }

    fn warn(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(Issue::new(field, message));
    }
}

/// Numeric thresholds for advisory warnings.
#[derive(Debug, Clone)]
pub struct ValidationRules {
    pub volume_warning_threshold: Decimal,
    pub volume_deviation_pct: Decimal,
    pub max_shift_hours: i64,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::from(&ValidationConfig::default())
    }
}

impl From<&ValidationConfig> for ValidationRules {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            volume_warning_threshold: Decimal::from(config.volume_warning_threshold),
            volume_deviation_pct: Decimal::from(config.volume_deviation_pct),
            max_shift_hours: i64::from(config.max_shift_hours),
        }
    }
}

/// How a location string was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Lsd,
    LeaseName,
}

/// Accept a legal subdivision code or a lease name of at least two characters.
pub fn check_location(value: &str) -> Result<LocationKind, &'static str> {
    let value = value.trim();
    if value.is_empty() {
        return Err("location is required");
    }
    if LSD_PATTERN.is_match(value) {
        return Ok(LocationKind::Lsd);
    }
    if value.chars().count() >= 2 {
        return Ok(LocationKind::LeaseName);
    }
    Err("not an LSD code and too short for a lease name")
}

/// Evaluates stage rule sets against an injected reference-data provider.
#[derive(Clone)]
pub struct Validator {
    reference: Arc<dyn ReferenceData>,
    rules: ValidationRules,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl Validator {
    #[must_use]
    pub fn new(reference: Arc<dyn ReferenceData>, rules: ValidationRules) -> Self {
        Self { reference, rules }
    }

    #[must_use]
    pub fn reference(&self) -> &dyn ReferenceData {
        self.reference.as_ref()
    }

    #[must_use]
    pub fn validate(&self, ticket: &Ticket, stage: ValidationStage) -> ValidationReport {
        match stage {
            ValidationStage::Creation => self.validate_job(&ticket.job),
            ValidationStage::Completion => self.validate_completion(ticket),
            ValidationStage::Export => Self::validate_export(ticket, false),
        }
    }

    /// Creation rules, runnable before a ticket (and its id) exists.
    #[must_use]
    pub fn validate_job(&self, job: &JobDetails) -> ValidationReport {
        let mut report = ValidationReport::new(ValidationStage::Creation);

        let required = [
            (ReferenceKind::Customer, "customer", job.customer.as_str()),
            (ReferenceKind::Product, "product", job.product.as_str()),
            (ReferenceKind::Driver, "driver", job.driver.as_str()),
            (ReferenceKind::Truck, "truck", job.truck.as_str()),
        ];
        for (kind, field, value) in required {
            if value.trim().is_empty() {
                report.error(field, format!("{field} is required"));
                continue;
            }
            self.check_reference(&mut report, kind, field, value);
        }

        if let Some(trailer) = job.trailer.as_deref().filter(|t| !t.trim().is_empty()) {
            self.check_reference(&mut report, ReferenceKind::Trailer, "trailer", trailer);
        }

        for (field, value) in [("origin", &job.origin), ("destination", &job.destination)] {
            if let Err(reason) = check_location(value) {
                report.error(field, reason);
            }
        }

        if let Some(estimate) = job.estimated_volume
            && estimate <= Decimal::ZERO
        {
            report.error("estimated_volume", "estimated volume must be greater than 0");
        }

        report
    }

    fn check_reference(
        &self,
        report: &mut ValidationReport,
        kind: ReferenceKind,
        field: &str,
        value: &str,
    ) {
        match self.reference.resolve(kind, value) {
            Resolution::Found(_) => {}
            Resolution::NotFound => {
                report.error(field, format!("unknown {kind} '{}'", value.trim()));
            }
            Resolution::Unconfigured => {
                report.warn(
                    field,
                    format!("no {} configured; {kind} was not checked", kind.list_name()),
                );
            }
        }
    }

    fn validate_completion(&self, ticket: &Ticket) -> ValidationReport {
        let mut report = ValidationReport::new(ValidationStage::Completion);

        for field in TimestampField::ALL {
            if ticket.timestamps.get(field).is_none() {
                report.error(field.as_str(), format!("{} time is required", field.label()));
            }
        }
        check_ordering(ticket, &mut report);

        if let (Some(start), Some(end)) = (
            ticket.timestamps.arrive_origin,
            ticket.timestamps.depart_destination,
        ) {
            let elapsed = end - start;
            if elapsed.num_seconds() > self.rules.max_shift_hours * 3600 {
                report.warn(
                    "timestamps",
                    format!(
                        "total time {}h exceeds {} hours; please verify",
                        format2(Decimal::from(elapsed.num_minutes()) / Decimal::from(60)),
                        self.rules.max_shift_hours
                    ),
                );
            }
        }

        match ticket.actual_volume {
            None => report.error("actual_volume", "actual volume is required"),
            Some(volume) if volume <= Decimal::ZERO => {
                report.error("actual_volume", "volume must be greater than 0");
            }
            Some(volume) => self.volume_warnings(&mut report, volume, ticket.job.estimated_volume),
        }

        let missing = ticket.hazards.missing();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|item| item.as_str()).collect();
            report.error(
                "hazard_checklist",
                format!("hazard assessment incomplete; unchecked: {}", names.join(", ")),
            );
        }

        if !ticket.signature {
            report.error("signature", "driver signature is required");
        }

        report
    }

    fn volume_warnings(
        &self,
        report: &mut ValidationReport,
        volume: Decimal,
        estimate: Option<Decimal>,
    ) {
        if volume > self.rules.volume_warning_threshold {
            report.warn(
                "actual_volume",
                format!("volume {} m³ seems high; please verify", format2(volume)),
            );
        }
        if let Some(estimate) = estimate.filter(|e| *e > Decimal::ZERO) {
            let deviation = ((volume - estimate).abs() / estimate) * Decimal::ONE_HUNDRED;
            if deviation > self.rules.volume_deviation_pct {
                report.warn(
                    "actual_volume",
                    format!(
                        "actual differs from estimated {} by {}%",
                        format2(estimate),
                        deviation.round()
                    ),
                );
            }
        }
    }

    /// Export rules. `allow_exported` admits already exported tickets for a
    /// forced re-export.
    #[must_use]
    pub fn validate_export(ticket: &Ticket, allow_exported: bool) -> ValidationReport {
        let mut report = ValidationReport::new(ValidationStage::Export);

        let stage_ok = ticket.stage == Stage::Completed
            || (allow_exported && ticket.stage == Stage::Exported);
        if !stage_ok {
            report.error(
                "stage",
                format!("only completed tickets can be exported (stage is {})", ticket.stage),
            );
        }

        if !ticket.actual_volume.is_some_and(|v| v > Decimal::ZERO) {
            report.error("actual_volume", "cannot export a ticket with zero volume");
        }

        if !ticket.computed_hours().is_some_and(|h| h > Decimal::ZERO) {
            report.error("hours", "cannot export a ticket with zero hours");
        }

        if ticket.job.driver.split_whitespace().count() < 2 {
            report.error(
                "driver",
                format!(
                    "driver name '{}' needs a first and last name",
                    ticket.job.driver.trim()
                ),
            );
        }

        if !ticket.timestamps.all_set() {
            report.error("timestamps", "all four field timestamps are required");
        } else {
            check_ordering(ticket, &mut report);
        }

        report
    }
}

/// Ordering violations (T1 < T2 < T3 < T4) among the timestamps present.
#[must_use]
pub fn timestamp_order_issues(ticket: &Ticket) -> Vec<Issue> {
    let present: Vec<_> = ticket.timestamps.iter().collect();
    present
        .windows(2)
        .filter(|pair| pair[1].1 <= pair[0].1)
        .map(|pair| {
            let (earlier, later) = (pair[0].0, pair[1].0);
            Issue::new(
                later.as_str(),
                format!("{} must be after {}", later.label(), earlier.label()),
            )
        })
        .collect()
}

fn check_ordering(ticket: &Ticket, report: &mut ValidationReport) {
    report.errors.extend(timestamp_order_issues(ticket));
}
