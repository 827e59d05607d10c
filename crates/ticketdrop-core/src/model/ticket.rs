use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

/// Daily-sequenced ticket identifier: `YYMMDD` + 3-digit sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TicketId(String);

/// Highest sequence a single calendar day can issue.
pub const MAX_DAILY_SEQUENCE: u16 = 999;

impl TicketId {
    /// Build an id from its date and sequence.
    ///
    /// Callers guarantee `1 <= sequence <= 999`; the id generator is the only
    /// production caller.
    #[must_use]
    pub fn new(date: NaiveDate, sequence: u16) -> Self {
        Self(format!("{}{sequence:03}", date.format("%y%m%d")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `YYMMDD` prefix.
    #[must_use]
    pub fn date_prefix(&self) -> &str {
        &self.0[..6]
    }

    /// Calendar date encoded in the prefix (20xx century).
    #[must_use]
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&format!("20{}", self.date_prefix()), "%Y%m%d").ok()
    }

    /// The trailing 3-digit sequence.
    #[must_use]
    pub fn sequence(&self) -> u16 {
        self.0[6..].parse().unwrap_or(0)
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TicketId {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        let invalid = || ParseEnumError {
            expected: "ticket id (YYMMDDNNN)",
            got: s.to_string(),
        };
        if value.len() != 9 || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let id = Self(value.to_string());
        if id.date().is_none() || id.sequence() == 0 {
            return Err(invalid());
        }
        Ok(id)
    }
}

impl TryFrom<String> for TicketId {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TicketId> for String {
    fn from(id: TicketId) -> Self {
        id.0
    }
}

/// The five lifecycle stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Exported,
}

impl Stage {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Assigned,
        Self::InProgress,
        Self::Completed,
        Self::Exported,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Exported => "EXPORTED",
        }
    }

    /// The single stage this one may advance to.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Assigned),
            Self::Assigned => Some(Self::InProgress),
            Self::InProgress => Some(Self::Completed),
            Self::Completed => Some(Self::Exported),
            Self::Exported => None,
        }
    }

    /// Validate whether a transition from self to `target` is allowed.
    ///
    /// Transitions move exactly one step forward:
    /// `PENDING -> ASSIGNED -> IN_PROGRESS -> COMPLETED -> EXPORTED`.
    /// There is no reopen; corrections are compensating updates.
    pub fn can_transition_to(self, target: Self) -> Result<(), InvalidTransition> {
        if self == target {
            return Err(InvalidTransition {
                from: self,
                to: target,
                reason: "no-op transition is not allowed",
            });
        }

        if target < self {
            return Err(InvalidTransition {
                from: self,
                to: target,
                reason: "stages never move backwards",
            });
        }

        if self.next() == Some(target) {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self,
                to: target,
                reason: "transitions cannot skip a stage",
            })
        }
    }

    /// Storage partition the stage lives in.
    #[must_use]
    pub const fn partition(self) -> Partition {
        match self {
            Self::Pending => Partition::PreAssignment,
            Self::Assigned | Self::InProgress => Partition::Active,
            Self::Completed | Self::Exported => Partition::Completed,
        }
    }
}

/// The three storage partitions: dispatch board, active, completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    PreAssignment,
    Active,
    Completed,
}

impl Partition {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreAssignment => "pre_assignment",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

/// Dispatch priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    #[default]
    Normal,
    HotShot,
    Emergency,
}

impl Priority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::HotShot => "HotShot",
            Self::Emergency => "Emergency",
        }
    }
}

/// The four driver-captured field timestamps, in required order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampField {
    ArriveOrigin,
    DepartOrigin,
    ArriveDestination,
    DepartDestination,
}

impl TimestampField {
    pub const ALL: [Self; 4] = [
        Self::ArriveOrigin,
        Self::DepartOrigin,
        Self::ArriveDestination,
        Self::DepartDestination,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ArriveOrigin => "arrive_origin",
            Self::DepartOrigin => "depart_origin",
            Self::ArriveDestination => "arrive_destination",
            Self::DepartDestination => "depart_destination",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ArriveOrigin => "arrived at pickup",
            Self::DepartOrigin => "departed pickup",
            Self::ArriveDestination => "arrived at delivery",
            Self::DepartDestination => "departed delivery",
        }
    }
}

/// T1..T4. Each is append-only once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldTimestamps {
    pub arrive_origin: Option<DateTime<Utc>>,
    pub depart_origin: Option<DateTime<Utc>>,
    pub arrive_destination: Option<DateTime<Utc>>,
    pub depart_destination: Option<DateTime<Utc>>,
}

impl FieldTimestamps {
    #[must_use]
    pub const fn get(&self, field: TimestampField) -> Option<DateTime<Utc>> {
        match field {
            TimestampField::ArriveOrigin => self.arrive_origin,
            TimestampField::DepartOrigin => self.depart_origin,
            TimestampField::ArriveDestination => self.arrive_destination,
            TimestampField::DepartDestination => self.depart_destination,
        }
    }

    pub(crate) const fn slot(&mut self, field: TimestampField) -> &mut Option<DateTime<Utc>> {
        match field {
            TimestampField::ArriveOrigin => &mut self.arrive_origin,
            TimestampField::DepartOrigin => &mut self.depart_origin,
            TimestampField::ArriveDestination => &mut self.arrive_destination,
            TimestampField::DepartDestination => &mut self.depart_destination,
        }
    }

    /// True once any of the four timestamps has been captured.
    #[must_use]
    pub fn any_set(&self) -> bool {
        TimestampField::ALL.iter().any(|f| self.get(*f).is_some())
    }

    #[must_use]
    pub fn all_set(&self) -> bool {
        TimestampField::ALL.iter().all(|f| self.get(*f).is_some())
    }

    /// Set timestamps in capture order.
    pub fn iter(&self) -> impl Iterator<Item = (TimestampField, DateTime<Utc>)> + '_ {
        TimestampField::ALL
            .into_iter()
            .filter_map(|f| self.get(f).map(|at| (f, at)))
    }
}

/// The fixed 10-item site hazard assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardItem {
    Access,
    Weather,
    WindDirection,
    SlipTrip,
    WorkingAlone,
    Powerline,
    PpeUsed,
    FireExtinguisher,
    Communication,
    Spills,
}

pub const HAZARD_ITEMS: [HazardItem; 10] = [
    HazardItem::Access,
    HazardItem::Weather,
    HazardItem::WindDirection,
    HazardItem::SlipTrip,
    HazardItem::WorkingAlone,
    HazardItem::Powerline,
    HazardItem::PpeUsed,
    HazardItem::FireExtinguisher,
    HazardItem::Communication,
    HazardItem::Spills,
];

impl HazardItem {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Weather => "weather",
            Self::WindDirection => "wind_direction",
            Self::SlipTrip => "slip_trip",
            Self::WorkingAlone => "working_alone",
            Self::Powerline => "powerline",
            Self::PpeUsed => "ppe_used",
            Self::FireExtinguisher => "fire_extinguisher",
            Self::Communication => "communication",
            Self::Spills => "spills",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Completion state of the hazard checklist, one flag per [`HAZARD_ITEMS`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HazardChecklist([bool; 10]);

impl HazardChecklist {
    /// A checklist with every item confirmed.
    #[must_use]
    pub const fn complete() -> Self {
        Self([true; 10])
    }

    pub const fn set(&mut self, item: HazardItem, checked: bool) {
        self.0[item.index()] = checked;
    }

    #[must_use]
    pub const fn is_checked(&self, item: HazardItem) -> bool {
        self.0[item.index()]
    }

    #[must_use]
    pub fn all_checked(&self) -> bool {
        self.0.iter().all(|c| *c)
    }

    #[must_use]
    pub fn checked_count(&self) -> usize {
        self.0.iter().filter(|c| **c).count()
    }

    /// Items still unconfirmed, in checklist order.
    #[must_use]
    pub fn missing(&self) -> Vec<HazardItem> {
        HAZARD_ITEMS
            .into_iter()
            .filter(|item| !self.is_checked(*item))
            .collect()
    }
}

/// Billing export status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportStatus {
    #[default]
    NotExported,
    Exported { at: DateTime<Utc>, batch: String },
}

/// Dispatcher-owned fields captured when the job is created.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDetails {
    pub customer: String,
    pub origin: String,
    pub destination: String,
    pub product: String,
    pub driver: String,
    pub truck: String,
    pub trailer: Option<String>,
    pub estimated_volume: Option<Decimal>,
    pub instructions: Option<String>,
    pub priority: Priority,
}

/// The canonical ticket record owned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub created_on: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub job: JobDetails,
    pub stage: Stage,
    #[serde(default)]
    pub timestamps: FieldTimestamps,
    #[serde(default)]
    pub actual_volume: Option<Decimal>,
    #[serde(default)]
    pub hazards: HazardChecklist,
    #[serde(default)]
    pub signature: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub hours: Option<Decimal>,
    #[serde(default)]
    pub wait_time: Option<Decimal>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub export: ExportStatus,
    /// Client timestamp of the last accepted write per field key, used for
    /// last-writer-wins reconciliation.
    #[serde(default)]
    pub field_clock: BTreeMap<String, DateTime<Utc>>,
}

impl Ticket {
    /// A fresh `PENDING` ticket.
    #[must_use]
    pub fn new(id: TicketId, job: JobDetails, created_on: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_on,
            created_at: now,
            updated_at: now,
            job,
            stage: Stage::Pending,
            timestamps: FieldTimestamps::default(),
            actual_volume: None,
            hazards: HazardChecklist::default(),
            signature: false,
            notes: String::new(),
            photos: Vec::new(),
            hours: None,
            wait_time: None,
            completed_at: None,
            export: ExportStatus::NotExported,
            field_clock: BTreeMap::new(),
        }
    }

    /// Hours on the job: T4 − T1, rounded half-up to 2 places.
    #[must_use]
    pub fn computed_hours(&self) -> Option<Decimal> {
        let start = self.timestamps.arrive_origin?;
        let end = self.timestamps.depart_destination?;
        Some(hours_between(start, end))
    }

    /// Time spent waiting at both ends: (T2 − T1) + (T4 − T3).
    #[must_use]
    pub fn computed_wait_time(&self) -> Option<Decimal> {
        let t = &self.timestamps;
        let origin = (t.depart_origin? - t.arrive_origin?).num_seconds();
        let destination = (t.depart_destination? - t.arrive_destination?).num_seconds();
        Some(seconds_to_hours(origin + destination))
    }

    #[must_use]
    pub const fn is_exported(&self) -> bool {
        matches!(self.export, ExportStatus::Exported { .. })
    }

    /// Batch that recorded the export, if any.
    #[must_use]
    pub fn export_batch(&self) -> Option<&str> {
        match &self.export {
            ExportStatus::Exported { batch, .. } => Some(batch),
            ExportStatus::NotExported => None,
        }
    }
}

/// Round half-up (away from zero on the midpoint) to 2 decimal places.
#[must_use]
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Render with exactly two decimal places after half-up rounding.
#[must_use]
pub fn format2(value: Decimal) -> String {
    let mut rounded = round2(value);
    rounded.rescale(2);
    rounded.to_string()
}

fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Decimal {
    seconds_to_hours((end - start).num_seconds())
}

fn seconds_to_hours(seconds: i64) -> Decimal {
    round2(Decimal::from(seconds) / Decimal::from(3600))
}

/// Error returned when a stage transition is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: Stage,
    pub to: Stage,
    pub reason: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.from, self.to, self.reason)
    }
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TimestampField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for HazardItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(input: &str) -> String {
    input
        .trim()
        .to_ascii_lowercase()
        .replace(['-', ' ', '/'], "_")
}

impl FromStr for Stage {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "in_progress" | "inprogress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "exported" => Ok(Self::Exported),
            _ => Err(ParseEnumError {
                expected: "stage",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "normal" | "" => Ok(Self::Normal),
            "hotshot" | "hot_shot" => Ok(Self::HotShot),
            "emergency" => Ok(Self::Emergency),
            _ => Err(ParseEnumError {
                expected: "priority",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for TimestampField {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "arrive_origin" | "arrive_load" => Ok(Self::ArriveOrigin),
            "depart_origin" | "depart_load" => Ok(Self::DepartOrigin),
            "arrive_destination" | "arrive_offload" => Ok(Self::ArriveDestination),
            "depart_destination" | "depart_offload" => Ok(Self::DepartDestination),
            _ => Err(ParseEnumError {
                expected: "timestamp field",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for HazardItem {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        HAZARD_ITEMS
            .into_iter()
            .find(|item| item.as_str() == normalized || item.as_str().replace('_', "") == normalized)
            .ok_or_else(|| ParseEnumError {
                expected: "hazard item",
                got: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn ticket_id_formats_date_and_sequence() {
        let id = TicketId::new(date(2026, 1, 1), 7);
        assert_eq!(id.as_str(), "260101007");
        assert_eq!(id.date_prefix(), "260101");
        assert_eq!(id.sequence(), 7);
        assert_eq!(id.date(), Some(date(2026, 1, 1)));
    }

    #[test]
    fn ticket_id_parse_rejects_garbage() {
        assert!("260101001".parse::<TicketId>().is_ok());
        assert!("26010100".parse::<TicketId>().is_err());
        assert!("26a101001".parse::<TicketId>().is_err());
        assert!("261301001".parse::<TicketId>().is_err());
        assert!("260101000".parse::<TicketId>().is_err());
    }

    #[test]
    fn ticket_id_serializes_as_plain_string() {
        let id = TicketId::new(date(2026, 3, 9), 12);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"260309012\"");
        assert!(serde_json::from_str::<TicketId>("\"nope\"").is_err());
    }

    #[test]
    fn stage_transitions_move_one_step_forward() {
        assert!(Stage::Pending.can_transition_to(Stage::Assigned).is_ok());
        assert!(Stage::Assigned.can_transition_to(Stage::InProgress).is_ok());
        assert!(Stage::InProgress.can_transition_to(Stage::Completed).is_ok());
        assert!(Stage::Completed.can_transition_to(Stage::Exported).is_ok());

        assert!(matches!(
            Stage::Completed.can_transition_to(Stage::Assigned),
            Err(InvalidTransition {
                reason: "stages never move backwards",
                ..
            })
        ));
        assert!(matches!(
            Stage::Pending.can_transition_to(Stage::InProgress),
            Err(InvalidTransition {
                reason: "transitions cannot skip a stage",
                ..
            })
        ));
        for target in Stage::ALL {
            assert!(Stage::Exported.can_transition_to(target).is_err());
        }
    }

    #[test]
    fn stage_parse_accepts_common_spellings() {
        assert_eq!("in-progress".parse::<Stage>().unwrap(), Stage::InProgress);
        assert_eq!("IN_PROGRESS".parse::<Stage>().unwrap(), Stage::InProgress);
        assert_eq!(" completed ".parse::<Stage>().unwrap(), Stage::Completed);
        assert!("active".parse::<Stage>().is_err());
        assert_eq!(
            serde_json::to_string(&Stage::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
    }

    #[test]
    fn partitions_group_stages() {
        assert_eq!(Stage::Pending.partition(), Partition::PreAssignment);
        assert_eq!(Stage::InProgress.partition(), Partition::Active);
        assert_eq!(Stage::Exported.partition(), Partition::Completed);
    }

    #[test]
    fn priority_parse_is_lenient() {
        assert_eq!("Hot Shot".parse::<Priority>().unwrap(), Priority::HotShot);
        assert_eq!("hotshot".parse::<Priority>().unwrap(), Priority::HotShot);
        assert_eq!("".parse::<Priority>().unwrap(), Priority::Normal);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn timestamp_field_accepts_load_offload_aliases() {
        assert_eq!(
            "arrive_load".parse::<TimestampField>().unwrap(),
            TimestampField::ArriveOrigin
        );
        assert_eq!(
            "depart-offload".parse::<TimestampField>().unwrap(),
            TimestampField::DepartDestination
        );
    }

    #[test]
    fn hazard_checklist_tracks_missing_items() {
        let mut list = HazardChecklist::default();
        assert_eq!(list.missing().len(), 10);
        list.set(HazardItem::PpeUsed, true);
        assert!(list.is_checked(HazardItem::PpeUsed));
        assert_eq!(list.checked_count(), 1);
        assert!(!list.missing().contains(&HazardItem::PpeUsed));
        assert!(HazardChecklist::complete().all_checked());
        assert_eq!("PPE used".parse::<HazardItem>().unwrap(), HazardItem::PpeUsed);
        assert_eq!("slip/trip".parse::<HazardItem>().unwrap(), HazardItem::SlipTrip);
    }

    #[test]
    fn hours_and_wait_time_derive_from_timestamps() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let mut ticket = Ticket::new(
            TicketId::new(date(2026, 1, 1), 1),
            JobDetails::default(),
            date(2026, 1, 1),
            now,
        );
        assert!(ticket.computed_hours().is_none());

        ticket.timestamps = FieldTimestamps {
            arrive_origin: Some(Utc.with_ymd_and_hms(2026, 1, 1, 8, 30, 0).unwrap()),
            depart_origin: Some(Utc.with_ymd_and_hms(2026, 1, 1, 9, 15, 0).unwrap()),
            arrive_destination: Some(Utc.with_ymd_and_hms(2026, 1, 1, 10, 45, 0).unwrap()),
            depart_destination: Some(Utc.with_ymd_and_hms(2026, 1, 1, 11, 20, 0).unwrap()),
        };
        assert_eq!(ticket.computed_hours(), Some(Decimal::new(283, 2)));
        assert_eq!(ticket.computed_wait_time(), Some(Decimal::new(133, 2)));
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(format2(Decimal::new(2125, 3)), "2.13");
        assert_eq!(format2(Decimal::new(855, 1)), "85.50");
        assert_eq!(format2(Decimal::new(1, 0)), "1.00");
        assert_eq!(format2(Decimal::new(-2125, 3)), "-2.13");
    }

    #[test]
    fn ticket_json_roundtrips() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let mut ticket = Ticket::new(
            TicketId::new(date(2026, 1, 1), 3),
            JobDetails {
                customer: "Spur Petroleum Corp".into(),
                estimated_volume: Some(Decimal::new(80, 0)),
                ..JobDetails::default()
            },
            date(2026, 1, 1),
            now,
        );
        ticket.export = ExportStatus::Exported {
            at: now,
            batch: "exp-1".into(),
        };
        let json = serde_json::to_string(&ticket).unwrap();
        let back: Ticket = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ticket);
        assert_eq!(back.export_batch(), Some("exp-1"));
    }
}
