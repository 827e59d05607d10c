pub mod delta;
pub mod ticket;

pub use delta::{DeltaError, FieldClass, FieldDelta, FieldUpdate, HazardCheck};
pub use ticket::{
    ExportStatus, FieldTimestamps, HAZARD_ITEMS, HazardChecklist, HazardItem, InvalidTransition,
    JobDetails, MAX_DAILY_SEQUENCE, ParseEnumError, Partition, Priority, Stage, Ticket, TicketId,
    TimestampField, format2, round2,
};
