//! SQLite schema for the ticket store.
//!
//! - `tickets` holds one row per ticket: the partition and stage, a few
//!   denormalized filter columns, and the full record in `snapshot_json`
//! - `ticket_events` is the append-only audit trail
//! - `queue_entries` persists offline field updates awaiting replay
//! - `store_meta` tracks the schema version

/// Migration v1: tickets, audit trail and store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tickets (
    ticket_id TEXT PRIMARY KEY,
    created_on TEXT NOT NULL,
    partition TEXT NOT NULL CHECK (partition IN ('pre_assignment', 'active', 'completed')),
    stage TEXT NOT NULL CHECK (
        stage IN ('PENDING', 'ASSIGNED', 'IN_PROGRESS', 'COMPLETED', 'EXPORTED')
    ),
    customer TEXT NOT NULL,
    driver TEXT NOT NULL,
    truck TEXT NOT NULL,
    exported INTEGER NOT NULL DEFAULT 0 CHECK (exported IN (0, 1)),
    export_batch TEXT,
    snapshot_json TEXT NOT NULL,
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    CHECK (length(ticket_id) = 9)
);

CREATE TABLE IF NOT EXISTS ticket_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_id TEXT NOT NULL REFERENCES tickets(ticket_id),
    at_us INTEGER NOT NULL,
    actor TEXT NOT NULL,
    kind TEXT NOT NULL,
    detail TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 0);

CREATE INDEX IF NOT EXISTS idx_tickets_stage ON tickets(stage);
CREATE INDEX IF NOT EXISTS idx_tickets_partition ON tickets(partition);
CREATE INDEX IF NOT EXISTS idx_tickets_created_on ON tickets(created_on);
CREATE INDEX IF NOT EXISTS idx_tickets_updated_at ON tickets(updated_at_us);
CREATE INDEX IF NOT EXISTS idx_ticket_events_ticket ON ticket_events(ticket_id, event_id);
";

/// Migration v2: durable offline reconciliation queue.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS queue_entries (
    entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_id TEXT NOT NULL,
    intent TEXT NOT NULL DEFAULT 'record' CHECK (intent IN ('record', 'complete')),
    deltas_json TEXT NOT NULL,
    client_ts_us INTEGER NOT NULL,
    enqueued_at_us INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    next_attempt_at_us INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'failed')),
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_queue_entries_due ON queue_entries(status, next_attempt_at_us);
";

/// Indexes every migrated database must have.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_tickets_stage",
    "idx_tickets_partition",
    "idx_tickets_created_on",
    "idx_tickets_updated_at",
    "idx_ticket_events_ticket",
    "idx_queue_entries_due",
];
