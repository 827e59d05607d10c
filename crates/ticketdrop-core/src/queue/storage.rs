use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::{EntryStatus, NewEntry, QueueEntry, QueueError, QueueStorage};
use crate::model::FieldDelta;
use crate::store::sqlite::{connect, from_micros, open_database};

/// Process-local queue, for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    entries: BTreeMap<u64, QueueEntry>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<F>(&self, id: u64, edit: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut QueueEntry),
    {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = state.entries.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        edit(entry);
        Ok(())
    }
}

impl QueueStorage for MemoryQueue {
    fn push(&self, entry: NewEntry) -> Result<QueueEntry, QueueError> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let stored = QueueEntry {
            id: state.next_id,
            ticket_id: entry.ticket_id,
            intent: entry.intent,
            deltas: entry.deltas,
            client_ts: entry.client_ts,
            enqueued_at: entry.enqueued_at,
            attempts: 0,
            next_attempt_at: entry.enqueued_at,
            status: EntryStatus::Pending,
            last_error: None,
        };
        state.entries.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn due(&self, now: DateTime<Utc>) -> Result<Vec<QueueEntry>, QueueError> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .entries
            .values()
            .filter(|e| e.status == EntryStatus::Pending && e.next_attempt_at <= now)
            .cloned()
            .collect())
    }

    fn list(&self, status: EntryStatus) -> Result<Vec<QueueEntry>, QueueError> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .entries
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    fn remove(&self, id: u64) -> Result<(), QueueError> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .entries
            .remove(&id)
            .map(|_| ())
            .ok_or(QueueError::NotFound(id))
    }

    fn reschedule(
        &self,
        id: u64,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), QueueError> {
        self.with_entry(id, |entry| {
            entry.attempts = attempts;
            entry.next_attempt_at = next_attempt_at;
            entry.last_error = Some(error.to_string());
        })
    }

    fn fail(&self, id: u64, attempts: u32, error: &str) -> Result<(), QueueError> {
        self.with_entry(id, |entry| {
            entry.attempts = attempts;
            entry.status = EntryStatus::Failed;
            entry.last_error = Some(error.to_string());
        })
    }
}

/// Queue persisted in the ticket database's `queue_entries` table.
#[derive(Debug, Clone)]
pub struct SqliteQueue {
    path: PathBuf,
}

const ENTRY_COLUMNS: &str = "entry_id, ticket_id, intent, deltas_json, client_ts_us, \
     enqueued_at_us, attempts, next_attempt_at_us, status, last_error";

impl SqliteQueue {
    /// Open the queue in the database at `path`, migrating as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        open_database(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, QueueError> {
        Ok(connect(&self.path)?)
    }

    fn select(&self, clause: &str, bind: &[&dyn rusqlite::ToSql]) -> Result<Vec<QueueEntry>, QueueError> {
        let conn = self.connect()?;
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM queue_entries WHERE {clause} ORDER BY entry_id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(bind, RawEntry::from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.decode()?);
        }
        Ok(entries)
    }

    fn touch(&self, sql: &str, bind: &[&dyn rusqlite::ToSql], id: u64) -> Result<(), QueueError> {
        let changed = self.connect()?.execute(sql, bind)?;
        if changed == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }
}

/// Row as stored, before decoding.
struct RawEntry {
    id: i64,
    ticket_id: String,
    intent: String,
    deltas_json: String,
    client_ts_us: i64,
    enqueued_at_us: i64,
    attempts: i64,
    next_attempt_at_us: i64,
    status: String,
    last_error: Option<String>,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            ticket_id: row.get(1)?,
            intent: row.get(2)?,
            deltas_json: row.get(3)?,
            client_ts_us: row.get(4)?,
            enqueued_at_us: row.get(5)?,
            attempts: row.get(6)?,
            next_attempt_at_us: row.get(7)?,
            status: row.get(8)?,
            last_error: row.get(9)?,
        })
    }

    fn decode(self) -> Result<QueueEntry, QueueError> {
        let corrupt = |what: &str, detail: String| QueueError::Corrupt(format!("{what}: {detail}"));
        let deltas: Vec<FieldDelta> = serde_json::from_str(&self.deltas_json)?;
        Ok(QueueEntry {
            id: u64::try_from(self.id).map_err(|e| corrupt("entry id", e.to_string()))?,
            ticket_id: self
                .ticket_id
                .parse()
                .map_err(|e: crate::model::ParseEnumError| corrupt("ticket id", e.to_string()))?,
            intent: self
                .intent
                .parse()
                .map_err(|e: crate::model::ParseEnumError| corrupt("intent", e.to_string()))?,
            deltas,
            client_ts: from_micros(self.client_ts_us)?,
            enqueued_at: from_micros(self.enqueued_at_us)?,
            attempts: u32::try_from(self.attempts).map_err(|e| corrupt("attempts", e.to_string()))?,
            next_attempt_at: from_micros(self.next_attempt_at_us)?,
            status: self
                .status
                .parse()
                .map_err(|e: crate::model::ParseEnumError| corrupt("status", e.to_string()))?,
            last_error: self.last_error,
        })
    }
}

fn entry_key(id: u64) -> Result<i64, QueueError> {
    i64::try_from(id).map_err(|_| QueueError::NotFound(id))
}

impl QueueStorage for SqliteQueue {
    fn push(&self, entry: NewEntry) -> Result<QueueEntry, QueueError> {
        let conn = self.connect()?;
        let deltas_json = serde_json::to_string(&entry.deltas)?;
        conn.execute(
            "INSERT INTO queue_entries (ticket_id, intent, deltas_json, client_ts_us,
                enqueued_at_us, attempts, next_attempt_at_us, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?5, 'pending')",
            params![
                entry.ticket_id.as_str(),
                entry.intent.as_str(),
                deltas_json,
                entry.client_ts.timestamp_micros(),
                entry.enqueued_at.timestamp_micros(),
            ],
        )?;
        let id = u64::try_from(conn.last_insert_rowid())
            .map_err(|e| QueueError::Corrupt(format!("entry id: {e}")))?;
        Ok(QueueEntry {
            id,
            ticket_id: entry.ticket_id,
            intent: entry.intent,
            deltas: entry.deltas,
            client_ts: entry.client_ts,
            enqueued_at: entry.enqueued_at,
            attempts: 0,
            next_attempt_at: entry.enqueued_at,
            status: EntryStatus::Pending,
            last_error: None,
        })
    }

    fn due(&self, now: DateTime<Utc>) -> Result<Vec<QueueEntry>, QueueError> {
        self.select(
            "status = 'pending' AND next_attempt_at_us <= ?1",
            &[&now.timestamp_micros()],
        )
    }

    fn list(&self, status: EntryStatus) -> Result<Vec<QueueEntry>, QueueError> {
        self.select("status = ?1", &[&status.as_str()])
    }

    fn remove(&self, id: u64) -> Result<(), QueueError> {
        self.touch(
            "DELETE FROM queue_entries WHERE entry_id = ?1",
            &[&entry_key(id)?],
            id,
        )
    }

    fn reschedule(
        &self,
        id: u64,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), QueueError> {
        self.touch(
            "UPDATE queue_entries
             SET attempts = ?2, next_attempt_at_us = ?3, last_error = ?4
             WHERE entry_id = ?1",
            &[
                &entry_key(id)?,
                &i64::from(attempts),
                &next_attempt_at.timestamp_micros(),
                &error,
            ],
            id,
        )
    }

    fn fail(&self, id: u64, attempts: u32, error: &str) -> Result<(), QueueError> {
        self.touch(
            "UPDATE queue_entries
             SET attempts = ?2, status = 'failed', last_error = ?3
             WHERE entry_id = ?1",
            &[&entry_key(id)?, &i64::from(attempts), &error],
            id,
        )
    }
}
