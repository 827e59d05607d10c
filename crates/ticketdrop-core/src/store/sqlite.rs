//! SQLite-backed ticket store.
//!
//! Connection defaults:
//! - `journal_mode = WAL` so readers proceed while a writer commits
//! - `busy_timeout = 5s` to absorb transient lock contention
//! - `foreign_keys = ON` so audit events always reference a ticket
//!
//! Each operation opens its own connection, which keeps the store `Sync`
//! without a shared connection lock. Updates run in `IMMEDIATE` transactions
//! so the read-modify-write of one ticket is never interleaved with another
//! writer.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::migrations;
use super::{StoreError, TicketEvent, TicketFilter, TicketStore, UpdateFn, edit_copy};
use crate::model::{Ticket, TicketId};

/// Busy timeout for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the database, apply pragmas and migrate to the latest schema.
pub fn open_database(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut conn = Connection::open(path)?;
    configure_connection(&conn)?;
    migrations::migrate(&mut conn)?;
    Ok(conn)
}

pub(crate) fn connect(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    configure_connection(&conn)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

pub(crate) fn from_micros(us: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(us)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {us}")))
}

/// SQLite-backed [`TicketStore`], one connection per operation.
///
/// Updates run in `BEGIN IMMEDIATE` transactions, which take the database
/// write lock. Writers to different tickets therefore queue behind each
/// other for the length of one read-modify-write; readers are not blocked
/// (WAL). Serialization is database-wide rather than per ticket.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open the store at `path`, creating and migrating the database as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        open_database(&path)?;
        tracing::debug!(path = %path.display(), "opened ticket store");
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        connect(&self.path)
    }
}

fn load(conn: &Connection, id: &TicketId) -> Result<Ticket, StoreError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT snapshot_json FROM tickets WHERE ticket_id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let json = json.ok_or_else(|| StoreError::NotFound(id.clone()))?;
    Ok(serde_json::from_str(&json)?)
}

fn write_row(conn: &Connection, ticket: &Ticket, insert: bool) -> Result<(), StoreError> {
    let json = serde_json::to_string(ticket)?;
    let sql = if insert {
        "INSERT INTO tickets (ticket_id, created_on, partition, stage, customer, driver, truck,
            exported, export_batch, snapshot_json, created_at_us, updated_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
    } else {
        "UPDATE tickets SET created_on = ?2, partition = ?3, stage = ?4, customer = ?5,
            driver = ?6, truck = ?7, exported = ?8, export_batch = ?9, snapshot_json = ?10,
            created_at_us = ?11, updated_at_us = ?12
         WHERE ticket_id = ?1"
    };
    conn.execute(
        sql,
        params![
            ticket.id.as_str(),
            ticket.created_on.format("%Y-%m-%d").to_string(),
            ticket.stage.partition().as_str(),
            ticket.stage.as_str(),
            ticket.job.customer,
            ticket.job.driver,
            ticket.job.truck,
            i64::from(ticket.is_exported()),
            ticket.export_batch(),
            json,
            ticket.created_at.timestamp_micros(),
            ticket.updated_at.timestamp_micros(),
        ],
    )?;
    Ok(())
}

fn collect_snapshots(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<Ticket>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?;
    let mut tickets = Vec::new();
    for row in rows {
        tickets.push(serde_json::from_str(&row?)?);
    }
    Ok(tickets)
}

impl TicketStore for SqliteStore {
    fn insert(&self, ticket: Ticket) -> Result<(), StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM tickets WHERE ticket_id = ?1)",
            params![ticket.id.as_str()],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::AlreadyExists(ticket.id));
        }
        write_row(&tx, &ticket, true)?;
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &TicketId) -> Result<Ticket, StoreError> {
        load(&self.connect()?, id)
    }

    fn update(&self, id: &TicketId, apply: &mut UpdateFn<'_>) -> Result<Ticket, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = load(&tx, id)?;
        let next = edit_copy(&current, apply)?;
        write_row(&tx, &next, false)?;
        tx.commit()?;
        Ok(next)
    }

    fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, StoreError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(stage) = filter.stage {
            values.push(stage.as_str().to_string());
            conditions.push(format!("stage = ?{}", values.len()));
        }
        if let Some(from) = filter.date_from {
            values.push(from.format("%Y-%m-%d").to_string());
            conditions.push(format!("created_on >= ?{}", values.len()));
        }
        if let Some(to) = filter.date_to {
            values.push(to.format("%Y-%m-%d").to_string());
            conditions.push(format!("created_on <= ?{}", values.len()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!("SELECT snapshot_json FROM tickets{where_clause} ORDER BY ticket_id");

        let conn = self.connect()?;
        let params: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v as &dyn rusqlite::types::ToSql).collect();
        let mut tickets: Vec<Ticket> = collect_snapshots(&conn, &sql, &params)?
            .into_iter()
            .filter(|ticket| filter.matches(ticket))
            .collect();
        if let Some(limit) = filter.limit {
            tickets.truncate(limit);
        }
        Ok(tickets)
    }

    fn pull(&self, since: DateTime<Utc>) -> Result<Vec<Ticket>, StoreError> {
        let conn = self.connect()?;
        let since_us = since.timestamp_micros();
        collect_snapshots(
            &conn,
            "SELECT snapshot_json FROM tickets WHERE updated_at_us > ?1
             ORDER BY updated_at_us, ticket_id",
            &[&since_us],
        )
    }

    fn max_sequence(&self, date: NaiveDate) -> Result<u16, StoreError> {
        let probe = TicketId::new(date, 1);
        let conn = self.connect()?;
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(CAST(substr(ticket_id, 7, 3) AS INTEGER)), 0)
             FROM tickets WHERE substr(ticket_id, 1, 6) = ?1",
            params![probe.date_prefix()],
            |row| row.get(0),
        )?;
        u16::try_from(max).map_err(|_| StoreError::Corrupt(format!("sequence out of range: {max}")))
    }

    fn append_event(&self, event: &TicketEvent) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO ticket_events (ticket_id, at_us, actor, kind, detail)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.ticket_id.as_str(),
                event.at.timestamp_micros(),
                event.actor,
                event.kind.as_str(),
                event.detail,
            ],
        )?;
        Ok(())
    }

    fn history(&self, id: &TicketId) -> Result<Vec<TicketEvent>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT at_us, actor, kind, detail FROM ticket_events
             WHERE ticket_id = ?1 ORDER BY event_id",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (at_us, actor, kind, detail) = row?;
            events.push(TicketEvent {
                ticket_id: id.clone(),
                at: from_micros(at_us)?,
                actor,
                kind: kind
                    .parse()
                    .map_err(|e: crate::model::ParseEnumError| StoreError::Corrupt(e.to_string()))?,
                detail,
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stage;
    use crate::store::test_support::{exercise_store, ticket};
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = SqliteStore::open(dir.path().join("tickets.db")).expect("open store");
        (dir, store)
    }

    #[test]
    fn open_sets_wal_busy_timeout_and_fk() {
        let (_dir, store) = temp_store();
        let conn = store.connect().expect("connect");

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(u128::from(busy_timeout_ms), DEFAULT_BUSY_TIMEOUT.as_millis());

        let foreign_keys: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("query foreign_keys");
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn sqlite_store_honours_contract() {
        let (_dir, store) = temp_store();
        exercise_store(&store);
    }

    #[test]
    fn partition_column_tracks_stage() {
        let (_dir, store) = temp_store();
        store.insert(ticket(1)).unwrap();
        let id = ticket(1).id;
        store
            .update(&id, &mut |t| {
                t.stage = Stage::Assigned;
                Ok(())
            })
            .unwrap();

        let conn = store.connect().unwrap();
        let partition: String = conn
            .query_row(
                "SELECT partition FROM tickets WHERE ticket_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(partition, "active");
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.db");
        SqliteStore::open(&path).unwrap().insert(ticket(7)).unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get(&ticket(7).id).unwrap(), ticket(7));
        assert_eq!(reopened.max_sequence(ticket(7).created_on).unwrap(), 7);
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);
        for seq in 1..=4 {
            store.insert(ticket(seq)).unwrap();
        }

        let handles: Vec<_> = (1..=4)
            .map(|seq| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let id = ticket(seq).id;
                    for n in 0..10 {
                        store
                            .update(&id, &mut |t| {
                                t.photos.push(format!("p{n}.jpg"));
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for t in store.list(&TicketFilter::default()).unwrap() {
            assert_eq!(t.photos.len(), 10);
        }
    }
}
