//! Queue storage and persistence.
//!
//! SQLite-backed storage for the event and scheduled-event queues, their
//! invocation logs, and the lease/transition operations the engine relies on.
//!
//! A lease is one immediate transaction that selects eligible unlocked rows
//! and flips `locked`, so two concurrent leasers can never be handed the same
//! row. Every success/error/retry transition writes its invocation row, bumps
//! `tries`, and mutates the event row inside a single transaction.

use super::models::*;
use super::schema::RELAY_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use rusqlite::{types::Type, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Storage operations for both delivery queues.
///
/// All mutating operations are atomic; leases and transitions never leave a
/// row half-updated.
pub trait EventStore: Send + Sync {
    // === Event queue ===

    /// Insert a new row-change event (normally done by a database trigger).
    fn insert_event(&self, event: &EventRow) -> Result<()>;

    /// Get an event by ID.
    fn get_event(&self, id: &str) -> Result<Option<EventRow>>;

    /// Atomically lease up to `limit` due, unlocked, non-terminal events,
    /// oldest first. Leased rows come back with `locked` set.
    fn lease_events(&self, limit: usize, now: i64) -> Result<Vec<EventRow>>;

    /// Record an invocation and mark the event delivered.
    fn mark_event_success(&self, id: &str, invocation: &Invocation) -> Result<()>;

    /// Record an invocation and mark the event failed (terminal).
    fn mark_event_error(&self, id: &str, invocation: &Invocation) -> Result<()>;

    /// Record an invocation and schedule the next attempt.
    fn set_event_retry(&self, id: &str, retry_at: i64, invocation: &Invocation) -> Result<()>;

    /// Reset `locked` on every event row. Startup recovery sweep.
    fn unlock_all_events(&self) -> Result<usize>;

    /// All invocations recorded for an event, in insertion order.
    fn event_invocations(&self, event_id: &str) -> Result<Vec<InvocationRow>>;

    // === Scheduled queue ===

    /// Insert scheduled events, ignoring rows that collide on
    /// `(name, scheduled_time)`. Returns the number actually inserted.
    fn insert_scheduled_events(&self, events: &[ScheduledEventRow]) -> Result<usize>;

    /// Get a scheduled event by ID.
    fn get_scheduled_event(&self, id: &str) -> Result<Option<ScheduledEventRow>>;

    /// Atomically lease up to `limit` due, unlocked, non-terminal scheduled
    /// events.
    fn lease_scheduled_events(&self, limit: usize, now: i64) -> Result<Vec<ScheduledEventRow>>;

    fn mark_scheduled_success(&self, id: &str, invocation: &Invocation) -> Result<()>;

    fn mark_scheduled_error(&self, id: &str, invocation: &Invocation) -> Result<()>;

    fn set_scheduled_retry(&self, id: &str, retry_at: i64, invocation: &Invocation) -> Result<()>;

    /// Mark a scheduled event dead (missed its tolerance window). Writes no
    /// invocation row.
    fn mark_scheduled_dead(&self, id: &str) -> Result<()>;

    /// Cancel a scheduled event. Writes no invocation row.
    fn mark_scheduled_cancelled(&self, id: &str) -> Result<()>;

    fn unlock_all_scheduled_events(&self) -> Result<usize>;

    /// Upcoming-event stats for one trigger, from the stats view. Triggers
    /// with no upcoming rows report a zero count.
    fn scheduled_stats(&self, trigger_name: &str) -> Result<ScheduledTriggerStats>;

    fn scheduled_invocations(&self, event_id: &str) -> Result<Vec<InvocationRow>>;
}

/// SQLite-backed implementation of [`EventStore`].
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    /// Open an existing database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            let conn = Connection::open(&db_path)?;
            open_versioned(&conn, RELAY_VERSIONED_SCHEMAS)?;
            conn
        } else {
            let conn = Connection::open(&db_path)?;
            RELAY_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new queue database at {:?}", db_path.as_ref());
            conn
        };

        Ok(SqliteEventStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        RELAY_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Ok(SqliteEventStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `body` inside one immediate transaction.
    fn with_tx<T>(conn: &Connection, body: impl FnOnce() -> Result<T>) -> Result<T> {
        conn.execute("BEGIN IMMEDIATE", [])?;
        let result = body();
        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            conn.execute("ROLLBACK", [])?;
        }
        result
    }

    fn json_column(row: &rusqlite::Row, column: &str) -> rusqlite::Result<JsonValue> {
        let text: String = row.get(column)?;
        serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
    }

    fn opt_json_column(row: &rusqlite::Row, column: &str) -> rusqlite::Result<Option<JsonValue>> {
        let text: Option<String> = row.get(column)?;
        text.map(|t| {
            serde_json::from_str(&t)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
        })
        .transpose()
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<EventRow> {
        Ok(EventRow {
            id: row.get("id")?,
            schema_name: row.get("schema_name")?,
            table_name: row.get("table_name")?,
            trigger_name: row.get("trigger_name")?,
            payload: Self::json_column(row, "payload")?,
            delivered: row.get("delivered")?,
            error: row.get("error")?,
            tries: row.get("tries")?,
            created_at: row.get("created_at")?,
            locked: row.get("locked")?,
            next_retry_at: row.get("next_retry_at")?,
            archived: row.get("archived")?,
        })
    }

    fn row_to_scheduled(row: &rusqlite::Row) -> rusqlite::Result<ScheduledEventRow> {
        Ok(ScheduledEventRow {
            id: row.get("id")?,
            name: row.get("name")?,
            scheduled_time: row.get("scheduled_time")?,
            additional_payload: Self::opt_json_column(row, "additional_payload")?,
            delivered: row.get("delivered")?,
            error: row.get("error")?,
            dead: row.get("dead")?,
            cancelled: row.get("cancelled")?,
            locked: row.get("locked")?,
            tries: row.get("tries")?,
            created_at: row.get("created_at")?,
            next_retry_at: row.get("next_retry_at")?,
        })
    }

    fn row_to_invocation(row: &rusqlite::Row) -> rusqlite::Result<InvocationRow> {
        Ok(InvocationRow {
            id: row.get("id")?,
            event_id: row.get("event_id")?,
            status: row.get("status")?,
            request: Self::json_column(row, "request")?,
            response: Self::json_column(row, "response")?,
            created_at: row.get("created_at")?,
        })
    }

    fn insert_invocation(
        conn: &Connection,
        table: &str,
        event_id: &str,
        invocation: &Invocation,
    ) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (id, event_id, status, request, response) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                table
            ),
            rusqlite::params![
                invocation.id,
                event_id,
                invocation.status,
                invocation.request.to_string(),
                invocation.response.to_string(),
            ],
        )?;
        Ok(())
    }
}

impl EventStore for SqliteEventStore {
    // === Event queue ===

    fn insert_event(&self, event: &EventRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO event_log (
                id, schema_name, table_name, trigger_name, payload,
                delivered, error, tries, created_at, locked, next_retry_at, archived
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            rusqlite::params![
                event.id,
                event.schema_name,
                event.table_name,
                event.trigger_name,
                event.payload.to_string(),
                event.delivered,
                event.error,
                event.tries,
                event.created_at,
                event.locked,
                event.next_retry_at,
                event.archived,
            ],
        )?;
        Ok(())
    }

    fn get_event(&self, id: &str) -> Result<Option<EventRow>> {
        let conn = self.conn.lock().unwrap();
        let event = conn
            .prepare("SELECT * FROM event_log WHERE id = ?1")?
            .query_row([id], Self::row_to_event)
            .optional()?;
        Ok(event)
    }

    fn lease_events(&self, limit: usize, now: i64) -> Result<Vec<EventRow>> {
        let conn = self.conn.lock().unwrap();
        Self::with_tx(&conn, || {
            let mut stmt = conn.prepare(
                r#"SELECT * FROM event_log
                   WHERE locked = 0 AND delivered = 0 AND error = 0 AND archived = 0
                     AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                   ORDER BY created_at ASC
                   LIMIT ?2"#,
            )?;
            let mut events = stmt
                .query_map(rusqlite::params![now, limit as i64], Self::row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            for event in &mut events {
                conn.execute(
                    "UPDATE event_log SET locked = 1 WHERE id = ?1",
                    [&event.id],
                )?;
                event.locked = true;
            }
            Ok(events)
        })
    }

    fn mark_event_success(&self, id: &str, invocation: &Invocation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::with_tx(&conn, || {
            Self::insert_invocation(&conn, "event_invocation_logs", id, invocation)?;
            conn.execute(
                r#"UPDATE event_log
                   SET delivered = 1, locked = 0, next_retry_at = NULL, tries = tries + 1
                   WHERE id = ?1"#,
                [id],
            )?;
            Ok(())
        })
    }

    fn mark_event_error(&self, id: &str, invocation: &Invocation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::with_tx(&conn, || {
            Self::insert_invocation(&conn, "event_invocation_logs", id, invocation)?;
            conn.execute(
                r#"UPDATE event_log
                   SET error = 1, locked = 0, next_retry_at = NULL, tries = tries + 1
                   WHERE id = ?1"#,
                [id],
            )?;
            Ok(())
        })
    }

    fn set_event_retry(&self, id: &str, retry_at: i64, invocation: &Invocation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::with_tx(&conn, || {
            Self::insert_invocation(&conn, "event_invocation_logs", id, invocation)?;
            conn.execute(
                r#"UPDATE event_log
                   SET next_retry_at = ?1, locked = 0, tries = tries + 1
                   WHERE id = ?2"#,
                rusqlite::params![retry_at, id],
            )?;
            Ok(())
        })
    }

    fn unlock_all_events(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let unlocked = conn.execute("UPDATE event_log SET locked = 0 WHERE locked = 1", [])?;
        Ok(unlocked)
    }

    fn event_invocations(&self, event_id: &str) -> Result<Vec<InvocationRow>> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .prepare(
                // rowid is assigned at insert, so this is insertion order;
                // created_at only has 1-second resolution.
                "SELECT * FROM event_invocation_logs WHERE event_id = ?1 ORDER BY rowid ASC",
            )?
            .query_map([event_id], Self::row_to_invocation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // === Scheduled queue ===

    fn insert_scheduled_events(&self, events: &[ScheduledEventRow]) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Self::with_tx(&conn, || {
            let mut inserted = 0;
            for event in events {
                inserted += conn.execute(
                    r#"INSERT OR IGNORE INTO hdb_scheduled_events (
                        id, name, scheduled_time, additional_payload,
                        delivered, error, dead, cancelled, locked, tries,
                        created_at, next_retry_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
                    rusqlite::params![
                        event.id,
                        event.name,
                        event.scheduled_time,
                        event.additional_payload.as_ref().map(|p| p.to_string()),
                        event.delivered,
                        event.error,
                        event.dead,
                        event.cancelled,
                        event.locked,
                        event.tries,
                        event.created_at,
                        event.next_retry_at,
                    ],
                )?;
            }
            Ok(inserted)
        })
    }

    fn get_scheduled_event(&self, id: &str) -> Result<Option<ScheduledEventRow>> {
        let conn = self.conn.lock().unwrap();
        let event = conn
            .prepare("SELECT * FROM hdb_scheduled_events WHERE id = ?1")?
            .query_row([id], Self::row_to_scheduled)
            .optional()?;
        Ok(event)
    }

    fn lease_scheduled_events(&self, limit: usize, now: i64) -> Result<Vec<ScheduledEventRow>> {
        let conn = self.conn.lock().unwrap();
        Self::with_tx(&conn, || {
            let mut stmt = conn.prepare(
                r#"SELECT * FROM hdb_scheduled_events
                   WHERE locked = 0 AND delivered = 0 AND error = 0
                     AND dead = 0 AND cancelled = 0
                     AND ((next_retry_at IS NULL AND scheduled_time <= ?1)
                          OR next_retry_at <= ?1)
                   ORDER BY scheduled_time ASC
                   LIMIT ?2"#,
            )?;
            let mut events = stmt
                .query_map(rusqlite::params![now, limit as i64], Self::row_to_scheduled)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            for event in &mut events {
                conn.execute(
                    "UPDATE hdb_scheduled_events SET locked = 1 WHERE id = ?1",
                    [&event.id],
                )?;
                event.locked = true;
            }
            Ok(events)
        })
    }

    fn mark_scheduled_success(&self, id: &str, invocation: &Invocation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::with_tx(&conn, || {
            Self::insert_invocation(&conn, "hdb_scheduled_event_invocation_logs", id, invocation)?;
            conn.execute(
                r#"UPDATE hdb_scheduled_events
                   SET delivered = 1, locked = 0, next_retry_at = NULL, tries = tries + 1
                   WHERE id = ?1"#,
                [id],
            )?;
            Ok(())
        })
    }

    fn mark_scheduled_error(&self, id: &str, invocation: &Invocation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::with_tx(&conn, || {
            Self::insert_invocation(&conn, "hdb_scheduled_event_invocation_logs", id, invocation)?;
            // next_retry_at intentionally left as-is on this queue.
            conn.execute(
                r#"UPDATE hdb_scheduled_events
                   SET error = 1, locked = 0, tries = tries + 1
                   WHERE id = ?1"#,
                [id],
            )?;
            Ok(())
        })
    }

    fn set_scheduled_retry(&self, id: &str, retry_at: i64, invocation: &Invocation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::with_tx(&conn, || {
            Self::insert_invocation(&conn, "hdb_scheduled_event_invocation_logs", id, invocation)?;
            conn.execute(
                r#"UPDATE hdb_scheduled_events
                   SET next_retry_at = ?1, locked = 0, tries = tries + 1
                   WHERE id = ?2"#,
                rusqlite::params![retry_at, id],
            )?;
            Ok(())
        })
    }

    fn mark_scheduled_dead(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE hdb_scheduled_events SET dead = 1, locked = 0 WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    fn mark_scheduled_cancelled(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE hdb_scheduled_events SET cancelled = 1, locked = 0 WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    fn unlock_all_scheduled_events(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let unlocked = conn.execute(
            "UPDATE hdb_scheduled_events SET locked = 0 WHERE locked = 1",
            [],
        )?;
        Ok(unlocked)
    }

    fn scheduled_stats(&self, trigger_name: &str) -> Result<ScheduledTriggerStats> {
        let conn = self.conn.lock().unwrap();
        let stats = conn
            .prepare(
                "SELECT upcoming_events_count, max_scheduled_time \
                 FROM hdb_scheduled_events_stats WHERE name = ?1",
            )?
            .query_row([trigger_name], |row| {
                Ok(ScheduledTriggerStats {
                    upcoming_events_count: row.get(0)?,
                    max_scheduled_time: row.get(1)?,
                })
            })
            .optional()?;
        Ok(stats.unwrap_or(ScheduledTriggerStats {
            upcoming_events_count: 0,
            max_scheduled_time: None,
        }))
    }

    fn scheduled_invocations(&self, event_id: &str) -> Result<Vec<InvocationRow>> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .prepare(
                "SELECT * FROM hdb_scheduled_event_invocation_logs \
                 WHERE event_id = ?1 ORDER BY rowid ASC",
            )?
            .query_map([event_id], Self::row_to_invocation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
