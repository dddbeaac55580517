//! Database schema for the delivery queues.

use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

const EVENT_LOG: Table = Table {
    name: "event_log",
    columns: &[
        Column::new("id", &SqlType::Text).primary_key(),
        Column::new("schema_name", &SqlType::Text).non_null(),
        Column::new("table_name", &SqlType::Text).non_null(),
        Column::new("trigger_name", &SqlType::Text).non_null(),
        Column::new("payload", &SqlType::Text).non_null(),
        Column::new("delivered", &SqlType::Integer).non_null().default("0"),
        Column::new("error", &SqlType::Integer).non_null().default("0"),
        Column::new("tries", &SqlType::Integer).non_null().default("0"),
        Column::new("created_at", &SqlType::Integer)
            .non_null()
            .default(DEFAULT_TIMESTAMP),
        Column::new("locked", &SqlType::Integer).non_null().default("0"),
        Column::new("next_retry_at", &SqlType::Integer),
        Column::new("archived", &SqlType::Integer).non_null().default("0"),
    ],
    indices: &[(
        "idx_event_log_fetch",
        "locked, next_retry_at, created_at",
    )],
    unique_constraints: &[],
};

const SCHEDULED_EVENTS: Table = Table {
    name: "hdb_scheduled_events",
    columns: &[
        Column::new("id", &SqlType::Text).primary_key(),
        Column::new("name", &SqlType::Text).non_null(),
        Column::new("scheduled_time", &SqlType::Integer).non_null(),
        Column::new("additional_payload", &SqlType::Text),
        Column::new("delivered", &SqlType::Integer).non_null().default("0"),
        Column::new("error", &SqlType::Integer).non_null().default("0"),
        Column::new("dead", &SqlType::Integer).non_null().default("0"),
        Column::new("cancelled", &SqlType::Integer).non_null().default("0"),
        Column::new("locked", &SqlType::Integer).non_null().default("0"),
        Column::new("tries", &SqlType::Integer).non_null().default("0"),
        Column::new("created_at", &SqlType::Integer)
            .non_null()
            .default(DEFAULT_TIMESTAMP),
        Column::new("next_retry_at", &SqlType::Integer),
    ],
    indices: &[(
        "idx_scheduled_events_fetch",
        "locked, scheduled_time, next_retry_at",
    )],
    // Makes materializer re-runs idempotent via INSERT OR IGNORE.
    unique_constraints: &[&["name", "scheduled_time"]],
};

const EVENT_INVOCATION_LOGS: Table = Table {
    name: "event_invocation_logs",
    columns: &[
        Column::new("id", &SqlType::Text).primary_key(),
        Column::new("event_id", &SqlType::Text)
            .non_null()
            .references("event_log", "id"),
        Column::new("status", &SqlType::Integer).non_null(),
        Column::new("request", &SqlType::Text).non_null(),
        Column::new("response", &SqlType::Text).non_null(),
        Column::new("created_at", &SqlType::Integer)
            .non_null()
            .default(DEFAULT_TIMESTAMP),
    ],
    indices: &[("idx_event_invocation_logs_event_id", "event_id")],
    unique_constraints: &[],
};

const SCHEDULED_EVENT_INVOCATION_LOGS: Table = Table {
    name: "hdb_scheduled_event_invocation_logs",
    columns: &[
        Column::new("id", &SqlType::Text).primary_key(),
        Column::new("event_id", &SqlType::Text)
            .non_null()
            .references("hdb_scheduled_events", "id"),
        Column::new("status", &SqlType::Integer).non_null(),
        Column::new("request", &SqlType::Text).non_null(),
        Column::new("response", &SqlType::Text).non_null(),
        Column::new("created_at", &SqlType::Integer)
            .non_null()
            .default(DEFAULT_TIMESTAMP),
    ],
    indices: &[(
        "idx_scheduled_event_invocation_logs_event_id",
        "event_id",
    )],
    unique_constraints: &[],
};

/// Upcoming = not terminal and strictly in the future. The materializer tops
/// up any trigger whose count drops below the horizon, extending from
/// max_scheduled_time.
const SCHEDULED_EVENTS_STATS_VIEW: (&str, &str) = (
    "hdb_scheduled_events_stats",
    "SELECT name, \
            COUNT(*) AS upcoming_events_count, \
            MAX(scheduled_time) AS max_scheduled_time \
     FROM hdb_scheduled_events \
     WHERE delivered = 0 AND error = 0 AND dead = 0 AND cancelled = 0 \
       AND scheduled_time > (cast(strftime('%s','now') as int)) \
     GROUP BY name",
);

pub const RELAY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        EVENT_LOG,
        SCHEDULED_EVENTS,
        EVENT_INVOCATION_LOGS,
        SCHEDULED_EVENT_INVOCATION_LOGS,
    ],
    views: &[SCHEDULED_EVENTS_STATS_VIEW],
    migration: None,
}];
