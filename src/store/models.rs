//! Row models for the delivery queues and their invocation logs.

use serde_json::Value as JsonValue;

/// A row-change event awaiting delivery.
#[derive(Debug, Clone)]
pub struct EventRow {
    /// Unique identifier (UUID).
    pub id: String,
    /// Source table schema.
    pub schema_name: String,
    /// Source table name.
    pub table_name: String,
    /// Name of the trigger this event belongs to.
    pub trigger_name: String,
    /// Row-change delta as produced by the database trigger.
    pub payload: JsonValue,
    pub delivered: bool,
    pub error: bool,
    /// Number of delivery attempts recorded so far.
    pub tries: i64,
    /// Unix timestamp of insertion.
    pub created_at: i64,
    /// Held by exactly one worker while true.
    pub locked: bool,
    /// When set, the row becomes eligible again once this time passes.
    pub next_retry_at: Option<i64>,
    pub archived: bool,
}

impl EventRow {
    pub fn new(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        trigger_name: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            trigger_name: trigger_name.into(),
            payload,
            delivered: false,
            error: false,
            tries: 0,
            created_at: chrono::Utc::now().timestamp(),
            locked: false,
            next_retry_at: None,
            archived: false,
        }
    }
}

/// A scheduled event, either cron-materialized or inserted ad-hoc.
#[derive(Debug, Clone)]
pub struct ScheduledEventRow {
    pub id: String,
    /// Name of the scheduled trigger this event belongs to.
    pub name: String,
    /// Unix timestamp the event is due at.
    pub scheduled_time: i64,
    /// Per-event payload override; falls back to the trigger default.
    pub additional_payload: Option<JsonValue>,
    pub delivered: bool,
    pub error: bool,
    pub dead: bool,
    pub cancelled: bool,
    pub locked: bool,
    pub tries: i64,
    pub created_at: i64,
    pub next_retry_at: Option<i64>,
}

impl ScheduledEventRow {
    pub fn new(name: impl Into<String>, scheduled_time: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            scheduled_time,
            additional_payload: None,
            delivered: false,
            error: false,
            dead: false,
            cancelled: false,
            locked: false,
            tries: 0,
            created_at: chrono::Utc::now().timestamp(),
            next_retry_at: None,
        }
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.additional_payload = Some(payload);
        self
    }
}

/// One delivery attempt to be recorded alongside a row transition.
///
/// Writing an invocation is what bumps the row's `tries` counter, so every
/// attempt is counted exactly once.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: String,
    /// HTTP status, or a synthesized client-error code (>= 1000, or 500).
    pub status: i64,
    /// Serialized request envelope (payload + headers + version).
    pub request: JsonValue,
    /// Serialized response envelope (webhook_response or client_error).
    pub response: JsonValue,
}

impl Invocation {
    pub fn new(status: i64, request: JsonValue, response: JsonValue) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status,
            request,
            response,
        }
    }
}

/// A recorded invocation, read back from the log.
#[derive(Debug, Clone)]
pub struct InvocationRow {
    pub id: String,
    pub event_id: String,
    pub status: i64,
    pub request: JsonValue,
    pub response: JsonValue,
    pub created_at: i64,
}

/// One row of the scheduled-events stats view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTriggerStats {
    /// Non-terminal rows with `scheduled_time` strictly in the future.
    pub upcoming_events_count: i64,
    /// Latest `scheduled_time` among those upcoming rows.
    pub max_scheduled_time: Option<i64>,
}
