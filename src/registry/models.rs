//! Trigger configuration models.
//!
//! The engine never mutates these; it consumes a fresh snapshot once per
//! processing cycle so configuration changes become visible without a
//! restart.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Retry behavior for a trigger's deliveries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConf {
    /// Retries allowed after the first attempt.
    pub num_retries: i64,
    /// Delay before the next attempt when the webhook sent no Retry-After.
    pub interval_seconds: u64,
    /// Per-attempt request timeout.
    pub timeout_seconds: u64,
}

impl Default for RetryConf {
    fn default() -> Self {
        Self {
            num_retries: 0,
            interval_seconds: 10,
            timeout_seconds: 60,
        }
    }
}

/// A header sent with every delivery for a trigger, value already resolved.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookHeader {
    pub name: String,
    pub value: String,
}

/// Configuration of a row-change event trigger.
#[derive(Debug, Clone)]
pub struct EventTriggerConfig {
    pub name: String,
    /// Resolved webhook URL.
    pub webhook: String,
    pub headers: Vec<WebhookHeader>,
    pub retry_conf: RetryConf,
}

/// When a scheduled trigger fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// Standard five/six-field cron expression, evaluated in UTC.
    Cron(String),
    /// Events are inserted externally; nothing is materialized.
    AdHoc,
}

/// Configuration of a scheduled trigger.
#[derive(Debug, Clone)]
pub struct ScheduledTriggerConfig {
    pub name: String,
    pub webhook: String,
    pub headers: Vec<WebhookHeader>,
    pub retry_conf: RetryConf,
    pub schedule: ScheduleSpec,
    /// Default delivery payload, overridable per event.
    pub payload: Option<JsonValue>,
    /// Maximum lateness before an event is declared dead instead of
    /// delivered.
    pub tolerance_seconds: u64,
}

pub const DEFAULT_TOLERANCE_SECONDS: u64 = 21_600;

/// Read-only snapshot of every configured trigger, keyed by name.
#[derive(Debug, Default)]
pub struct TriggerRegistry {
    event_triggers: HashMap<String, EventTriggerConfig>,
    scheduled_triggers: HashMap<String, ScheduledTriggerConfig>,
}

impl TriggerRegistry {
    pub fn new(
        event_triggers: Vec<EventTriggerConfig>,
        scheduled_triggers: Vec<ScheduledTriggerConfig>,
    ) -> Self {
        Self {
            event_triggers: event_triggers
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
            scheduled_triggers: scheduled_triggers
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        }
    }

    pub fn event_trigger(&self, name: &str) -> Option<&EventTriggerConfig> {
        self.event_triggers.get(name)
    }

    pub fn scheduled_trigger(&self, name: &str) -> Option<&ScheduledTriggerConfig> {
        self.scheduled_triggers.get(name)
    }

    /// Scheduled triggers with a cron schedule, i.e. the ones the
    /// materializer keeps topped up.
    pub fn cron_triggers(&self) -> impl Iterator<Item = (&ScheduledTriggerConfig, &str)> {
        self.scheduled_triggers.values().filter_map(|t| match &t.schedule {
            ScheduleSpec::Cron(expr) => Some((t, expr.as_str())),
            ScheduleSpec::AdHoc => None,
        })
    }

    pub fn event_trigger_count(&self) -> usize {
        self.event_triggers.len()
    }

    pub fn scheduled_trigger_count(&self) -> usize {
        self.scheduled_triggers.len()
    }
}
