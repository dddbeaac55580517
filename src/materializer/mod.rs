//! Cron-horizon materialization for scheduled triggers.
//!
//! Cron triggers are delivered from pre-materialized queue rows. Once per
//! scheduled tick the materializer tops up every cron trigger whose upcoming
//! horizon has dropped below the configured size, extending from the latest
//! already-materialized firing time. Ad-hoc triggers are never materialized.

mod cron;

pub use cron::{generate_schedule_times, parse_cron};

use crate::registry::TriggerRegistry;
use crate::store::{EventStore, ScheduledEventRow};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one materializer pass, for logging.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaterializerReport {
    /// Cron triggers whose horizon was below the threshold.
    pub triggers_topped_up: usize,
    /// New rows actually inserted (conflicting firings are ignored).
    pub events_inserted: usize,
}

pub struct Materializer {
    store: Arc<dyn EventStore>,
    /// Upcoming-event count every cron trigger is kept at.
    horizon: usize,
}

impl Materializer {
    pub fn new(store: Arc<dyn EventStore>, horizon: usize) -> Self {
        Self { store, horizon }
    }

    /// Top up every cron trigger in the snapshot whose upcoming-event count
    /// has dropped below the horizon. Idempotent: firings that already exist
    /// are skipped by the unique `(name, scheduled_time)` constraint.
    pub fn run_pass(&self, registry: &TriggerRegistry) -> Result<MaterializerReport> {
        let mut report = MaterializerReport::default();

        for (trigger, expression) in registry.cron_triggers() {
            let schedule = match parse_cron(expression) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!(
                        target: "scheduled_trigger_log",
                        trigger = %trigger.name,
                        "Skipping materialization: {e}"
                    );
                    continue;
                }
            };

            let stats = self.store.scheduled_stats(&trigger.name)?;
            if stats.upcoming_events_count >= self.horizon as i64 {
                continue;
            }

            let from = stats
                .max_scheduled_time
                .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
                .unwrap_or_else(Utc::now);
            let times = generate_schedule_times(&schedule, from, self.horizon);
            let rows: Vec<ScheduledEventRow> = times
                .iter()
                .map(|t| ScheduledEventRow::new(&trigger.name, t.timestamp()))
                .collect();

            let inserted = self.store.insert_scheduled_events(&rows)?;
            debug!(
                target: "scheduled_trigger_log",
                trigger = %trigger.name,
                upcoming = stats.upcoming_events_count,
                inserted,
                "Materialized cron events"
            );
            report.triggers_topped_up += 1;
            report.events_inserted += inserted;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RetryConf, ScheduleSpec, ScheduledTriggerConfig, TriggerRegistry};
    use crate::store::SqliteEventStore;

    const HORIZON: usize = 100;

    fn cron_trigger(name: &str, expr: &str) -> ScheduledTriggerConfig {
        ScheduledTriggerConfig {
            name: name.to_string(),
            webhook: "http://localhost:9000/hook".to_string(),
            headers: vec![],
            retry_conf: RetryConf::default(),
            schedule: ScheduleSpec::Cron(expr.to_string()),
            payload: None,
            tolerance_seconds: 60,
        }
    }

    fn registry_with(triggers: Vec<ScheduledTriggerConfig>) -> TriggerRegistry {
        TriggerRegistry::new(vec![], triggers)
    }

    #[test]
    fn materializes_full_horizon_for_a_fresh_trigger() {
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let materializer = Materializer::new(store.clone(), HORIZON);
        let registry = registry_with(vec![cron_trigger("every_five", "*/5 * * * *")]);

        let report = materializer.run_pass(&registry).unwrap();
        assert_eq!(report.triggers_topped_up, 1);
        assert_eq!(report.events_inserted, HORIZON);

        let stats = store.scheduled_stats("every_five").unwrap();
        assert_eq!(stats.upcoming_events_count, HORIZON as i64);
    }

    #[test]
    fn tops_up_beyond_the_existing_horizon() {
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let schedule = parse_cron("*/5 * * * *").unwrap();

        // Pre-materialize 30 upcoming firings by hand.
        let existing = generate_schedule_times(&schedule, Utc::now(), 30);
        let max_existing = existing.last().unwrap().timestamp();
        let rows: Vec<_> = existing
            .iter()
            .map(|t| ScheduledEventRow::new("every_five", t.timestamp()))
            .collect();
        store.insert_scheduled_events(&rows).unwrap();

        let materializer = Materializer::new(store.clone(), HORIZON);
        let registry = registry_with(vec![cron_trigger("every_five", "*/5 * * * *")]);
        let report = materializer.run_pass(&registry).unwrap();
        assert_eq!(report.events_inserted, HORIZON);

        let stats = store.scheduled_stats("every_five").unwrap();
        assert_eq!(stats.upcoming_events_count, 130);
        // The new rows extend strictly past the previous horizon.
        assert!(stats.max_scheduled_time.unwrap() > max_existing);
    }

    #[test]
    fn back_to_back_passes_are_idempotent() {
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let materializer = Materializer::new(store.clone(), HORIZON);
        let registry = registry_with(vec![cron_trigger("every_five", "*/5 * * * *")]);

        materializer.run_pass(&registry).unwrap();
        let second = materializer.run_pass(&registry).unwrap();

        // Horizon is already full; the second pass changes nothing.
        assert_eq!(second.triggers_topped_up, 0);
        assert_eq!(second.events_inserted, 0);
        let stats = store.scheduled_stats("every_five").unwrap();
        assert_eq!(stats.upcoming_events_count, HORIZON as i64);
    }

    #[test]
    fn skips_triggers_at_or_above_the_horizon() {
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let materializer = Materializer::new(store.clone(), 10);
        let registry = registry_with(vec![cron_trigger("hourly", "0 * * * *")]);

        materializer.run_pass(&registry).unwrap();
        let report = materializer.run_pass(&registry).unwrap();
        assert_eq!(report.triggers_topped_up, 0);
    }

    #[test]
    fn invalid_expression_is_skipped_not_fatal() {
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let materializer = Materializer::new(store.clone(), HORIZON);
        let registry = registry_with(vec![
            cron_trigger("broken", "this is not cron"),
            cron_trigger("hourly", "0 * * * *"),
        ]);

        let report = materializer.run_pass(&registry).unwrap();
        assert_eq!(report.triggers_topped_up, 1);
        assert_eq!(
            store.scheduled_stats("broken").unwrap().upcoming_events_count,
            0
        );
    }

    #[test]
    fn adhoc_triggers_are_never_materialized() {
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let materializer = Materializer::new(store.clone(), HORIZON);
        let mut trigger = cron_trigger("manual", "0 * * * *");
        trigger.schedule = ScheduleSpec::AdHoc;
        let registry = registry_with(vec![trigger]);

        let report = materializer.run_pass(&registry).unwrap();
        assert_eq!(report, MaterializerReport::default());
    }
}
