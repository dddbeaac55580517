//! TOML-backed trigger registry.
//!
//! The triggers file is the collaborator-supplied configuration snapshot; it
//! is re-read on every `snapshot()` call so edits become visible at the next
//! engine tick without a restart.

use super::models::*;
use super::RegistryProvider;
use crate::materializer::parse_cron;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TriggersFile {
    event_triggers: Vec<EventTriggerEntry>,
    scheduled_triggers: Vec<ScheduledTriggerEntry>,
}

#[derive(Debug, Deserialize)]
struct EventTriggerEntry {
    name: String,
    webhook: String,
    #[serde(default)]
    headers: Vec<WebhookHeader>,
    #[serde(default)]
    retry_conf: RetryConf,
}

#[derive(Debug, Deserialize)]
struct ScheduledTriggerEntry {
    name: String,
    webhook: String,
    #[serde(default)]
    headers: Vec<WebhookHeader>,
    #[serde(default)]
    retry_conf: RetryConf,
    /// Cron expression; omit for an ad-hoc trigger.
    cron: Option<String>,
    payload: Option<JsonValue>,
    #[serde(default = "default_tolerance")]
    tolerance_seconds: u64,
}

fn default_tolerance() -> u64 {
    DEFAULT_TOLERANCE_SECONDS
}

/// Loads [`TriggerRegistry`] snapshots from a TOML file.
pub struct FileRegistryProvider {
    path: PathBuf,
}

impl FileRegistryProvider {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn load(&self) -> Result<TriggerRegistry> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read triggers file: {:?}", self.path))?;
        let file: TriggersFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse triggers file: {:?}", self.path))?;

        let event_triggers = file
            .event_triggers
            .into_iter()
            .map(|entry| EventTriggerConfig {
                name: entry.name,
                webhook: entry.webhook,
                headers: entry.headers,
                retry_conf: entry.retry_conf,
            })
            .collect();

        let scheduled_triggers = file
            .scheduled_triggers
            .into_iter()
            .map(|entry| {
                let schedule = match entry.cron {
                    Some(expr) => {
                        parse_cron(&expr).with_context(|| {
                            format!("Trigger '{}' has an invalid cron expression", entry.name)
                        })?;
                        ScheduleSpec::Cron(expr)
                    }
                    None => ScheduleSpec::AdHoc,
                };
                Ok(ScheduledTriggerConfig {
                    name: entry.name,
                    webhook: entry.webhook,
                    headers: entry.headers,
                    retry_conf: entry.retry_conf,
                    schedule,
                    payload: entry.payload,
                    tolerance_seconds: entry.tolerance_seconds,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TriggerRegistry::new(event_triggers, scheduled_triggers))
    }
}

impl RegistryProvider for FileRegistryProvider {
    fn snapshot(&self) -> Result<Arc<TriggerRegistry>> {
        Ok(Arc::new(self.load()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_triggers(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triggers.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_event_and_scheduled_triggers() {
        let (_dir, path) = write_triggers(
            r#"
            [[event_triggers]]
            name = "users_sync"
            webhook = "http://localhost:9000/users"

            [event_triggers.retry_conf]
            num_retries = 3
            interval_seconds = 15

            [[event_triggers.headers]]
            name = "Authorization"
            value = "Bearer abc"

            [[scheduled_triggers]]
            name = "nightly_report"
            webhook = "http://localhost:9000/report"
            cron = "0 2 * * *"
            tolerance_seconds = 120
            payload = { report = "daily" }

            [[scheduled_triggers]]
            name = "manual_resync"
            webhook = "http://localhost:9000/resync"
            "#,
        );

        let registry = FileRegistryProvider::new(&path).snapshot().unwrap();
        assert_eq!(registry.event_trigger_count(), 1);
        assert_eq!(registry.scheduled_trigger_count(), 2);

        let et = registry.event_trigger("users_sync").unwrap();
        assert_eq!(et.retry_conf.num_retries, 3);
        assert_eq!(et.retry_conf.interval_seconds, 15);
        assert_eq!(et.retry_conf.timeout_seconds, 60);
        assert_eq!(et.headers[0].name, "Authorization");

        let st = registry.scheduled_trigger("nightly_report").unwrap();
        assert_eq!(st.schedule, ScheduleSpec::Cron("0 2 * * *".to_string()));
        assert_eq!(st.tolerance_seconds, 120);
        assert_eq!(st.payload, Some(serde_json::json!({"report": "daily"})));

        let adhoc = registry.scheduled_trigger("manual_resync").unwrap();
        assert_eq!(adhoc.schedule, ScheduleSpec::AdHoc);
        assert_eq!(adhoc.tolerance_seconds, DEFAULT_TOLERANCE_SECONDS);
    }

    #[test]
    fn rejects_invalid_cron_expression() {
        let (_dir, path) = write_triggers(
            r#"
            [[scheduled_triggers]]
            name = "broken"
            webhook = "http://localhost:9000/hook"
            cron = "not a schedule"
            "#,
        );

        let result = FileRegistryProvider::new(&path).snapshot();
        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("broken"));
    }

    #[test]
    fn snapshot_sees_file_edits() {
        let (_dir, path) = write_triggers(
            r#"
            [[event_triggers]]
            name = "first"
            webhook = "http://localhost:9000/a"
            "#,
        );
        let provider = FileRegistryProvider::new(&path);
        assert_eq!(provider.snapshot().unwrap().event_trigger_count(), 1);

        std::fs::write(
            &path,
            r#"
            [[event_triggers]]
            name = "first"
            webhook = "http://localhost:9000/a"

            [[event_triggers]]
            name = "second"
            webhook = "http://localhost:9000/b"
            "#,
        )
        .unwrap();
        assert_eq!(provider.snapshot().unwrap().event_trigger_count(), 2);
    }
}
