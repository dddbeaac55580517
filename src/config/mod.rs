//! Engine configuration.
//!
//! Tunables come from CLI flags first, then the environment, then the
//! defaults below.

use anyhow::{Context, Result};
use std::time::Duration;

pub const ENV_HTTP_POOL_SIZE: &str = "EVENTS_HTTP_POOL_SIZE";
pub const ENV_FETCH_INTERVAL_MS: &str = "EVENTS_FETCH_INTERVAL_MS";

pub const DEFAULT_HTTP_POOL_SIZE: usize = 100;
pub const DEFAULT_FETCH_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_FETCH_BATCH_SIZE: usize = 100;
pub const DEFAULT_SCHEDULED_TICK_SECONDS: u64 = 60;
pub const DEFAULT_CRON_HORIZON: usize = 100;
pub const DEFAULT_DELIVERY_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Global cap on in-flight webhook requests.
    pub http_pool_size: usize,
    /// Sleep between event-queue fetches when the queue is idle.
    pub fetch_interval: Duration,
    /// Rows leased per fetch, both queues.
    pub fetch_batch_size: usize,
    /// Sleep between scheduled-queue iterations.
    pub scheduled_tick_interval: Duration,
    /// Upcoming-event count the materializer keeps per cron trigger.
    pub cron_horizon: usize,
    /// Per-attempt delivery timeout when the trigger does not override it.
    pub default_timeout_seconds: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            http_pool_size: DEFAULT_HTTP_POOL_SIZE,
            fetch_interval: Duration::from_millis(DEFAULT_FETCH_INTERVAL_MS),
            fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
            scheduled_tick_interval: Duration::from_secs(DEFAULT_SCHEDULED_TICK_SECONDS),
            cron_horizon: DEFAULT_CRON_HORIZON,
            default_timeout_seconds: DEFAULT_DELIVERY_TIMEOUT_SECONDS,
        }
    }
}

impl EngineSettings {
    /// Resolve settings from optional CLI overrides and the environment.
    pub fn resolve(
        http_pool_size: Option<usize>,
        fetch_interval_ms: Option<u64>,
    ) -> Result<Self> {
        let mut settings = Self::default();

        match http_pool_size {
            Some(size) => settings.http_pool_size = size,
            None => {
                if let Ok(raw) = std::env::var(ENV_HTTP_POOL_SIZE) {
                    settings.http_pool_size = raw
                        .parse()
                        .with_context(|| format!("Invalid {}: {:?}", ENV_HTTP_POOL_SIZE, raw))?;
                }
            }
        }

        match fetch_interval_ms {
            Some(ms) => settings.fetch_interval = Duration::from_millis(ms),
            None => {
                if let Ok(raw) = std::env::var(ENV_FETCH_INTERVAL_MS) {
                    let ms: u64 = raw
                        .parse()
                        .with_context(|| format!("Invalid {}: {:?}", ENV_FETCH_INTERVAL_MS, raw))?;
                    settings.fetch_interval = Duration::from_millis(ms);
                }
            }
        }

        Ok(settings)
    }
}
