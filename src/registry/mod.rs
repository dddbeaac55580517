//! Trigger configuration registry.
//!
//! The engine resolves trigger names against a read-only snapshot provided
//! by a collaborator. Snapshots are requested once per processing cycle.

mod file_registry;
mod models;

use anyhow::Result;
use std::sync::Arc;

pub use file_registry::FileRegistryProvider;
pub use models::{
    EventTriggerConfig, RetryConf, ScheduleSpec, ScheduledTriggerConfig, TriggerRegistry,
    WebhookHeader, DEFAULT_TOLERANCE_SECONDS,
};

/// Source of trigger configuration snapshots.
pub trait RegistryProvider: Send + Sync {
    fn snapshot(&self) -> Result<Arc<TriggerRegistry>>;
}

/// Fixed registry, used by tests and embedders with static configuration.
pub struct StaticRegistryProvider {
    registry: Arc<TriggerRegistry>,
}

impl StaticRegistryProvider {
    pub fn new(registry: TriggerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

impl RegistryProvider for StaticRegistryProvider {
    fn snapshot(&self) -> Result<Arc<TriggerRegistry>> {
        Ok(self.registry.clone())
    }
}
