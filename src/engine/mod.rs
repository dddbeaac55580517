//! Engine supervisor.
//!
//! Owns the two worker loops and their lifecycle. On startup both queues are
//! swept for rows left locked by an earlier ungraceful exit; shutdown is
//! cooperative, letting in-flight deliveries finish while no new batches are
//! leased.

use crate::config::EngineSettings;
use crate::delivery::{DeliveryPipeline, WebhookClient};
use crate::materializer::Materializer;
use crate::registry::RegistryProvider;
use crate::store::{EventRow, EventStore};
use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Engine {
    store: Arc<dyn EventStore>,
    registry: Arc<dyn RegistryProvider>,
    pipeline: Arc<DeliveryPipeline>,
    materializer: Materializer,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<dyn RegistryProvider>,
        settings: EngineSettings,
    ) -> Result<Self> {
        let client = WebhookClient::new(Duration::from_secs(settings.default_timeout_seconds))?;
        let pipeline = Arc::new(DeliveryPipeline::new(
            store.clone(),
            client,
            settings.http_pool_size,
        ));
        let materializer = Materializer::new(store.clone(), settings.cron_horizon);
        Ok(Self {
            store,
            registry,
            pipeline,
            materializer,
            settings,
        })
    }

    /// Run both worker loops until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let events_unlocked = self.store.unlock_all_events()?;
        let scheduled_unlocked = self.store.unlock_all_scheduled_events()?;
        if events_unlocked > 0 || scheduled_unlocked > 0 {
            info!(
                events_unlocked,
                scheduled_unlocked, "Unlocked rows left over from a previous run"
            );
        }

        tokio::join!(
            self.run_event_loop(shutdown.clone()),
            self.run_scheduled_loop(shutdown)
        );
        Ok(())
    }

    /// Lease one event batch on the blocking pool.
    async fn fetch_event_batch(&self) -> Vec<EventRow> {
        let store = self.store.clone();
        let batch_size = self.settings.fetch_batch_size;
        let result = tokio::task::spawn_blocking(move || {
            store.lease_events(batch_size, chrono::Utc::now().timestamp())
        })
        .await;
        match result {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                error!(target: "event_trigger_log", "Failed to lease events: {e:#}");
                Vec::new()
            }
            Err(e) => {
                error!(target: "event_trigger_log", "Event lease task failed: {e}");
                Vec::new()
            }
        }
    }

    /// Event-queue loop, double-buffered: while the current batch is being
    /// dispatched, the next lease runs in parallel.
    async fn run_event_loop(&self, shutdown: CancellationToken) {
        info!(
            target: "event_trigger_log",
            batch_size = self.settings.fetch_batch_size,
            fetch_interval_ms = self.settings.fetch_interval.as_millis() as u64,
            "Event delivery loop starting"
        );

        let mut full_streak: u32 = 0;
        let mut saturation_hinted = false;
        let mut current: Vec<EventRow> = Vec::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if current.is_empty() {
                current = self.fetch_event_batch().await;
                if current.is_empty() {
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.fetch_interval) => {}
                        _ = shutdown.cancelled() => break,
                    }
                    continue;
                }
            }

            if current.len() == self.settings.fetch_batch_size {
                full_streak += 1;
                if full_streak == 3 && !saturation_hinted {
                    warn!(
                        target: "event_trigger_log",
                        "Event queue is saturated: three consecutive full batches; \
                         consider a larger HTTP pool or more instances"
                    );
                    saturation_hinted = true;
                }
            } else {
                if saturation_hinted {
                    info!(
                        target: "event_trigger_log",
                        "Event queue recovered: fetched a non-full batch"
                    );
                    saturation_hinted = false;
                }
                full_streak = 0;
            }

            let registry = match self.registry.snapshot() {
                Ok(registry) => registry,
                Err(e) => {
                    // Keep the leased batch and retry the snapshot next turn.
                    error!(target: "event_trigger_log", "Failed to load trigger snapshot: {e:#}");
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.fetch_interval) => {}
                        _ = shutdown.cancelled() => break,
                    }
                    continue;
                }
            };

            let prefetch = {
                let store = self.store.clone();
                let batch_size = self.settings.fetch_batch_size;
                tokio::task::spawn_blocking(move || {
                    store.lease_events(batch_size, chrono::Utc::now().timestamp())
                })
            };

            let results = join_all(
                current
                    .iter()
                    .map(|event| self.pipeline.deliver_event(&registry, event)),
            )
            .await;
            for result in results {
                if let Err(e) = result {
                    error!(target: "event_trigger_log", "Failed to record delivery outcome: {e:#}");
                }
            }

            current = match prefetch.await {
                Ok(Ok(batch)) => batch,
                Ok(Err(e)) => {
                    error!(target: "event_trigger_log", "Failed to lease events: {e:#}");
                    Vec::new()
                }
                Err(e) => {
                    error!(target: "event_trigger_log", "Event lease task failed: {e}");
                    Vec::new()
                }
            };
        }

        info!(target: "event_trigger_log", "Event delivery loop stopped");
    }

    /// Scheduled-queue loop: materialize, lease, dispatch sequentially,
    /// sleep.
    async fn run_scheduled_loop(&self, shutdown: CancellationToken) {
        info!(
            target: "scheduled_trigger_log",
            tick_seconds = self.settings.scheduled_tick_interval.as_secs(),
            horizon = self.settings.cron_horizon,
            "Scheduled delivery loop starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.registry.snapshot() {
                Ok(registry) => {
                    if let Err(e) = self.materializer.run_pass(&registry) {
                        error!(target: "scheduled_trigger_log", "Materializer pass failed: {e:#}");
                    }

                    let now = chrono::Utc::now().timestamp();
                    match self
                        .store
                        .lease_scheduled_events(self.settings.fetch_batch_size, now)
                    {
                        Ok(batch) => {
                            for event in &batch {
                                if shutdown.is_cancelled() {
                                    break;
                                }
                                if let Err(e) =
                                    self.pipeline.deliver_scheduled(&registry, event).await
                                {
                                    error!(
                                        target: "scheduled_trigger_log",
                                        event_id = %event.id,
                                        "Failed to record delivery outcome: {e:#}"
                                    );
                                }
                            }
                        }
                        Err(e) => {
                            error!(
                                target: "scheduled_trigger_log",
                                "Failed to lease scheduled events: {e:#}"
                            );
                        }
                    }
                }
                Err(e) => {
                    error!(
                        target: "scheduled_trigger_log",
                        "Failed to load trigger snapshot: {e:#}"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.scheduled_tick_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!(target: "scheduled_trigger_log", "Scheduled delivery loop stopped");
    }
}
