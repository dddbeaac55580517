//! Per-row delivery pipeline.
//!
//! For each leased row: resolve the trigger, compose the request, acquire a
//! global in-flight permit, post, classify the result, then record the
//! invocation and the row transition atomically.

use super::client::{DeliveryOutcome, WebhookClient};
use super::envelope;
use super::retry::{RetryPolicy, Transition};
use crate::registry::TriggerRegistry;
use crate::store::{EventRow, EventStore, Invocation, ScheduledEventRow};
use anyhow::Result;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("trigger '{0}' not found in the registry snapshot")]
    TriggerNotFound(String),
}

/// Shared delivery machinery for both queues.
pub struct DeliveryPipeline {
    store: Arc<dyn EventStore>,
    client: WebhookClient,
    /// Global cap on in-flight webhook requests across both queues.
    permits: Arc<Semaphore>,
    event_saturation_warned: AtomicBool,
    scheduled_saturation_warned: AtomicBool,
}

impl DeliveryPipeline {
    pub fn new(store: Arc<dyn EventStore>, client: WebhookClient, pool_size: usize) -> Self {
        Self {
            store,
            client,
            permits: Arc::new(Semaphore::new(pool_size)),
            event_saturation_warned: AtomicBool::new(false),
            scheduled_saturation_warned: AtomicBool::new(false),
        }
    }

    /// Deliver one leased row-change event and record the outcome.
    ///
    /// A missing trigger is logged and the row is left untouched (it stays
    /// locked until a startup sweep unlocks it).
    pub async fn deliver_event(
        &self,
        registry: &TriggerRegistry,
        event: &EventRow,
    ) -> Result<()> {
        let trigger = match registry.event_trigger(&event.trigger_name) {
            Some(trigger) => trigger,
            None => {
                error!(
                    target: "event_trigger_log",
                    event_id = %event.id,
                    "{}",
                    DeliveryError::TriggerNotFound(event.trigger_name.clone())
                );
                return Ok(());
            }
        };

        let body = envelope::event_body(event, &trigger.retry_conf);
        let headers = envelope::merge_headers(&trigger.headers);
        let outcome = self
            .dispatch(
                &trigger.webhook,
                &headers,
                &body,
                trigger.retry_conf.timeout_seconds,
                &self.event_saturation_warned,
            )
            .await;
        let invocation = Invocation::new(
            outcome.log_status(),
            envelope::request_log(&body, &headers),
            envelope::response_log(&outcome),
        );

        let policy = RetryPolicy::new(&trigger.retry_conf);
        let now = chrono::Utc::now().timestamp();
        match policy.next_transition(&outcome, event.tries, now) {
            Transition::Success => {
                self.store.mark_event_success(&event.id, &invocation)?;
                info!(
                    target: "event_trigger_log",
                    event_id = %event.id,
                    trigger = %event.trigger_name,
                    "Event delivered"
                );
            }
            Transition::Retry(retry_at) => {
                self.store.set_event_retry(&event.id, retry_at, &invocation)?;
                info!(
                    target: "event_trigger_log",
                    event_id = %event.id,
                    trigger = %event.trigger_name,
                    status = invocation.status,
                    retry_at,
                    "Event delivery failed, retry scheduled"
                );
            }
            Transition::Error => {
                self.store.mark_event_error(&event.id, &invocation)?;
                warn!(
                    target: "event_trigger_log",
                    event_id = %event.id,
                    trigger = %event.trigger_name,
                    status = invocation.status,
                    "Event delivery failed permanently"
                );
            }
        }
        Ok(())
    }

    /// Deliver one leased scheduled event and record the outcome.
    ///
    /// Events past their tolerance window are marked dead without a request
    /// or an invocation row.
    pub async fn deliver_scheduled(
        &self,
        registry: &TriggerRegistry,
        event: &ScheduledEventRow,
    ) -> Result<()> {
        let trigger = match registry.scheduled_trigger(&event.name) {
            Some(trigger) => trigger,
            None => {
                error!(
                    target: "scheduled_trigger_log",
                    event_id = %event.id,
                    "{}",
                    DeliveryError::TriggerNotFound(event.name.clone())
                );
                return Ok(());
            }
        };

        let now = chrono::Utc::now().timestamp();
        if now - event.scheduled_time > trigger.tolerance_seconds as i64 {
            self.store.mark_scheduled_dead(&event.id)?;
            info!(
                target: "scheduled_trigger_log",
                event_id = %event.id,
                trigger = %event.name,
                scheduled_time = event.scheduled_time,
                "Scheduled event past tolerance, marked dead"
            );
            return Ok(());
        }

        let body = envelope::scheduled_body(event, trigger);
        let headers = envelope::merge_headers(&trigger.headers);
        let outcome = self
            .dispatch(
                &trigger.webhook,
                &headers,
                &body,
                trigger.retry_conf.timeout_seconds,
                &self.scheduled_saturation_warned,
            )
            .await;
        let invocation = Invocation::new(
            outcome.log_status(),
            envelope::request_log(&body, &headers),
            envelope::response_log(&outcome),
        );

        let policy = RetryPolicy::new(&trigger.retry_conf);
        let now = chrono::Utc::now().timestamp();
        match policy.next_transition(&outcome, event.tries, now) {
            Transition::Success => {
                self.store.mark_scheduled_success(&event.id, &invocation)?;
                info!(
                    target: "scheduled_trigger_log",
                    event_id = %event.id,
                    trigger = %event.name,
                    "Scheduled event delivered"
                );
            }
            Transition::Retry(retry_at) => {
                self.store
                    .set_scheduled_retry(&event.id, retry_at, &invocation)?;
                info!(
                    target: "scheduled_trigger_log",
                    event_id = %event.id,
                    trigger = %event.name,
                    status = invocation.status,
                    retry_at,
                    "Scheduled delivery failed, retry scheduled"
                );
            }
            Transition::Error => {
                self.store.mark_scheduled_error(&event.id, &invocation)?;
                warn!(
                    target: "scheduled_trigger_log",
                    event_id = %event.id,
                    trigger = %event.name,
                    status = invocation.status,
                    "Scheduled delivery failed permanently"
                );
            }
        }
        Ok(())
    }

    /// Acquire one in-flight permit, post, and release the permit. The
    /// permit is released on every path by drop.
    async fn dispatch(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &JsonValue,
        timeout_seconds: u64,
        saturation_warned: &AtomicBool,
    ) -> DeliveryOutcome {
        // Heuristic: this check races the acquire below, so the warning can
        // fire without an actual wait and a wait can go unwarned.
        if self.permits.available_permits() == 0
            && !saturation_warned.swap(true, Ordering::Relaxed)
        {
            warn!(
                target: "http_log",
                "Webhook delivery pool saturated, dispatch will wait for a permit"
            );
        }
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return DeliveryOutcome::RequestError {
                    message: "delivery permit pool closed".to_string(),
                }
            }
        };

        let outcome = self
            .client
            .deliver(url, headers, body, Duration::from_secs(timeout_seconds))
            .await;
        info!(
            target: "http_log",
            url,
            status = outcome.log_status(),
            "Webhook request finished"
        );
        outcome
    }
}
