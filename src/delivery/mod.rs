//! Webhook delivery: request composition, HTTP dispatch, outcome
//! classification, retry decisions and invocation recording.

mod client;
pub mod envelope;
mod pipeline;
mod retry;

pub use client::{
    parse_retry_after, DeliveryOutcome, WebhookClient, STATUS_BODY_ERROR, STATUS_OTHER_ERROR,
    STATUS_TRANSPORT_ERROR,
};
pub use pipeline::{DeliveryError, DeliveryPipeline};
pub use retry::{RetryPolicy, Transition};
