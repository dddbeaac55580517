//! HTTP client for webhook deliveries.
//!
//! Every attempt resolves to a [`DeliveryOutcome`]; transport and parse
//! failures are data, not errors, so the pipeline can record and classify
//! them uniformly.

use anyhow::Result;
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Synthesized status for transport-level failures (DNS, connect, timeout).
pub const STATUS_TRANSPORT_ERROR: i64 = 1000;
/// Synthesized status for a response whose body could not be read.
pub const STATUS_BODY_ERROR: i64 = 1001;
/// Synthesized status for request-construction and other client failures.
pub const STATUS_OTHER_ERROR: i64 = 500;

/// The classified result of one delivery attempt.
///
/// Synthesized statuses are >= 1000 (or 500); real HTTP codes never collide
/// with them.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// The webhook answered with an HTTP status.
    Response {
        status: u16,
        body: String,
        headers: Vec<(String, String)>,
        /// Parsed positive-integer `Retry-After` seconds, if sent.
        retry_after: Option<u64>,
    },
    /// The request never produced a response.
    TransportError { message: String },
    /// A response arrived but its body could not be read.
    BodyReadError { message: String },
    /// The request could not be constructed or failed inside the client.
    RequestError { message: String },
}

impl DeliveryOutcome {
    /// The status recorded in the invocation log.
    pub fn log_status(&self) -> i64 {
        match self {
            DeliveryOutcome::Response { status, .. } => i64::from(*status),
            DeliveryOutcome::TransportError { .. } => STATUS_TRANSPORT_ERROR,
            DeliveryOutcome::BodyReadError { .. } => STATUS_BODY_ERROR,
            DeliveryOutcome::RequestError { .. } => STATUS_OTHER_ERROR,
        }
    }

    /// Success means a real HTTP status in `[100, 400)`.
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Response { status, .. } if (100..400).contains(status))
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            DeliveryOutcome::Response { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Positive integer seconds only; negative or unparseable values are ignored.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(|secs| secs as u64)
}

/// Shared webhook client. One connection pool serves every trigger.
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    pub fn new(default_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(default_timeout).build()?;
        Ok(Self { client })
    }

    /// POST `body` to `url` with the given headers and per-attempt timeout.
    pub async fn deliver(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &JsonValue,
        timeout: Duration,
    ) -> DeliveryOutcome {
        let mut request = self.client.post(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = match request.body(body.to_string()).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return DeliveryOutcome::RequestError {
                    message: e.to_string(),
                }
            }
            Err(e) => {
                return DeliveryOutcome::TransportError {
                    message: e.to_string(),
                }
            }
        };

        let status = response.status().as_u16();
        let response_headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        match response.text().await {
            Ok(body) => DeliveryOutcome::Response {
                status,
                body,
                headers: response_headers,
                retry_after,
            },
            Err(e) => DeliveryOutcome::BodyReadError {
                message: e.to_string(),
            },
        }
    }
}
