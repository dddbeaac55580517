//! Retry decision for delivery attempts.

use super::client::DeliveryOutcome;
use crate::registry::RetryConf;

/// What to do with a row after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Mark delivered.
    Success,
    /// Schedule the next attempt at the given unix time.
    Retry(i64),
    /// Retries exhausted; mark the row failed.
    Error,
}

/// Per-trigger retry policy.
///
/// A positive-integer `Retry-After` from the webhook always schedules a
/// retry, even when tries are exhausted, and its value replaces the
/// configured interval.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub num_retries: i64,
    pub interval_seconds: u64,
}

impl RetryPolicy {
    pub fn new(conf: &RetryConf) -> Self {
        Self {
            num_retries: conf.num_retries,
            interval_seconds: conf.interval_seconds,
        }
    }

    /// Decide the row transition for an attempt outcome. `tries` is the
    /// attempt count recorded before this attempt.
    pub fn next_transition(&self, outcome: &DeliveryOutcome, tries: i64, now: i64) -> Transition {
        if outcome.is_success() {
            return Transition::Success;
        }
        if let Some(secs) = outcome.retry_after_seconds() {
            return Transition::Retry(now + secs as i64);
        }
        if tries < self.num_retries {
            return Transition::Retry(now + self.interval_seconds as i64);
        }
        Transition::Error
    }
}
