//! Cron expression parsing and firing-time generation.
//!
//! Expressions are interpreted in UTC. Five-field expressions are normalized
//! to the six-field form by prefixing a seconds field of `0`.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Parse a standard five/six-field cron expression.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let field_count = expression.split_whitespace().count();
    let normalized = match field_count {
        5 => format!("0 {expression}"),
        6 => expression.to_string(),
        _ => bail!("invalid cron expression (expected 5 or 6 fields): {expression}"),
    };
    Schedule::from_str(&normalized)
        .map_err(|e| anyhow::anyhow!("invalid cron expression '{expression}': {e}"))
}

/// The next `count` firing times of `schedule` strictly after `from`,
/// in strictly increasing order.
pub fn generate_schedule_times(
    schedule: &Schedule,
    from: DateTime<Utc>,
    count: usize,
) -> Vec<DateTime<Utc>> {
    schedule.after(&from).take(count).collect()
}
