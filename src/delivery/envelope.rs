//! Wire envelopes for webhook requests and invocation-log records.
//!
//! The shapes below are a stable external contract; every field name is
//! written out by hand rather than derived so the schema cannot drift with a
//! struct rename.

use super::client::DeliveryOutcome;
use crate::registry::{RetryConf, ScheduledTriggerConfig, WebhookHeader};
use crate::store::{EventRow, ScheduledEventRow};
use chrono::DateTime;
use serde_json::{json, Value as JsonValue};

/// Version literal stamped into every serialized invocation.
pub const INVOCATION_VERSION: &str = "2";

const USER_AGENT: &str = concat!("hook-relay/", env!("CARGO_PKG_VERSION"));

fn rfc3339(unix_seconds: i64) -> String {
    DateTime::from_timestamp(unix_seconds, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

/// Default headers merged under the trigger's configured headers; configured
/// headers win on a (case-insensitive) name collision.
pub fn merge_headers(configured: &[WebhookHeader]) -> Vec<(String, String)> {
    let defaults = [
        ("User-Agent", USER_AGENT),
        ("Content-Type", "application/json"),
    ];
    let mut merged: Vec<(String, String)> = defaults
        .iter()
        .filter(|(name, _)| {
            !configured
                .iter()
                .any(|h| h.name.eq_ignore_ascii_case(name))
        })
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    merged.extend(configured.iter().map(|h| (h.name.clone(), h.value.clone())));
    merged
}

/// Request body for a row-change event delivery.
pub fn event_body(event: &EventRow, retry_conf: &RetryConf) -> JsonValue {
    json!({
        "id": event.id,
        "table": {
            "schema": event.schema_name,
            "name": event.table_name,
        },
        "trigger": {
            "name": event.trigger_name,
        },
        "event": event.payload,
        "delivery_info": {
            "current_retry": event.tries,
            "max_retries": retry_conf.num_retries,
        },
        "created_at": rfc3339(event.created_at),
    })
}

/// Request body for a scheduled event delivery. The payload is the row's
/// override when present, else the trigger default, else JSON null.
pub fn scheduled_body(event: &ScheduledEventRow, trigger: &ScheduledTriggerConfig) -> JsonValue {
    let payload = event
        .additional_payload
        .clone()
        .or_else(|| trigger.payload.clone())
        .unwrap_or(JsonValue::Null);
    json!({
        "id": event.id,
        "name": event.name,
        "scheduled_time": rfc3339(event.scheduled_time),
        "tries": event.tries,
        "webhook": trigger.webhook,
        "payload": payload,
        "retry_conf": {
            "num_retries": trigger.retry_conf.num_retries,
            "interval_seconds": trigger.retry_conf.interval_seconds,
            "timeout_seconds": trigger.retry_conf.timeout_seconds,
        },
    })
}

fn headers_json(headers: &[(String, String)]) -> JsonValue {
    JsonValue::Array(
        headers
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect(),
    )
}

/// The request half of an invocation-log record.
pub fn request_log(body: &JsonValue, headers: &[(String, String)]) -> JsonValue {
    json!({
        "payload": body,
        "headers": headers_json(headers),
        "version": INVOCATION_VERSION,
    })
}

/// The response half of an invocation-log record: either the webhook's
/// actual response or a synthesized client error.
pub fn response_log(outcome: &DeliveryOutcome) -> JsonValue {
    match outcome {
        DeliveryOutcome::Response {
            status,
            body,
            headers,
            ..
        } => json!({
            "type": "webhook_response",
            "version": INVOCATION_VERSION,
            "data": {
                "body": body,
                "headers": headers_json(headers),
                "status": status,
            },
        }),
        DeliveryOutcome::TransportError { message }
        | DeliveryOutcome::BodyReadError { message }
        | DeliveryOutcome::RequestError { message } => json!({
            "type": "client_error",
            "version": INVOCATION_VERSION,
            "data": {
                "message": message,
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ScheduleSpec, DEFAULT_TOLERANCE_SECONDS};
    use serde_json::json;

    fn header(name: &str, value: &str) -> WebhookHeader {
        WebhookHeader {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn event_body_has_the_exact_contract_fields() {
        let mut event = EventRow::new("public", "users", "users_sync", json!({"op": "UPDATE"}));
        event.created_at = 1_700_000_000;
        event.tries = 2;
        let retry_conf = RetryConf {
            num_retries: 5,
            ..Default::default()
        };

        let body = event_body(&event, &retry_conf);
        assert_eq!(body["id"], event.id.as_str());
        assert_eq!(body["table"]["schema"], "public");
        assert_eq!(body["table"]["name"], "users");
        assert_eq!(body["trigger"]["name"], "users_sync");
        assert_eq!(body["event"], json!({"op": "UPDATE"}));
        assert_eq!(body["delivery_info"]["current_retry"], 2);
        assert_eq!(body["delivery_info"]["max_retries"], 5);
        assert_eq!(body["created_at"], "2023-11-14T22:13:20+00:00");

        let mut top_level: Vec<_> = body.as_object().unwrap().keys().cloned().collect();
        top_level.sort();
        assert_eq!(
            top_level,
            vec!["created_at", "delivery_info", "event", "id", "table", "trigger"]
        );
    }

    #[test]
    fn scheduled_body_payload_precedence() {
        let trigger = ScheduledTriggerConfig {
            name: "nightly".to_string(),
            webhook: "http://localhost:9000/hook".to_string(),
            headers: vec![],
            retry_conf: RetryConf::default(),
            schedule: ScheduleSpec::AdHoc,
            payload: Some(json!({"source": "default"})),
            tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
        };

        let plain = ScheduledEventRow::new("nightly", 1_700_000_000);
        assert_eq!(
            scheduled_body(&plain, &trigger)["payload"],
            json!({"source": "default"})
        );

        let overridden = ScheduledEventRow::new("nightly", 1_700_000_000)
            .with_payload(json!({"source": "override"}));
        assert_eq!(
            scheduled_body(&overridden, &trigger)["payload"],
            json!({"source": "override"})
        );

        let mut bare_trigger = trigger.clone();
        bare_trigger.payload = None;
        assert_eq!(scheduled_body(&plain, &bare_trigger)["payload"], JsonValue::Null);
    }

    #[test]
    fn scheduled_body_carries_webhook_and_retry_conf() {
        let trigger = ScheduledTriggerConfig {
            name: "nightly".to_string(),
            webhook: "http://localhost:9000/hook".to_string(),
            headers: vec![],
            retry_conf: RetryConf {
                num_retries: 3,
                interval_seconds: 10,
                timeout_seconds: 60,
            },
            schedule: ScheduleSpec::AdHoc,
            payload: None,
            tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
        };
        let event = ScheduledEventRow::new("nightly", 1_700_000_000);

        let body = scheduled_body(&event, &trigger);
        assert_eq!(body["webhook"], "http://localhost:9000/hook");
        assert_eq!(body["scheduled_time"], "2023-11-14T22:13:20+00:00");
        assert_eq!(
            body["retry_conf"],
            json!({"num_retries": 3, "interval_seconds": 10, "timeout_seconds": 60})
        );
    }

    #[test]
    fn configured_headers_win_on_collision() {
        let merged = merge_headers(&[
            header("content-type", "application/cloudevents+json"),
            header("X-Api-Key", "secret"),
        ]);

        let content_types: Vec<_> = merged
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .collect();
        assert_eq!(content_types.len(), 1);
        assert_eq!(content_types[0].1, "application/cloudevents+json");
        assert!(merged.iter().any(|(name, _)| name == "User-Agent"));
        assert!(merged.iter().any(|(name, _)| name == "X-Api-Key"));
    }

    #[test]
    fn request_log_wraps_payload_headers_and_version() {
        let log = request_log(
            &json!({"id": "abc"}),
            &[("Content-Type".to_string(), "application/json".to_string())],
        );
        assert_eq!(log["version"], "2");
        assert_eq!(log["payload"]["id"], "abc");
        assert_eq!(
            log["headers"],
            json!([{"name": "Content-Type", "value": "application/json"}])
        );
    }

    #[test]
    fn response_log_webhook_response_shape() {
        let outcome = DeliveryOutcome::Response {
            status: 200,
            body: "ok".to_string(),
            headers: vec![("server".to_string(), "test".to_string())],
            retry_after: None,
        };
        let log = response_log(&outcome);
        assert_eq!(
            log,
            json!({
                "type": "webhook_response",
                "version": "2",
                "data": {
                    "body": "ok",
                    "headers": [{"name": "server", "value": "test"}],
                    "status": 200,
                },
            })
        );
    }

    #[test]
    fn response_log_client_error_shape() {
        let outcome = DeliveryOutcome::TransportError {
            message: "connection refused".to_string(),
        };
        let log = response_log(&outcome);
        assert_eq!(
            log,
            json!({
                "type": "client_error",
                "version": "2",
                "data": {"message": "connection refused"},
            })
        );
    }
}
