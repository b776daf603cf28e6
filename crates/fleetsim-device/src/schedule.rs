//! Pure helpers for the per-attribute publish schedule and payload shape.

use chrono::{DateTime, SecondsFormat, Utc};
use fleetsim_generators::TelemetryValue;
use fleetsim_sink::MetricValue;
use std::time::{Duration, Instant};

/// Advances a fire time by one interval, skipping any ticks already missed.
/// Late tasks never burst-publish to catch up.
pub fn next_fire(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let mut next = previous + interval;
    while next < now {
        next += interval;
    }
    next
}

/// Maps a generated value to its storable metric form. Binary attributes
/// publish raw bytes and have no time-series representation.
pub fn metric_value(value: &TelemetryValue) -> Option<MetricValue> {
    match value {
        TelemetryValue::Float(v) => Some(MetricValue::Float(*v)),
        TelemetryValue::Integer(v) => Some(MetricValue::Integer(*v)),
        TelemetryValue::Boolean(b) => Some(MetricValue::Boolean(*b)),
        TelemetryValue::Text(s) => Some(MetricValue::Text(s.clone())),
        TelemetryValue::Binary(_) => None,
    }
}

/// Serializes one attribute value into the per-attribute JSON envelope.
/// Binary values are published as raw bytes with no framing.
pub fn telemetry_payload(
    device_id: &str,
    attr_name: &str,
    unit: Option<&str>,
    value: &TelemetryValue,
    now: DateTime<Utc>,
) -> Vec<u8> {
    if let TelemetryValue::Binary(bytes) = value {
        return bytes.clone();
    }

    let mut payload = serde_json::Map::new();
    payload.insert(
        attr_name.to_string(),
        value.to_json().unwrap_or(serde_json::Value::Null),
    );
    payload.insert(
        "timestamp".to_string(),
        serde_json::Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    payload.insert(
        "deviceId".to_string(),
        serde_json::Value::String(device_id.to_string()),
    );
    if let Some(unit) = unit {
        payload.insert(
            "unit".to_string(),
            serde_json::Value::String(unit.to_string()),
        );
    }

    serde_json::to_vec(&serde_json::Value::Object(payload)).unwrap_or_default()
}
