//! Constructors for the engine's measurements.
//!
//! These own the tag vocabulary consumed by dashboards; every point
//! carries a `source` tag so simulated and physical populations stay
//! distinguishable downstream.

use crate::point::{DeviceScope, MetricPoint, MetricValue};
use fleetsim_core::Source;

/// A `telemetry` point carrying one or more attribute values. Returns
/// `None` when nothing in the payload was storable.
pub fn telemetry(
    scope: &DeviceScope<'_>,
    unit: Option<&str>,
    values: Vec<(String, MetricValue)>,
) -> Option<MetricPoint> {
    if values.is_empty() {
        return None;
    }

    let mut point = MetricPoint::new("telemetry");
    point.push_tag("deviceId", scope.device_id);
    point.push_tag("modelId", scope.model_id);
    if let Some(group_id) = scope.group_id {
        point.push_tag("groupId", group_id);
    }
    if let Some(unit) = unit {
        point.push_tag("unit", unit);
    }
    point.push_tag("source", scope.source.as_str());
    for (name, value) in values {
        point.push_value(name, value);
    }
    Some(point.seal())
}

/// A `device_events` lifecycle point (`value=1`).
pub fn device_event(scope: &DeviceScope<'_>, event_type: &str) -> MetricPoint {
    let mut point = MetricPoint::new("device_events");
    point.push_tag("deviceId", scope.device_id);
    point.push_tag("modelId", scope.model_id);
    point.push_tag("eventType", event_type);
    if let Some(group_id) = scope.group_id {
        point.push_tag("groupId", group_id);
    }
    point.push_tag("source", scope.source.as_str());
    point.push_value("value", MetricValue::Integer(1));
    point.seal()
}

/// A `connections` state-change point. The protocol is tagged separately
/// from the device scope because proxy bindings can speak a different
/// protocol than their model.
pub fn connection(
    device_id: &str,
    protocol: &str,
    source: Source,
    connected: bool,
    latency_ms: Option<f64>,
) -> MetricPoint {
    let mut point = MetricPoint::new("connections");
    point.push_tag("deviceId", device_id);
    point.push_tag("protocol", protocol);
    point.push_tag("source", source.as_str());
    point.push_value("connected", MetricValue::Boolean(connected));
    if let Some(latency) = latency_ms {
        point.push_value("latencyMs", MetricValue::Float(latency));
    }
    point.seal()
}

/// An `engine_stats` point, emitted on a fixed cadence. Engine-wide, so it
/// carries no tags at all.
pub fn engine_stats(
    active_devices: u64,
    active_simulated: u64,
    active_physical: u64,
    total_messages: u64,
    total_bytes: u64,
    active_groups: u64,
) -> MetricPoint {
    let mut point = MetricPoint::new("engine_stats");
    point.push_value("activeDevices", MetricValue::Integer(active_devices as i64));
    point.push_value("activeSimulated", MetricValue::Integer(active_simulated as i64));
    point.push_value("activePhysical", MetricValue::Integer(active_physical as i64));
    point.push_value("totalMessages", MetricValue::Integer(total_messages as i64));
    point.push_value("totalBytes", MetricValue::Integer(total_bytes as i64));
    point.push_value("activeGroups", MetricValue::Integer(active_groups as i64));
    point.seal()
}

/// Extracts storable values from a forwarded JSON payload, skipping the
/// envelope keys a telemetry publish carries.
pub fn payload_fields(payload: &serde_json::Value) -> Vec<(String, MetricValue)> {
    let Some(map) = payload.as_object() else {
        return Vec::new();
    };

    map.iter()
        .filter(|(key, _)| key.as_str() != "deviceId" && key.as_str() != "timestamp")
        .filter_map(|(key, value)| MetricValue::from_json(value).map(|v| (key.clone(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope<'a>(group_id: Option<&'a str>, source: Source) -> DeviceScope<'a> {
        DeviceScope {
            device_id: "p-0",
            model_id: "p1",
            group_id,
            source,
        }
    }

    #[test]
    fn test_telemetry_tags() {
        let point = telemetry(
            &scope(None, Source::Physical),
            None,
            vec![
                ("temperature".to_string(), MetricValue::Float(25.5)),
                ("humidity".to_string(), MetricValue::Integer(60)),
            ],
        )
        .unwrap();

        assert_eq!(point.measurement(), "telemetry");
        assert_eq!(point.tag("deviceId"), Some("p-0"));
        assert_eq!(point.tag("modelId"), Some("p1"));
        assert_eq!(point.tag("source"), Some("physical"));
        assert!(point.tag("groupId").is_none());
        assert_eq!(point.value("temperature"), Some(&MetricValue::Float(25.5)));
        assert_eq!(point.value("humidity"), Some(&MetricValue::Integer(60)));
    }

    #[test]
    fn test_telemetry_requires_values() {
        assert!(telemetry(&scope(None, Source::Simulated), None, vec![]).is_none());
    }

    #[test]
    fn test_telemetry_optional_tags() {
        let point = telemetry(
            &scope(Some("g"), Source::Simulated),
            Some("celsius"),
            vec![("temperature".to_string(), MetricValue::Float(21.0))],
        )
        .unwrap();
        assert_eq!(point.tag("groupId"), Some("g"));
        assert_eq!(point.tag("unit"), Some("celsius"));
    }

    #[test]
    fn test_device_event_shape() {
        let point = device_event(&scope(Some("g"), Source::Simulated), "started");
        assert_eq!(point.measurement(), "device_events");
        assert_eq!(point.tag("eventType"), Some("started"));
        assert_eq!(point.tag("groupId"), Some("g"));
        assert_eq!(point.value("value"), Some(&MetricValue::Integer(1)));
    }

    #[test]
    fn test_connection_shape() {
        let point = connection("t1-0", "mqtt", Source::Simulated, true, Some(12.5));
        assert_eq!(point.tag("protocol"), Some("mqtt"));
        assert_eq!(point.value("connected"), Some(&MetricValue::Boolean(true)));
        assert_eq!(point.value("latencyMs"), Some(&MetricValue::Float(12.5)));

        let point = connection("t1-0", "mqtt", Source::Simulated, false, None);
        assert!(point.value("latencyMs").is_none());
    }

    #[test]
    fn test_engine_stats_has_no_tags() {
        let point = engine_stats(7, 5, 2, 100, 4096, 1);
        assert!(point.tags().is_empty());
        assert_eq!(point.value("activeSimulated"), Some(&MetricValue::Integer(5)));
        assert_eq!(point.value("activePhysical"), Some(&MetricValue::Integer(2)));
    }

    #[test]
    fn test_payload_fields_skips_envelope() {
        let payload = serde_json::json!({
            "deviceId": "p-0",
            "timestamp": "2026-01-01T00:00:00Z",
            "temperature": 25.5,
            "humidity": 60,
            "ok": true,
            "nested": {"ignored": 1}
        });

        let fields = payload_fields(&payload);
        let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"temperature"));
        assert!(names.contains(&"humidity"));
        assert!(names.contains(&"ok"));
        assert!(!names.contains(&"deviceId"));
        assert!(!names.contains(&"timestamp"));
        assert!(!names.contains(&"nested"));
    }
}
