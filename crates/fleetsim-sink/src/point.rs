//! The engine's emission model.
//!
//! Everything the engine ships downstream is one of a closed set of
//! measurements (`telemetry`, `device_events`, `connections`,
//! `engine_stats`). A point's identity comes from a small tag vocabulary
//! fixed by the engine: which device emitted it, which model and group it
//! belongs to, and whether the population is simulated or physical. Only
//! tag values and value names are dynamic; tag keys never are.

use fleetsim_core::{now_nanos, Source, Timestamp};

/// A typed value carried by a metric point.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl MetricValue {
    /// Maps a JSON payload value to a storable metric value. Objects,
    /// arrays and nulls have no representation and are skipped upstream.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(MetricValue::Integer(i))
                } else {
                    n.as_f64().map(MetricValue::Float)
                }
            }
            serde_json::Value::Bool(b) => Some(MetricValue::Boolean(*b)),
            serde_json::Value::String(s) => Some(MetricValue::Text(s.clone())),
            _ => None,
        }
    }
}

/// Identity tags shared by all device-scoped measurements.
#[derive(Debug, Clone, Copy)]
pub struct DeviceScope<'a> {
    pub device_id: &'a str,
    pub model_id: &'a str,
    pub group_id: Option<&'a str>,
    pub source: Source,
}

/// One datum bound for the time-series store.
///
/// Constructed only through the measurement constructors in
/// [`crate::points`], which own the tag vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    measurement: &'static str,
    timestamp_ns: Timestamp,
    tags: Vec<(&'static str, String)>,
    values: Vec<(String, MetricValue)>,
}

impl MetricPoint {
    /// Starts a point for one of the engine's measurements, stamped now.
    pub(crate) fn new(measurement: &'static str) -> Self {
        Self {
            measurement,
            timestamp_ns: now_nanos(),
            tags: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Overrides the emission timestamp. Test support.
    #[cfg(test)]
    pub(crate) fn at(mut self, timestamp_ns: Timestamp) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub(crate) fn push_tag(&mut self, key: &'static str, value: impl Into<String>) {
        self.tags.push((key, value.into()));
    }

    pub(crate) fn push_value(&mut self, name: impl Into<String>, value: MetricValue) {
        self.values.push((name.into(), value));
    }

    /// Finishes construction: tags are ordered by key so a point's series
    /// identity downstream is stable.
    pub(crate) fn seal(mut self) -> Self {
        self.tags.sort_by(|a, b| a.0.cmp(b.0));
        self
    }

    pub fn measurement(&self) -> &'static str {
        self.measurement
    }

    pub fn timestamp_ns(&self) -> Timestamp {
        self.timestamp_ns
    }

    pub fn tags(&self) -> &[(&'static str, String)] {
        &self.tags
    }

    pub fn values(&self) -> &[(String, MetricValue)] {
        &self.values
    }

    /// Looks up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Looks up a value by name.
    pub fn value(&self, name: &str) -> Option<&MetricValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        assert_eq!(
            MetricValue::from_json(&serde_json::json!(25.5)),
            Some(MetricValue::Float(25.5))
        );
        assert_eq!(
            MetricValue::from_json(&serde_json::json!(60)),
            Some(MetricValue::Integer(60))
        );
        assert_eq!(
            MetricValue::from_json(&serde_json::json!(true)),
            Some(MetricValue::Boolean(true))
        );
        assert_eq!(
            MetricValue::from_json(&serde_json::json!("ok")),
            Some(MetricValue::Text("ok".to_string()))
        );
        assert_eq!(MetricValue::from_json(&serde_json::json!({"a": 1})), None);
        assert_eq!(MetricValue::from_json(&serde_json::json!([1])), None);
        assert_eq!(MetricValue::from_json(&serde_json::Value::Null), None);
    }

    #[test]
    fn test_seal_orders_tags_by_key() {
        let mut point = MetricPoint::new("telemetry");
        point.push_tag("source", "simulated");
        point.push_tag("deviceId", "t1-0");
        point.push_tag("modelId", "t1");
        let point = point.seal();

        let keys: Vec<&str> = point.tags().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["deviceId", "modelId", "source"]);
    }

    #[test]
    fn test_lookups() {
        let mut point = MetricPoint::new("connections");
        point.push_tag("deviceId", "t1-0");
        point.push_value("connected", MetricValue::Boolean(true));
        let point = point.seal();

        assert_eq!(point.measurement(), "connections");
        assert_eq!(point.tag("deviceId"), Some("t1-0"));
        assert_eq!(point.tag("missing"), None);
        assert_eq!(point.value("connected"), Some(&MetricValue::Boolean(true)));
        assert_eq!(point.value("missing"), None);
    }

    #[test]
    fn test_points_are_stamped() {
        let before = now_nanos();
        let point = MetricPoint::new("engine_stats");
        assert!(point.timestamp_ns() >= before);
        assert_eq!(point.at(7).timestamp_ns(), 7);
    }
}
