//! InfluxDB line-protocol rendering for the engine's metric points.
//!
//! Format: measurement,tag1=value1,tag2=value2 name1=value1,name2=value2 timestamp
//!
//! Measurement names and tag keys come from the engine's fixed vocabulary
//! and never need escaping; tag values and value names are caller data and
//! do.

use crate::point::{MetricPoint, MetricValue};
use std::fmt::Write;

/// Renders one point as a line-protocol line.
pub fn format_point(point: &MetricPoint) -> String {
    let mut line = String::from(point.measurement());

    for (key, value) in point.tags() {
        let _ = write!(line, ",{}={}", key, escape(value));
    }

    line.push(' ');
    for (i, (name, value)) in point.values().iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        let _ = write!(line, "{}=", escape(name));
        match value {
            MetricValue::Float(v) => {
                let _ = write!(line, "{}", v);
            }
            MetricValue::Integer(v) => {
                let _ = write!(line, "{}i", v);
            }
            MetricValue::Boolean(b) => {
                let _ = write!(line, "{}", b);
            }
            MetricValue::Text(s) => {
                let _ = write!(line, "\"{}\"", escape_text(s));
            }
        }
    }

    let _ = write!(line, " {}", point.timestamp_ns());
    line
}

/// Joins a batch of points into one request body.
pub fn format_batch(points: &[MetricPoint]) -> String {
    points
        .iter()
        .map(format_point)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Escapes the characters line protocol treats as separators.
fn escape(value: &str) -> String {
    value
        .replace(' ', "\\ ")
        .replace(',', "\\,")
        .replace('=', "\\=")
}

/// Escapes quoted string values.
fn escape_text(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry_point() -> MetricPoint {
        let mut point = MetricPoint::new("telemetry").at(1700000000000000000);
        point.push_tag("deviceId", "t1-0");
        point.push_tag("modelId", "t1");
        point.push_tag("source", "simulated");
        point.push_value("temperature", MetricValue::Float(21.5));
        point.seal()
    }

    #[test]
    fn test_format_point() {
        assert_eq!(
            format_point(&telemetry_point()),
            "telemetry,deviceId=t1-0,modelId=t1,source=simulated temperature=21.5 1700000000000000000"
        );
    }

    #[test]
    fn test_value_types() {
        let mut point = MetricPoint::new("telemetry").at(1);
        point.push_value("f", MetricValue::Float(1.5));
        point.push_value("i", MetricValue::Integer(7));
        point.push_value("b", MetricValue::Boolean(true));
        point.push_value("s", MetricValue::Text("hi".to_string()));

        assert_eq!(
            format_point(&point.seal()),
            "telemetry f=1.5,i=7i,b=true,s=\"hi\" 1"
        );
    }

    #[test]
    fn test_escape_separators() {
        assert_eq!(escape("lab 3"), "lab\\ 3");
        assert_eq!(escape("a,b"), "a\\,b");
        assert_eq!(escape("a=b"), "a\\=b");
    }

    #[test]
    fn test_tag_values_are_escaped() {
        let mut point = MetricPoint::new("connections").at(1);
        point.push_tag("deviceId", "lab 3,a=b");
        point.push_value("connected", MetricValue::Boolean(false));

        assert_eq!(
            format_point(&point.seal()),
            "connections,deviceId=lab\\ 3\\,a\\=b connected=false 1"
        );
    }

    #[test]
    fn test_text_values_are_quoted_and_escaped() {
        let mut point = MetricPoint::new("telemetry").at(1);
        point.push_value("s", MetricValue::Text("say \"hi\"".to_string()));
        assert_eq!(format_point(&point.seal()), "telemetry s=\"say \\\"hi\\\"\" 1");
    }

    #[test]
    fn test_format_batch() {
        let mut a = MetricPoint::new("engine_stats").at(1);
        a.push_value("activeDevices", MetricValue::Integer(1));
        let mut b = MetricPoint::new("engine_stats").at(2);
        b.push_value("activeDevices", MetricValue::Integer(2));

        assert_eq!(
            format_batch(&[a.seal(), b.seal()]),
            "engine_stats activeDevices=1i 1\nengine_stats activeDevices=2i 2"
        );
    }
}
