//! Telemetry value representation.

use fleetsim_core::DataType;

/// A value produced by a generator for one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
    Binary(Vec<u8>),
}

impl TelemetryValue {
    /// JSON representation for the publish payload. Binary values have no
    /// JSON form; they are published as raw bytes instead.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            TelemetryValue::Float(v) => serde_json::Number::from_f64(*v).map(serde_json::Value::Number),
            TelemetryValue::Integer(v) => Some(serde_json::Value::from(*v)),
            TelemetryValue::Boolean(b) => Some(serde_json::Value::Bool(*b)),
            TelemetryValue::Text(s) => Some(serde_json::Value::String(s.clone())),
            TelemetryValue::Binary(_) => None,
        }
    }

    /// Coerces a JSON value to the attribute's declared data type, falling
    /// back to the closest representation when the types disagree.
    pub fn from_json(value: &serde_json::Value, data_type: DataType) -> TelemetryValue {
        match (data_type, value) {
            (DataType::Integer, serde_json::Value::Number(n)) => {
                TelemetryValue::Integer(n.as_i64().unwrap_or_else(|| {
                    n.as_f64().map(|f| f.round_ties_even() as i64).unwrap_or(0)
                }))
            }
            (DataType::Number, serde_json::Value::Number(n)) => {
                TelemetryValue::Float(n.as_f64().unwrap_or(0.0))
            }
            (DataType::Boolean, serde_json::Value::Bool(b)) => TelemetryValue::Boolean(*b),
            (DataType::String, serde_json::Value::String(s)) => TelemetryValue::Text(s.clone()),
            (DataType::Binary, serde_json::Value::String(s)) => {
                TelemetryValue::Binary(s.as_bytes().to_vec())
            }
            // Type mismatch: preserve what the source actually holds
            (_, serde_json::Value::Number(n)) => TelemetryValue::Float(n.as_f64().unwrap_or(0.0)),
            (_, serde_json::Value::Bool(b)) => TelemetryValue::Boolean(*b),
            (_, v) => TelemetryValue::Text(v.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        assert_eq!(
            TelemetryValue::Float(21.5).to_json(),
            Some(serde_json::json!(21.5))
        );
        assert_eq!(
            TelemetryValue::Integer(7).to_json(),
            Some(serde_json::json!(7))
        );
        assert_eq!(TelemetryValue::Binary(vec![1, 2]).to_json(), None);
    }

    #[test]
    fn test_from_json_respects_data_type() {
        let v = TelemetryValue::from_json(&serde_json::json!(21.4), DataType::Integer);
        assert_eq!(v, TelemetryValue::Integer(21));

        let v = TelemetryValue::from_json(&serde_json::json!(21), DataType::Number);
        assert_eq!(v, TelemetryValue::Float(21.0));

        let v = TelemetryValue::from_json(&serde_json::json!("on"), DataType::String);
        assert_eq!(v, TelemetryValue::Text("on".to_string()));
    }
}
