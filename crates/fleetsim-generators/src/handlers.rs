//! Registry of named custom generator handlers.
//!
//! Custom handlers are plain function pointers compiled into the engine and
//! resolved by name at device start. The contract requires them to be pure
//! functions of their inputs so runs are reproducible.

use crate::value::TelemetryValue;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Signature of a custom generator handler.
pub type CustomHandler = fn(
    device_id: &str,
    attr_name: &str,
    params: &serde_json::Map<String, serde_json::Value>,
    now: DateTime<Utc>,
) -> TelemetryValue;

/// Name-to-handler registry, built once at engine startup.
pub struct HandlerRegistry {
    handlers: HashMap<String, CustomHandler>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// A registry pre-populated with the built-in handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("sine", sine_handler);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: CustomHandler) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<CustomHandler> {
        self.handlers.get(name).copied()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn param_f64(params: &serde_json::Map<String, serde_json::Value>, key: &str, default: f64) -> f64 {
    params.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

/// Sine wave over wall-clock time.
///
/// Params: `min` (0), `max` (100), `periodMs` (60000), `phase` (0).
fn sine_handler(
    _device_id: &str,
    _attr_name: &str,
    params: &serde_json::Map<String, serde_json::Value>,
    now: DateTime<Utc>,
) -> TelemetryValue {
    let min = param_f64(params, "min", 0.0);
    let max = param_f64(params, "max", 100.0);
    let period_ms = param_f64(params, "periodMs", 60_000.0).max(1.0);
    let phase = param_f64(params, "phase", 0.0);

    let amplitude = (max - min) / 2.0;
    let offset = min + amplitude;
    let t = now.timestamp_millis() as f64 % period_ms;
    let angle = 2.0 * std::f64::consts::PI * t / period_ms + phase;

    TelemetryValue::Float(offset + amplitude * angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sine_is_deterministic_and_bounded() {
        let params = serde_json::json!({"min": -1.0, "max": 1.0, "periodMs": 1000.0})
            .as_object()
            .cloned()
            .unwrap();

        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let a = sine_handler("d", "a", &params, t0);
        let b = sine_handler("d", "a", &params, t0);
        assert_eq!(a, b);

        for offset_ms in (0..5000).step_by(97) {
            let t = t0 + chrono::Duration::milliseconds(offset_ms);
            match sine_handler("d", "a", &params, t) {
                TelemetryValue::Float(v) => assert!((-1.0..=1.0).contains(&v)),
                other => panic!("unexpected value {:?}", other),
            }
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = HandlerRegistry::with_builtins();
        assert!(registry.get("sine").is_some());
        assert!(registry.get("unknown").is_none());
    }
}
