//! Device model configuration.
//!
//! A device model is the registered template a device instance is created
//! from: which protocol it speaks, how it connects, and which telemetry
//! attributes it emits on which schedule. Models are JSON documents with
//! camelCase keys; they are validated once at registration and treated as
//! immutable while any device references them.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Device type of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Sensor,
    Gateway,
    Actuator,
    Custom,
    Proxy,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Sensor => "sensor",
            DeviceType::Gateway => "gateway",
            DeviceType::Actuator => "actuator",
            DeviceType::Custom => "custom",
            DeviceType::Proxy => "proxy",
        }
    }
}

/// Wire protocol a device speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Mqtt,
    Coap,
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Mqtt => "mqtt",
            Protocol::Coap => "coap",
            Protocol::Http => "http",
        }
    }

    /// Protocols the proxy ingress adapters support.
    pub fn supports_proxy_ingress(&self) -> bool {
        matches!(self, Protocol::Mqtt | Protocol::Http)
    }
}

/// Data type of a telemetry attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Number,
    Integer,
    Boolean,
    String,
    Binary,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Number | DataType::Integer)
    }
}

/// Telemetry value generator variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorType {
    Random,
    Sequence,
    Constant,
    Replay,
    Custom,
}

/// Statistical distribution used by the random generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Uniform,
    Normal,
    Exponential,
}

impl Default for Distribution {
    fn default() -> Self {
        Distribution::Uniform
    }
}

/// Configuration for one telemetry value generator.
///
/// The struct is a flat union of the per-variant knobs; [`GeneratorSpec::validate`]
/// enforces which of them a given variant requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorSpec {
    #[serde(rename = "type")]
    pub kind: GeneratorType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub distribution: Distribution,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub rate: Option<f64>,
    /// Decimal places kept on emitted numbers.
    pub precision: Option<u32>,
    pub start: Option<f64>,
    pub step: f64,
    pub wrap: bool,
    pub value: Option<serde_json::Value>,
    pub data_file: Option<String>,
    pub column: Option<String>,
    pub loop_replay: bool,
    pub handler: Option<String>,
    pub params: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Default for GeneratorSpec {
    fn default() -> Self {
        Self {
            kind: GeneratorType::Random,
            min: None,
            max: None,
            distribution: Distribution::Uniform,
            mean: None,
            stddev: None,
            rate: None,
            precision: None,
            start: None,
            step: 1.0,
            wrap: false,
            value: None,
            data_file: None,
            column: None,
            loop_replay: true,
            handler: None,
            params: None,
        }
    }
}

impl GeneratorSpec {
    /// Validates the spec against its variant and the attribute data type.
    pub fn validate(&self, attr: &str, data_type: DataType) -> Result<()> {
        match self.kind {
            GeneratorType::Random | GeneratorType::Sequence => {
                if !data_type.is_numeric() {
                    return Err(CoreError::field(
                        attr,
                        format!("{:?} generator requires a numeric data type", self.kind),
                    ));
                }
                if let (Some(min), Some(max)) = (self.min, self.max) {
                    if min > max {
                        return Err(CoreError::field(attr, "min must not exceed max"));
                    }
                }
                if self.kind == GeneratorType::Sequence && self.step == 0.0 {
                    return Err(CoreError::field(attr, "sequence step must be non-zero"));
                }
            }
            GeneratorType::Constant => {
                if self.value.is_none() {
                    return Err(CoreError::field(attr, "constant generator requires a value"));
                }
            }
            GeneratorType::Replay => {
                if self.data_file.is_none() {
                    return Err(CoreError::field(attr, "replay generator requires dataFile"));
                }
            }
            GeneratorType::Custom => {
                if self.handler.is_none() {
                    return Err(CoreError::field(attr, "custom generator requires a handler name"));
                }
            }
        }
        Ok(())
    }
}

/// One telemetry attribute of a device model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub generator: GeneratorSpec,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Optional per-attribute topic override; falls back to the connection's
    /// topic pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

fn default_interval_ms() -> u64 {
    1000
}

/// Connection configuration of a device model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    pub broker: Option<String>,
    pub port: Option<u16>,
    pub tls: bool,
    pub client_id_pattern: Option<String>,
    pub topic_pattern: Option<String>,
    pub qos: u8,
    /// Keepalive seconds for protocols with a persistent connection.
    pub keep_alive: u64,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password_ref: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            broker: None,
            port: None,
            tls: false,
            client_id_pattern: None,
            topic_pattern: None,
            qos: 0,
            keep_alive: 60,
            clean_session: true,
            username: None,
            password_ref: None,
        }
    }
}

/// A registered device model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceModel {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionConfig>,
    #[serde(default)]
    pub telemetry: Vec<TelemetryAttribute>,
    /// Carried through for downstream tooling; not used on the hot path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviors: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Checks an id against `^[a-z][a-z0-9-]*$`.
pub fn valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl DeviceModel {
    /// Whether instances of this model forward telemetry from real devices.
    pub fn is_proxy(&self) -> bool {
        self.device_type == DeviceType::Proxy
    }

    /// Validates the model invariants enforced at registration.
    pub fn validate(&self) -> Result<()> {
        if !valid_id(&self.id) {
            return Err(CoreError::InvalidId(self.id.clone()));
        }

        if let Some(conn) = &self.connection {
            if conn.port == Some(0) {
                return Err(CoreError::InvalidPort(0));
            }
            if conn.qos > 2 {
                return Err(CoreError::InvalidQos(conn.qos));
            }
        }

        if self.is_proxy() {
            if !self.telemetry.is_empty() {
                return Err(CoreError::field(
                    "telemetry",
                    "proxy models must not declare telemetry attributes",
                ));
            }
            if !self.protocol.supports_proxy_ingress() {
                return Err(CoreError::field(
                    "protocol",
                    format!("{} is not supported for proxy ingress", self.protocol.as_str()),
                ));
            }
            return Ok(());
        }

        for attr in &self.telemetry {
            if attr.name.is_empty() {
                return Err(CoreError::field("telemetry", "attribute name must not be empty"));
            }
            if attr.interval_ms < 1 {
                return Err(CoreError::field(
                    &attr.name,
                    "intervalMs must be at least 1",
                ));
            }
            attr.generator.validate(&attr.name, attr.data_type)?;
        }

        Ok(())
    }
}
