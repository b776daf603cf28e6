//! Environment-based server configuration.

use fleetsim_device::EngineDefaults;
use fleetsim_manager::ManagerConfig;
use fleetsim_sink::SinkConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Complete engine configuration, read from environment variables with
/// defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_host: String,
    pub http_port: u16,
    pub request_timeout: Duration,
    pub log_level: String,
    pub model_dir: PathBuf,
    pub max_devices: usize,
    pub max_group_size: usize,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub influxdb_url: String,
    pub influxdb_token: String,
    pub influxdb_org: String,
    pub influxdb_bucket: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Loads the configuration from the environment.
    pub fn from_env() -> Self {
        Self {
            http_host: env_or("FLEETSIM_HTTP_HOST", "0.0.0.0"),
            http_port: env_parse("FLEETSIM_HTTP_PORT", 8080),
            request_timeout: Duration::from_secs(env_parse("FLEETSIM_REQUEST_TIMEOUT_SECS", 30)),
            log_level: env_or("LOG_LEVEL", "info"),
            model_dir: PathBuf::from(env_or("DEVICE_MODEL_PATH", "./device-models")),
            max_devices: env_parse("MAX_DEVICES", 1_000_000),
            max_group_size: env_parse("MAX_GROUP_SIZE", 1_000_000),
            mqtt_host: env_or("MQTT_BROKER_HOST", "localhost"),
            mqtt_port: env_parse("MQTT_BROKER_PORT", 1883),
            influxdb_url: env_or("INFLUXDB_URL", ""),
            influxdb_token: env_or("INFLUXDB_TOKEN", ""),
            influxdb_org: env_or("INFLUXDB_ORG", "fleetsim"),
            influxdb_bucket: env_or("INFLUXDB_BUCKET", "telemetry"),
        }
    }

    pub fn to_manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            model_dir: self.model_dir.clone(),
            max_devices: self.max_devices,
            max_group_size: self.max_group_size,
            stats_interval: Duration::from_secs(5),
            defaults: EngineDefaults {
                mqtt_host: self.mqtt_host.clone(),
                mqtt_port: self.mqtt_port,
                ..Default::default()
            },
        }
    }

    pub fn to_sink_config(&self) -> SinkConfig {
        SinkConfig {
            url: self.influxdb_url.clone(),
            token: self.influxdb_token.clone(),
            org: self.influxdb_org.clone(),
            bucket: self.influxdb_bucket.clone(),
            ..Default::default()
        }
    }
}
