//! Protocol adapters for the FleetSim device engine.
//!
//! Egress adapters own one connection per device and consume publish jobs
//! from a bounded drop-oldest queue, so a device's scheduler never blocks on
//! I/O. Outcomes and connection-state changes flow back to the device
//! supervisor over an event channel. Ingress adapters (MQTT subscriptions
//! and the webhook registry) feed proxy devices the same way.

pub mod coap;
pub mod error;
pub mod http;
pub mod mqtt;
pub mod mqtt_proxy;
pub mod queue;
pub mod webhook;

pub use error::{AdapterError, Result};
pub use mqtt_proxy::{MqttProxyAdapter, MqttProxyConfig, ProxyEvent};
pub use queue::{PublishJob, PublishQueue};
pub use webhook::{WebhookDelivery, WebhookRegistry};

use fleetsim_core::Protocol;
use fleetsim_sink::MetricPoint;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Connection parameters for one egress adapter instance.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub protocol: Protocol,
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    /// Consecutive publish failures before the adapter reports the link down.
    pub failure_threshold: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Mqtt,
            client_id: String::new(),
            host: "localhost".to_string(),
            port: 1883,
            tls: false,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Events an adapter reports to its owning device.
#[derive(Debug)]
pub enum AdapterEvent {
    Connected { latency_ms: f64 },
    ConnectionLost,
    Published { bytes: u64, point: Option<MetricPoint> },
    PublishFailed,
}

/// One egress adapter instance. Tagged variants keep the per-publish path
/// free of dynamic dispatch.
pub enum ProtocolAdapter {
    Mqtt(mqtt::MqttAdapter),
    Coap(coap::CoapAdapter),
    Http(http::HttpAdapter),
}

impl ProtocolAdapter {
    /// Creates the adapter, blocks until the link is up (or the connect
    /// timeout expires) and starts the publish worker on `queue`.
    pub async fn connect(
        config: AdapterConfig,
        queue: Arc<PublishQueue>,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Result<Self> {
        match config.protocol {
            Protocol::Mqtt => Ok(ProtocolAdapter::Mqtt(
                mqtt::MqttAdapter::connect(config, queue, events).await?,
            )),
            Protocol::Coap => Ok(ProtocolAdapter::Coap(
                coap::CoapAdapter::connect(config, queue, events).await?,
            )),
            Protocol::Http => Ok(ProtocolAdapter::Http(
                http::HttpAdapter::connect(config, queue, events).await?,
            )),
        }
    }

    /// Tears the adapter down: cancels its tasks and closes the connection.
    pub async fn close(self) {
        match self {
            ProtocolAdapter::Mqtt(a) => a.close().await,
            ProtocolAdapter::Coap(a) => a.close().await,
            ProtocolAdapter::Http(a) => a.close().await,
        }
    }
}

/// Reconnect backoff: exponential from 1 s to a 60 s cap with ±20 % jitter.
pub(crate) fn reconnect_backoff(attempt: u32) -> Duration {
    let base = Duration::from_secs(1)
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(Duration::from_secs(60));
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    base.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        for attempt in 0..12 {
            let delay = reconnect_backoff(attempt);
            let base = Duration::from_secs(1)
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(Duration::from_secs(60));
            assert!(delay >= base.mul_f64(0.8));
            assert!(delay <= base.mul_f64(1.2));
        }
        assert!(reconnect_backoff(30) <= Duration::from_secs(72));
    }
}
