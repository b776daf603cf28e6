//! Proxy devices: passthrough from an external source to the metrics sink.

use crate::error::{DeviceError, Result};
use crate::state::{DeviceSnapshot, DeviceState, EngineCounters, EngineDefaults};
use chrono::{DateTime, Utc};
use fleetsim_adapters::{
    MqttProxyAdapter, MqttProxyConfig, ProxyEvent, WebhookRegistry,
};
use fleetsim_core::{ConnectionState, DeviceModel, DeviceStatus, Protocol};
use fleetsim_sink::{points, MetricsSink};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Binding request for a proxy device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingConfig {
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub qos: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_ref: Option<String>,
}

impl BindingConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.protocol.supports_proxy_ingress() {
            return Err(DeviceError::Validation(format!(
                "protocol {} is not supported for proxy ingress",
                self.protocol.as_str()
            )));
        }
        if self.qos > 2 {
            return Err(DeviceError::Validation(format!(
                "invalid qos {}",
                self.qos
            )));
        }
        if self.protocol == Protocol::Mqtt && self.broker.is_none() {
            return Err(DeviceError::Validation(
                "mqtt binding requires a broker".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serializable view of a device's active binding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingStatus {
    pub bound: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_at: Option<DateTime<Utc>>,
}

impl BindingStatus {
    pub fn unbound() -> Self {
        Self {
            bound: false,
            protocol: None,
            broker: None,
            port: None,
            topic: None,
            webhook_url: None,
            bound_at: None,
        }
    }
}

struct ProxyRuntime {
    cancel: CancellationToken,
    pump: JoinHandle<()>,
    adapter: Option<MqttProxyAdapter>,
}

/// A device whose telemetry is forwarded from a real external device.
pub struct ProxyDevice {
    state: Arc<DeviceState>,
    engine: Arc<EngineCounters>,
    sink: MetricsSink,
    webhooks: Arc<WebhookRegistry>,
    defaults: EngineDefaults,
    binding: RwLock<Option<BindingConfig>>,
    webhook_url: RwLock<Option<String>>,
    runtime: Mutex<Option<ProxyRuntime>>,
}

impl ProxyDevice {
    pub fn new(
        id: String,
        model: Arc<DeviceModel>,
        group_id: Option<String>,
        engine: Arc<EngineCounters>,
        sink: MetricsSink,
        webhooks: Arc<WebhookRegistry>,
        defaults: EngineDefaults,
    ) -> Self {
        Self {
            state: DeviceState::new(id, model, group_id),
            engine,
            sink,
            webhooks,
            defaults,
            binding: RwLock::new(None),
            webhook_url: RwLock::new(None),
            runtime: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<DeviceState> {
        &self.state
    }

    pub fn binding_status(&self) -> BindingStatus {
        match self.binding.read().clone() {
            None => BindingStatus::unbound(),
            Some(config) => BindingStatus {
                bound: true,
                protocol: Some(config.protocol),
                broker: config.broker,
                port: config.port,
                topic: config.topic,
                webhook_url: self.webhook_url.read().clone(),
                bound_at: self.state.bound_at(),
            },
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let binding = self.binding.read().is_some().then(|| self.binding_status());
        self.state.snapshot(binding)
    }

    /// Binds the device to its external source. Returns the webhook URL for
    /// HTTP bindings.
    pub async fn bind(&self, config: BindingConfig) -> Result<Option<String>> {
        let mut runtime = self.runtime.lock().await;

        if self.binding.read().is_some() {
            return Err(DeviceError::AlreadyBound);
        }
        config.validate()?;

        self.state.set_error(None);
        self.state.set_status(DeviceStatus::Starting);
        self.state.set_connection_state(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(run_pump(
            Arc::clone(&self.state),
            self.sink.clone(),
            events_rx,
            cancel.clone(),
            config.protocol.as_str(),
        ));

        let mut webhook_url = None;
        let adapter = match config.protocol {
            Protocol::Http => {
                self.webhooks.register(&self.state.id, events_tx.clone());
                let path = WebhookRegistry::path_for(&self.state.id);
                webhook_url = Some(path);
                // No external connection to wait for
                let _ = events_tx.send(ProxyEvent::Connected { latency_ms: 0.0 });
                None
            }
            Protocol::Mqtt => {
                let proxy_config = MqttProxyConfig {
                    device_id: self.state.id.clone(),
                    broker: config.broker.clone().unwrap_or_default(),
                    port: config.port.unwrap_or(1883),
                    topic: config
                        .topic
                        .clone()
                        .unwrap_or_else(|| format!("devices/{}/telemetry", self.state.id)),
                    qos: config.qos,
                    username: config.username.clone(),
                    password: config
                        .password_ref
                        .as_deref()
                        .and_then(|name| std::env::var(name).ok()),
                    connect_timeout: self.defaults.connect_timeout,
                };
                match MqttProxyAdapter::bind(proxy_config, events_tx.clone()).await {
                    Ok(adapter) => Some(adapter),
                    Err(e) => {
                        cancel.cancel();
                        let _ = pump.await;
                        self.state
                            .counters
                            .error_count
                            .fetch_add(1, Ordering::Relaxed);
                        self.state.set_error(Some(e.to_string()));
                        self.state.set_connection_state(ConnectionState::Disconnected);
                        self.state.set_status(DeviceStatus::Error);
                        self.sink.submit(points::connection(
                            &self.state.id,
                            "mqtt",
                            self.state.source,
                            false,
                            None,
                        ));
                        return Err(DeviceError::Bind(e.to_string()));
                    }
                }
            }
            Protocol::Coap => {
                cancel.cancel();
                let _ = pump.await;
                self.state.set_status(DeviceStatus::Stopped);
                return Err(DeviceError::Validation(
                    "coap proxy ingress is not supported".to_string(),
                ));
            }
        };

        self.state.mark_bound();
        self.state.mark_running(&self.engine);
        self.state.set_status(DeviceStatus::Running);
        *self.binding.write() = Some(config.clone());
        *self.webhook_url.write() = webhook_url.clone();

        self.sink
            .submit(points::device_event(&self.state.scope(), "bound"));
        info!(
            "proxy device {} bound via {}",
            self.state.id,
            config.protocol.as_str()
        );

        *runtime = Some(ProxyRuntime {
            cancel,
            pump,
            adapter,
        });
        Ok(webhook_url)
    }

    /// Releases the binding and its ingress resources.
    pub async fn unbind(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;

        if self.binding.read().is_none() {
            return Ok(());
        }
        let protocol = self
            .binding
            .read()
            .as_ref()
            .map(|b| b.protocol.as_str())
            .unwrap_or("http");

        self.state.set_status(DeviceStatus::Stopping);
        self.webhooks.unregister(&self.state.id);

        if let Some(rt) = runtime.take() {
            if let Some(adapter) = rt.adapter {
                adapter.unbind().await;
            }
            rt.cancel.cancel();
            let _ = rt.pump.await;
        }

        self.state.unmark_running(&self.engine);
        self.state.set_connection_state(ConnectionState::Disconnected);
        self.state.set_status(DeviceStatus::Stopped);
        *self.binding.write() = None;
        *self.webhook_url.write() = None;

        self.sink.submit(points::connection(
            &self.state.id,
            protocol,
            self.state.source,
            false,
            None,
        ));
        self.sink
            .submit(points::device_event(&self.state.scope(), "unbound"));
        info!("proxy device {} unbound", self.state.id);
        Ok(())
    }
}

/// Consumes ingress events: counts payloads and forwards them to the sink
/// tagged `source=physical`.
async fn run_pump(
    state: Arc<DeviceState>,
    sink: MetricsSink,
    mut events: mpsc::UnboundedReceiver<ProxyEvent>,
    cancel: CancellationToken,
    protocol: &'static str,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            ProxyEvent::Payload(payload) => {
                let bytes = serde_json::to_vec(&payload).map(|b| b.len()).unwrap_or(0) as u64;
                state.record_receive(bytes);

                let fields = points::payload_fields(&payload);
                sink.submit_opt(points::telemetry(&state.scope(), None, fields));
            }
            ProxyEvent::Dropped => {
                state
                    .counters
                    .proxy_dropped_payloads
                    .fetch_add(1, Ordering::Relaxed);
            }
            ProxyEvent::Connected { latency_ms } => {
                state.set_connection_state(ConnectionState::Connected);
                if state.status() == DeviceStatus::Reconnecting {
                    state.set_status(DeviceStatus::Running);
                }
                sink.submit(points::connection(
                    &state.id,
                    protocol,
                    state.source,
                    true,
                    Some(latency_ms),
                ));
            }
            ProxyEvent::ConnectionLost => {
                state.set_connection_state(ConnectionState::Reconnecting);
                if state.status() == DeviceStatus::Running {
                    state.set_status(DeviceStatus::Reconnecting);
                }
                sink.submit(points::connection(
                    &state.id,
                    protocol,
                    state.source,
                    false,
                    None,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsim_sink::MetricValue;

    fn proxy_device() -> ProxyDevice {
        let model: DeviceModel = serde_json::from_value(serde_json::json!({
            "id": "p1",
            "name": "Proxy",
            "type": "proxy",
            "protocol": "http",
            "telemetry": []
        }))
        .unwrap();

        ProxyDevice::new(
            "p-0".to_string(),
            Arc::new(model),
            None,
            Arc::new(EngineCounters::default()),
            MetricsSink::capture(),
            Arc::new(WebhookRegistry::new()),
            EngineDefaults::default(),
        )
    }

    #[test]
    fn test_binding_config_validation() {
        let http = BindingConfig {
            protocol: Protocol::Http,
            broker: None,
            port: None,
            topic: None,
            qos: 0,
            username: None,
            password_ref: None,
        };
        assert!(http.validate().is_ok());

        let mut mqtt = http.clone();
        mqtt.protocol = Protocol::Mqtt;
        assert!(mqtt.validate().is_err());
        mqtt.broker = Some("broker".to_string());
        assert!(mqtt.validate().is_ok());

        let mut coap = http.clone();
        coap.protocol = Protocol::Coap;
        assert!(coap.validate().is_err());
    }

    #[tokio::test]
    async fn test_http_bind_and_webhook_passthrough() {
        let device = proxy_device();
        let config = BindingConfig {
            protocol: Protocol::Http,
            broker: None,
            port: None,
            topic: None,
            qos: 0,
            username: None,
            password_ref: None,
        };

        let webhook_url = device.bind(config).await.unwrap();
        assert_eq!(webhook_url.as_deref(), Some("/api/v1/webhooks/p-0"));
        assert_eq!(device.state().status(), DeviceStatus::Running);
        assert!(device.webhooks.is_registered("p-0"));

        // Deliver a payload through the registry, as the control plane does
        let outcome = device.webhooks.deliver(
            "p-0",
            serde_json::json!({"temperature": 25.5, "humidity": 60}),
        );
        assert_eq!(outcome, fleetsim_adapters::WebhookDelivery::Accepted);

        // Wait for the pump to process
        for _ in 0..50 {
            if device.state().counters.messages_received.load(Ordering::Relaxed) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(
            device.state().counters.messages_received.load(Ordering::Relaxed),
            1
        );

        let telemetry: Vec<_> = device
            .sink
            .captured()
            .into_iter()
            .filter(|p| p.measurement() == "telemetry")
            .collect();
        assert_eq!(telemetry.len(), 1);
        assert_eq!(telemetry[0].tag("deviceId"), Some("p-0"));
        assert_eq!(telemetry[0].tag("modelId"), Some("p1"));
        assert_eq!(telemetry[0].tag("source"), Some("physical"));
        assert_eq!(
            telemetry[0].value("temperature"),
            Some(&MetricValue::Float(25.5))
        );
        assert_eq!(
            telemetry[0].value("humidity"),
            Some(&MetricValue::Integer(60))
        );

        // Double bind is refused
        let again = BindingConfig {
            protocol: Protocol::Http,
            broker: None,
            port: None,
            topic: None,
            qos: 0,
            username: None,
            password_ref: None,
        };
        assert!(matches!(
            device.bind(again).await,
            Err(DeviceError::AlreadyBound)
        ));

        // Unbind releases the webhook route
        device.unbind().await.unwrap();
        assert_eq!(device.state().status(), DeviceStatus::Stopped);
        assert!(!device.webhooks.is_registered("p-0"));
        assert!(!device.binding_status().bound);
    }

    #[tokio::test]
    async fn test_non_object_payload_counted_as_dropped() {
        let device = proxy_device();
        device
            .bind(BindingConfig {
                protocol: Protocol::Http,
                broker: None,
                port: None,
                topic: None,
                qos: 0,
                username: None,
                password_ref: None,
            })
            .await
            .unwrap();

        let outcome = device.webhooks.deliver("p-0", serde_json::json!([1, 2, 3]));
        assert_eq!(outcome, fleetsim_adapters::WebhookDelivery::Rejected);

        for _ in 0..50 {
            if device
                .state()
                .counters
                .proxy_dropped_payloads
                .load(Ordering::Relaxed)
                == 1
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(
            device
                .state()
                .counters
                .proxy_dropped_payloads
                .load(Ordering::Relaxed),
            1
        );
        assert_eq!(
            device.state().counters.messages_received.load(Ordering::Relaxed),
            0
        );

        device.unbind().await.unwrap();
    }
}
