//! MQTT ingress adapter for proxy devices.
//!
//! Subscribes to an external broker's topic and forwards each JSON payload
//! to the owning proxy device over an event channel.

use crate::{AdapterError, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Events an ingress adapter delivers to its proxy device.
#[derive(Debug)]
pub enum ProxyEvent {
    Connected { latency_ms: f64 },
    ConnectionLost,
    /// A well-formed JSON object payload.
    Payload(serde_json::Value),
    /// A payload that was not a JSON object and was discarded.
    Dropped,
}

/// Binding parameters for an MQTT ingress subscription.
#[derive(Debug, Clone)]
pub struct MqttProxyConfig {
    pub device_id: String,
    pub broker: String,
    pub port: u16,
    pub topic: String,
    pub qos: u8,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
}

pub struct MqttProxyAdapter {
    client: AsyncClient,
    cancel: CancellationToken,
    io_task: JoinHandle<()>,
}

impl MqttProxyAdapter {
    /// Connects, subscribes and starts forwarding payloads into `events`.
    /// Blocks until the subscription's connection is up or times out.
    pub async fn bind(
        config: MqttProxyConfig,
        events: mpsc::UnboundedSender<ProxyEvent>,
    ) -> Result<Self> {
        let client_id = format!("fleetsim-proxy-{}", config.device_id);
        let mut options = MqttOptions::new(client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, 10);
        let cancel = CancellationToken::new();
        let (conn_tx, mut conn_rx) = watch::channel(false);

        let io_task = tokio::spawn(run_subscription(
            eventloop,
            client.clone(),
            config.clone(),
            conn_tx,
            events,
            cancel.clone(),
        ));

        let adapter = Self {
            client,
            cancel,
            io_task,
        };

        let wait = tokio::time::timeout(config.connect_timeout, async {
            while !*conn_rx.borrow() {
                if conn_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        if wait.is_err() {
            let endpoint = format!("{}:{}", config.broker, config.port);
            adapter.unbind().await;
            return Err(AdapterError::ConnectTimeout(endpoint));
        }
        Ok(adapter)
    }

    /// Drops the subscription and disconnects.
    pub async fn unbind(self) {
        self.cancel.cancel();
        let _ = tokio::time::timeout(
            Duration::from_secs(1),
            self.client.disconnect(),
        )
        .await;
        let _ = self.io_task.await;
    }
}

async fn run_subscription(
    mut eventloop: rumqttc::EventLoop,
    client: AsyncClient,
    config: MqttProxyConfig,
    conn_tx: watch::Sender<bool>,
    events: mpsc::UnboundedSender<ProxyEvent>,
    cancel: CancellationToken,
) {
    let qos = crate::mqtt::to_qos(config.qos);
    let mut attempt_started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = eventloop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let latency_ms = attempt_started.elapsed().as_secs_f64() * 1000.0;
                attempt = 0;
                // Sessions are clean; re-subscribe on every (re)connect
                if let Err(e) = client.subscribe(&config.topic, qos).await {
                    warn!("proxy subscribe to {} failed: {}", config.topic, e);
                    continue;
                }
                conn_tx.send_replace(true);
                let _ = events.send(ProxyEvent::Connected { latency_ms });
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match serde_json::from_slice::<serde_json::Value>(&publish.payload) {
                    Ok(value) if value.is_object() => {
                        let _ = events.send(ProxyEvent::Payload(value));
                    }
                    _ => {
                        debug!(
                            "proxy {} dropped non-JSON payload on {}",
                            config.device_id, publish.topic
                        );
                        let _ = events.send(ProxyEvent::Dropped);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                if conn_tx.send_replace(false) {
                    let _ = events.send(ProxyEvent::ConnectionLost);
                }
                warn!(
                    "proxy connection to {}:{} lost: {}",
                    config.broker, config.port, e
                );

                let delay = crate::reconnect_backoff(attempt);
                attempt = attempt.saturating_add(1);
                attempt_started = Instant::now();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_times_out_without_broker() {
        let config = MqttProxyConfig {
            device_id: "p-0".to_string(),
            broker: "127.0.0.1".to_string(),
            port: 1,
            topic: "ext/p-0".to_string(),
            qos: 0,
            username: None,
            password: None,
            connect_timeout: Duration::from_millis(200),
        };
        let (events, _rx) = mpsc::unbounded_channel();
        let result = MqttProxyAdapter::bind(config, events).await;
        assert!(matches!(result, Err(AdapterError::ConnectTimeout(_))));
    }
}
