//! MQTT egress adapter backed by rumqttc.

use crate::queue::PublishQueue;
use crate::{AdapterConfig, AdapterError, AdapterEvent, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) fn to_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Persistent MQTT connection with automatic reconnect.
///
/// The event-loop task keeps polling (and therefore reconnecting) for the
/// adapter's whole lifetime; the worker task drains the publish queue and,
/// for QoS 1/2, waits for the broker's ack before reporting the outcome.
pub struct MqttAdapter {
    client: AsyncClient,
    cancel: CancellationToken,
    io_task: JoinHandle<()>,
    worker_task: JoinHandle<()>,
}

impl MqttAdapter {
    pub async fn connect(
        config: AdapterConfig,
        queue: Arc<PublishQueue>,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Result<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(config.clean_session);
        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, 10);
        let cancel = CancellationToken::new();
        let (conn_tx, mut conn_rx) = watch::channel(false);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        let io_task = tokio::spawn(run_event_loop(
            eventloop,
            conn_tx,
            ack_tx,
            events.clone(),
            cancel.clone(),
            config.host.clone(),
            config.port,
        ));

        let worker_task = tokio::spawn(run_worker(
            client.clone(),
            queue,
            ack_rx,
            events,
            cancel.clone(),
            config.clone(),
        ));

        let adapter = Self {
            client,
            cancel,
            io_task,
            worker_task,
        };

        // Block until the first CONNACK or the connect timeout.
        let wait = tokio::time::timeout(config.connect_timeout, async {
            while !*conn_rx.borrow() {
                if conn_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        if wait.is_err() {
            let endpoint = format!("{}:{}", config.host, config.port);
            adapter.close().await;
            return Err(AdapterError::ConnectTimeout(endpoint));
        }
        Ok(adapter)
    }

    pub async fn close(self) {
        self.cancel.cancel();
        // The request channel may be wedged when the broker is gone; don't
        // let teardown hang on it.
        let _ = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            self.client.disconnect(),
        )
        .await;
        let _ = self.io_task.await;
        let _ = self.worker_task.await;
    }
}

async fn run_event_loop(
    mut eventloop: rumqttc::EventLoop,
    conn_tx: watch::Sender<bool>,
    ack_tx: mpsc::UnboundedSender<()>,
    events: mpsc::UnboundedSender<AdapterEvent>,
    cancel: CancellationToken,
    host: String,
    port: u16,
) {
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
                conn_tx.send_replace(true);
                let _ = events.send(AdapterEvent::Connected { latency_ms });
            }
            Ok(Event::Incoming(Packet::PubAck(_))) | Ok(Event::Incoming(Packet::PubComp(_))) => {
                let _ = ack_tx.send(());
            }
            Ok(_) => {}
            Err(e) => {
                if conn_tx.send_replace(false) {
                    let _ = events.send(AdapterEvent::ConnectionLost);
                }
                warn!("mqtt connection to {}:{} lost: {}", host, port, e);

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

async fn run_worker(
    client: AsyncClient,
    queue: Arc<PublishQueue>,
    mut ack_rx: mpsc::UnboundedReceiver<()>,
    events: mpsc::UnboundedSender<AdapterEvent>,
    cancel: CancellationToken,
    config: AdapterConfig,
) {
    while let Some(job) = queue.pop(&cancel).await {
        let bytes = job.payload.len() as u64;
        let qos = to_qos(job.qos);

        // Discard acks left over from publishes that already timed out
        while ack_rx.try_recv().is_ok() {}

        // The client's request channel can stall while the broker is away;
        // stay cancellable.
        let published = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.publish(job.topic.clone(), qos, false, job.payload) => result,
        };
        if let Err(e) = published {
            debug!("mqtt publish to {} failed: {}", job.topic, e);
            let _ = events.send(AdapterEvent::PublishFailed);
            continue;
        }

        if job.qos > 0 {
            let acked = tokio::select! {
                _ = cancel.cancelled() => break,
                acked = tokio::time::timeout(config.publish_timeout, ack_rx.recv()) => acked,
            };
            match acked {
                Ok(Some(())) => {
                    let _ = events.send(AdapterEvent::Published {
                        bytes,
                        point: job.point,
                    });
                }
                _ => {
                    let _ = events.send(AdapterEvent::PublishFailed);
                }
            }
        } else {
            // Fire and forget
            let _ = events.send(AdapterEvent::Published {
                bytes,
                point: job.point,
            });
        }
    }
}
