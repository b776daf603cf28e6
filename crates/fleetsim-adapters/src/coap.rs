//! CoAP egress adapter: per-publish POST over UDP.
//!
//! There is no long-lived CoAP session; the link counts as up from the
//! first successful exchange until `failure_threshold` consecutive
//! publishes fail.

use crate::queue::PublishQueue;
use crate::{AdapterConfig, AdapterEvent, Result};
use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct CoapAdapter {
    cancel: CancellationToken,
    worker_task: JoinHandle<()>,
}

impl CoapAdapter {
    pub async fn connect(
        config: AdapterConfig,
        queue: Arc<PublishQueue>,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Result<Self> {
        let started = Instant::now();
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((config.host.as_str(), config.port)).await?;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let _ = events.send(AdapterEvent::Connected { latency_ms });

        let cancel = CancellationToken::new();
        let worker_task = tokio::spawn(run_worker(
            Arc::new(socket),
            queue,
            events,
            cancel.clone(),
            config,
        ));

        Ok(Self {
            cancel,
            worker_task,
        })
    }

    pub async fn close(self) {
        self.cancel.cancel();
        let _ = self.worker_task.await;
    }
}

async fn run_worker(
    socket: Arc<UdpSocket>,
    queue: Arc<PublishQueue>,
    events: mpsc::UnboundedSender<AdapterEvent>,
    cancel: CancellationToken,
    config: AdapterConfig,
) {
    let mut message_id: u16 = 1;
    let mut consecutive_failures: u32 = 0;
    let mut recv_buf = vec![0u8; 2048];

    while let Some(job) = queue.pop(&cancel).await {
        let bytes = job.payload.len() as u64;
        let confirmable = job.qos >= 1;
        let request = build_post(&job.topic, job.payload, message_id, confirmable);
        message_id = message_id.wrapping_add(1).max(1);

        let ok = match request.to_bytes() {
            Ok(datagram) => {
                exchange(&socket, &datagram, &request, confirmable, &config, &mut recv_buf).await
            }
            Err(e) => {
                debug!("coap encode failed: {:?}", e);
                false
            }
        };

        if ok {
            if consecutive_failures >= config.failure_threshold {
                let _ = events.send(AdapterEvent::Connected { latency_ms: 0.0 });
            }
            consecutive_failures = 0;
            let _ = events.send(AdapterEvent::Published {
                bytes,
                point: job.point,
            });
        } else {
            consecutive_failures = consecutive_failures.saturating_add(1);
            if consecutive_failures == config.failure_threshold {
                let _ = events.send(AdapterEvent::ConnectionLost);
            }
            let _ = events.send(AdapterEvent::PublishFailed);
        }
    }
}

async fn exchange(
    socket: &UdpSocket,
    datagram: &[u8],
    request: &Packet,
    confirmable: bool,
    config: &AdapterConfig,
    recv_buf: &mut [u8],
) -> bool {
    if socket.send(datagram).await.is_err() {
        return false;
    }
    if !confirmable {
        return true;
    }

    // Confirmable exchange: wait for the matching ACK
    let deadline = tokio::time::Instant::now() + config.publish_timeout;
    loop {
        let received = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            received = socket.recv(recv_buf) => received,
        };
        let Ok(len) = received else {
            return false;
        };
        let Ok(response) = Packet::from_bytes(&recv_buf[..len]) else {
            continue;
        };
        if response.header.message_id != request.header.message_id {
            continue;
        }
        return is_success(&response.header.code);
    }
}

/// Builds a CoAP POST to the resource path.
pub fn build_post(path: &str, payload: Vec<u8>, message_id: u16, confirmable: bool) -> Packet {
    let mut packet = Packet::new();
    packet.header.message_id = message_id;
    packet.header.set_type(if confirmable {
        MessageType::Confirmable
    } else {
        MessageType::NonConfirmable
    });
    packet.header.code = MessageClass::Request(RequestType::Post);
    packet.set_token(message_id.to_be_bytes().to_vec());

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    packet.set_content_format(coap_lite::ContentFormat::ApplicationJSON);
    packet.payload = payload;
    packet
}

fn is_success(code: &MessageClass) -> bool {
    matches!(
        code,
        MessageClass::Response(
            ResponseType::Created
                | ResponseType::Deleted
                | ResponseType::Valid
                | ResponseType::Changed
                | ResponseType::Content
        ) | MessageClass::Empty
    )
}
