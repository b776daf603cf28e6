//! HTTP egress adapter: per-publish POST over a pooled client.

use crate::queue::PublishQueue;
use crate::{AdapterConfig, AdapterEvent, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct HttpAdapter {
    cancel: CancellationToken,
    worker_task: JoinHandle<()>,
}

/// Builds the target URL from the adapter endpoint and the resolved topic.
pub fn publish_url(tls: bool, host: &str, port: u16, topic: &str) -> String {
    let scheme = if tls { "https" } else { "http" };
    format!("{}://{}:{}/{}", scheme, host, port, topic.trim_start_matches('/'))
}

impl HttpAdapter {
    pub async fn connect(
        config: AdapterConfig,
        queue: Arc<PublishQueue>,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Result<Self> {
        let started = Instant::now();
        let client = reqwest::Client::builder()
            .timeout(config.publish_timeout)
            .build()?;

        // Connection reuse is handled by the pooled client; the adapter
        // counts as connected once the client exists.
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let _ = events.send(AdapterEvent::Connected { latency_ms });

        let cancel = CancellationToken::new();
        let worker_task = tokio::spawn(run_worker(client, queue, events, cancel.clone(), config));

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
    client: reqwest::Client,
    queue: Arc<PublishQueue>,
    events: mpsc::UnboundedSender<AdapterEvent>,
    cancel: CancellationToken,
    config: AdapterConfig,
) {
    let mut consecutive_failures: u32 = 0;

    while let Some(job) = queue.pop(&cancel).await {
        let bytes = job.payload.len() as u64;
        let url = publish_url(config.tls, &config.host, config.port, &job.topic);

        let mut request = client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(job.payload);
        if let Some(username) = &config.username {
            request = request.basic_auth(username, config.password.as_deref());
        }

        let ok = match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("http publish to {} failed: {}", url, e);
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
