//! The metrics sink: bounded buffer plus background flusher.

use crate::line::format_batch;
use crate::point::MetricPoint;
use crate::{Result, SinkError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sink configuration.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Base URL of the InfluxDB-compatible endpoint.
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// Points per batch; a batch is shipped when full or on the flush tick.
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Bounded buffer capacity; oldest points are dropped on overflow.
    pub buffer_capacity: usize,
    pub retry_initial: Duration,
    pub retry_cap: Duration,
    pub shutdown_deadline: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: "fleetsim".to_string(),
            bucket: "telemetry".to_string(),
            batch_size: 5000,
            flush_interval: Duration::from_secs(1),
            buffer_capacity: 100_000,
            retry_initial: Duration::from_secs(1),
            retry_cap: Duration::from_secs(30),
            shutdown_deadline: Duration::from_secs(5),
        }
    }
}

enum SinkMode {
    /// No endpoint configured; every point is discarded.
    Disabled,
    /// Test mode: points are kept in memory for inspection.
    Capture(Mutex<Vec<MetricPoint>>),
    Remote(RemoteState),
}

struct RemoteState {
    buffer: Mutex<VecDeque<MetricPoint>>,
    notify: Notify,
    capacity: usize,
    batch_size: usize,
    dropped: AtomicU64,
    cancel: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the engine-wide metrics sink.
///
/// Submission is non-blocking in every mode; the sink never stalls a device.
#[derive(Clone)]
pub struct MetricsSink {
    inner: Arc<SinkMode>,
}

impl MetricsSink {
    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(SinkMode::Disabled),
        }
    }

    /// A sink that records submitted points in memory. Test support.
    pub fn capture() -> Self {
        Self {
            inner: Arc::new(SinkMode::Capture(Mutex::new(Vec::new()))),
        }
    }

    /// Spawns the background flusher and returns the handle.
    pub fn spawn(config: SinkConfig) -> Self {
        let cancel = CancellationToken::new();
        let state = RemoteState {
            buffer: Mutex::new(VecDeque::with_capacity(config.batch_size)),
            notify: Notify::new(),
            capacity: config.buffer_capacity.max(1),
            batch_size: config.batch_size.max(1),
            dropped: AtomicU64::new(0),
            cancel: cancel.clone(),
            flusher: Mutex::new(None),
        };

        let sink = Self {
            inner: Arc::new(SinkMode::Remote(state)),
        };

        let flusher_sink = sink.clone();
        let handle = tokio::spawn(async move {
            run_flusher(flusher_sink, config).await;
        });

        if let SinkMode::Remote(state) = sink.inner.as_ref() {
            *state.flusher.lock() = Some(handle);
        }
        sink
    }

    /// Builds a sink from config: remote when an endpoint is configured,
    /// disabled otherwise.
    pub fn from_config(config: SinkConfig) -> Self {
        if config.url.is_empty() || config.token.is_empty() {
            warn!("metrics sink not configured, points will be discarded");
            return Self::disabled();
        }
        Self::spawn(config)
    }

    /// Submits a point. Never blocks; drops oldest on overflow.
    pub fn submit(&self, point: MetricPoint) {
        match self.inner.as_ref() {
            SinkMode::Disabled => {}
            SinkMode::Capture(points) => points.lock().push(point),
            SinkMode::Remote(state) => {
                let notify_full;
                {
                    let mut buffer = state.buffer.lock();
                    if buffer.len() >= state.capacity {
                        buffer.pop_front();
                        state.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    buffer.push_back(point);
                    notify_full = buffer.len() >= state.batch_size;
                }
                if notify_full {
                    state.notify.notify_one();
                }
            }
        }
    }

    /// Submits a point when one was produced.
    pub fn submit_opt(&self, point: Option<MetricPoint>) {
        if let Some(point) = point {
            self.submit(point);
        }
    }

    /// Number of points dropped to overflow.
    pub fn dropped(&self) -> u64 {
        match self.inner.as_ref() {
            SinkMode::Remote(state) => state.dropped.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// Points recorded by a capture sink. Empty for other modes.
    pub fn captured(&self) -> Vec<MetricPoint> {
        match self.inner.as_ref() {
            SinkMode::Capture(points) => points.lock().clone(),
            _ => Vec::new(),
        }
    }

    /// Stops the flusher, flushing buffered points within the configured
    /// deadline.
    pub async fn shutdown(&self) {
        if let SinkMode::Remote(state) = self.inner.as_ref() {
            state.cancel.cancel();
            let handle = state.flusher.lock().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }
    }

    fn remote(&self) -> Option<&RemoteState> {
        match self.inner.as_ref() {
            SinkMode::Remote(state) => Some(state),
            _ => None,
        }
    }
}

async fn run_flusher(sink: MetricsSink, config: SinkConfig) {
    let client = reqwest::Client::new();
    let write_url = format!(
        "{}/api/v2/write?org={}&bucket={}&precision=ns",
        config.url.trim_end_matches('/'),
        config.org,
        config.bucket
    );

    let Some(state) = sink.remote() else {
        return;
    };

    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => break,
            _ = state.notify.notified() => {}
            _ = tokio::time::sleep(config.flush_interval) => {}
        }

        flush_pending(state, &client, &write_url, &config, false).await;
    }

    // Final flush, bounded by the shutdown deadline.
    let _ = tokio::time::timeout(
        config.shutdown_deadline,
        flush_pending(state, &client, &write_url, &config, true),
    )
    .await;
}

async fn flush_pending(
    state: &RemoteState,
    client: &reqwest::Client,
    write_url: &str,
    config: &SinkConfig,
    draining: bool,
) {
    loop {
        let batch: Vec<MetricPoint> = {
            let mut buffer = state.buffer.lock();
            let take = buffer.len().min(state.batch_size);
            buffer.drain(..take).collect()
        };
        if batch.is_empty() {
            return;
        }

        let body = format_batch(&batch);
        let mut delay = config.retry_initial;
        loop {
            match write_batch(client, write_url, &config.token, &body).await {
                Ok(()) => {
                    debug!(points = batch.len(), "metrics batch written");
                    break;
                }
                Err(e) => {
                    warn!("metrics batch write failed: {}", e);
                    if !draining && state.cancel.is_cancelled() {
                        return;
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(config.retry_cap);
                }
            }
        }
    }
}

async fn write_batch(
    client: &reqwest::Client,
    write_url: &str,
    token: &str,
    body: &str,
) -> Result<()> {
    let response = client
        .post(write_url)
        .header("Authorization", format!("Token {}", token))
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(body.to_string())
        .send()
        .await?;

    if response.status().is_success() {
        Ok(())
    } else {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Server { status, body })
    }
}
