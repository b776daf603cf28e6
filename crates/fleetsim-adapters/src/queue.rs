//! Bounded drop-oldest publish queue.
//!
//! The queue is owned by the device, not the adapter, so it survives
//! adapter teardown during reconnects and dropouts: queued publishes are
//! picked up by the replacement adapter's worker.

use fleetsim_sink::MetricPoint;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One pending publish.
#[derive(Debug)]
pub struct PublishJob {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    /// Telemetry point to emit once the publish succeeds.
    pub point: Option<MetricPoint>,
}

/// Bounded FIFO of pending publishes with drop-oldest overflow.
pub struct PublishQueue {
    jobs: Mutex<VecDeque<PublishJob>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl PublishQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues a job. Returns `false` when the oldest pending job was
    /// dropped to make room.
    pub fn push(&self, job: PublishJob) -> bool {
        let overflowed;
        {
            let mut jobs = self.jobs.lock();
            overflowed = jobs.len() >= self.capacity;
            if overflowed {
                jobs.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            jobs.push_back(job);
        }
        self.notify.notify_one();
        !overflowed
    }

    /// Dequeues the next job, waiting until one is available or the token
    /// is cancelled.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<PublishJob> {
        loop {
            if let Some(job) = self.jobs.lock().pop_front() {
                return Some(job);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Publishes dropped to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for PublishQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
