//! Shared per-device state and engine-wide counters.

use chrono::{DateTime, Utc};
use fleetsim_core::{ConnectionState, DeviceModel, DeviceStatus, Source};
use fleetsim_sink::DeviceScope;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Engine-wide running counters, kept O(1) so stats never scan the catalog.
#[derive(Debug, Default)]
pub struct EngineCounters {
    pub running_simulated: AtomicU64,
    pub running_physical: AtomicU64,
    pub total_messages: AtomicU64,
    pub total_bytes: AtomicU64,
}

impl EngineCounters {
    pub fn running_devices(&self) -> u64 {
        self.running_simulated.load(Ordering::Relaxed) + self.running_physical.load(Ordering::Relaxed)
    }
}

/// Engine-level defaults handed to every device at creation.
#[derive(Debug, Clone)]
pub struct EngineDefaults {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub publish_queue_capacity: usize,
    pub graceful_stop_timeout: Duration,
    /// Backoff cap for dropout reconnects.
    pub reconnect_cap: Duration,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
            publish_queue_capacity: 1024,
            graceful_stop_timeout: Duration::from_secs(5),
            reconnect_cap: Duration::from_secs(30),
        }
    }
}

/// Monotonically non-decreasing per-device counters.
#[derive(Debug, Default)]
pub struct DeviceCounters {
    pub messages_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub error_count: AtomicU64,
    pub dropped_publishes: AtomicU64,
    pub proxy_dropped_payloads: AtomicU64,
}

/// State shared between a device's owner, its supervisor and the manager.
pub struct DeviceState {
    pub id: String,
    pub model: Arc<DeviceModel>,
    pub group_id: Option<String>,
    pub source: Source,
    pub counters: DeviceCounters,
    pub created_at: DateTime<Utc>,

    status: RwLock<DeviceStatus>,
    connection_state: RwLock<ConnectionState>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    bound_at: RwLock<Option<DateTime<Utc>>>,
    last_telemetry_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    counted_running: AtomicBool,
}

impl DeviceState {
    pub fn new(id: String, model: Arc<DeviceModel>, group_id: Option<String>) -> Arc<Self> {
        let source = if model.is_proxy() {
            Source::Physical
        } else {
            Source::Simulated
        };
        Arc::new(Self {
            id,
            model,
            group_id,
            source,
            counters: DeviceCounters::default(),
            created_at: Utc::now(),
            status: RwLock::new(DeviceStatus::Created),
            connection_state: RwLock::new(ConnectionState::Disconnected),
            started_at: RwLock::new(None),
            bound_at: RwLock::new(None),
            last_telemetry_at: RwLock::new(None),
            error_message: RwLock::new(None),
            counted_running: AtomicBool::new(false),
        })
    }

    /// The identity tags this device stamps on every emitted point.
    pub fn scope(&self) -> DeviceScope<'_> {
        DeviceScope {
            device_id: &self.id,
            model_id: &self.model.id,
            group_id: self.group_id.as_deref(),
            source: self.source,
        }
    }

    pub fn status(&self) -> DeviceStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: DeviceStatus) {
        *self.status.write() = status;
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        *self.connection_state.write() = state;
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.read()
    }

    pub fn mark_started(&self) {
        *self.started_at.write() = Some(Utc::now());
    }

    pub fn bound_at(&self) -> Option<DateTime<Utc>> {
        *self.bound_at.read()
    }

    pub fn mark_bound(&self) {
        *self.bound_at.write() = Some(Utc::now());
    }

    pub fn last_telemetry_at(&self) -> Option<DateTime<Utc>> {
        *self.last_telemetry_at.read()
    }

    pub fn touch_telemetry(&self) {
        *self.last_telemetry_at.write() = Some(Utc::now());
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    pub fn set_error(&self, message: Option<String>) {
        *self.error_message.write() = message;
    }

    /// Counts this device into the engine-wide running totals, exactly once
    /// per run.
    pub fn mark_running(&self, engine: &EngineCounters) {
        if !self.counted_running.swap(true, Ordering::AcqRel) {
            match self.source {
                Source::Simulated => engine.running_simulated.fetch_add(1, Ordering::Relaxed),
                Source::Physical => engine.running_physical.fetch_add(1, Ordering::Relaxed),
            };
        }
    }

    /// Removes this device from the engine-wide running totals.
    pub fn unmark_running(&self, engine: &EngineCounters) {
        if self.counted_running.swap(false, Ordering::AcqRel) {
            match self.source {
                Source::Simulated => engine.running_simulated.fetch_sub(1, Ordering::Relaxed),
                Source::Physical => engine.running_physical.fetch_sub(1, Ordering::Relaxed),
            };
        }
    }

    pub fn record_publish(&self, bytes: u64, engine: &EngineCounters) {
        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        engine.total_messages.fetch_add(1, Ordering::Relaxed);
        engine.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.touch_telemetry();
    }

    pub fn record_receive(&self, bytes: u64) {
        self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        self.touch_telemetry();
    }

    pub fn snapshot(&self, binding: Option<crate::BindingStatus>) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id.clone(),
            model_id: self.model.id.clone(),
            group_id: self.group_id.clone(),
            source: self.source,
            status: self.status(),
            connection_state: self.connection_state(),
            created_at: self.created_at,
            started_at: self.started_at(),
            last_telemetry_at: self.last_telemetry_at(),
            error_message: self.error_message(),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            dropped_publishes: self.counters.dropped_publishes.load(Ordering::Relaxed),
            proxy_dropped_payloads: self
                .counters
                .proxy_dropped_payloads
                .load(Ordering::Relaxed),
            binding,
        }
    }

    pub fn metrics(&self) -> DeviceMetricsSnapshot {
        let connection_state = self.connection_state();
        let connection_duration = if connection_state == ConnectionState::Connected {
            self.started_at()
                .or_else(|| self.bound_at())
                .map(|t| (Utc::now() - t).num_milliseconds().max(0) as f64 / 1000.0)
                .unwrap_or(0.0)
        } else {
            0.0
        };

        DeviceMetricsSnapshot {
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            last_telemetry: self.last_telemetry_at(),
            connection_duration,
            connection_state,
        }
    }
}

/// Serializable device view returned by the control plane.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub id: String,
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub source: Source,
    pub status: DeviceStatus,
    pub connection_state: ConnectionState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_telemetry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub dropped_publishes: u64,
    pub proxy_dropped_payloads: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<crate::BindingStatus>,
}

/// Per-device metrics view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetricsSnapshot {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_telemetry: Option<DateTime<Utc>>,
    pub connection_duration: f64,
    pub connection_state: ConnectionState,
}
