//! The virtual device actor.
//!
//! Each running device is a supervisor task that owns one protocol adapter
//! and one periodic task per telemetry attribute. Control-plane calls only
//! flip the lifecycle state and signal the supervisor; connecting,
//! publishing and sleeping all happen inside the actor.

use crate::error::{DeviceError, Result};
use crate::schedule::{metric_value, next_fire, telemetry_payload};
use crate::state::{DeviceSnapshot, DeviceState, EngineCounters, EngineDefaults};
use chrono::Utc;
use fleetsim_adapters::{
    AdapterConfig, AdapterEvent, ProtocolAdapter, PublishJob, PublishQueue,
};
use fleetsim_core::{
    ConnectionState, DeviceModel, DeviceStatus, PatternContext, Protocol, ResolvedPattern,
    TelemetryAttribute,
};
use fleetsim_generators::{HandlerRegistry, ValueGenerator};
use fleetsim_sink::{points, MetricsSink};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Commands the manager can send into a running supervisor.
#[derive(Debug)]
pub enum DeviceCommand {
    /// Simulate a dropped link; reconnect after `delay` when requested.
    Dropout { reconnect: bool, delay: Duration },
}

struct DeviceRuntime {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<DeviceCommand>,
    handle: JoinHandle<()>,
}

/// A simulated device.
pub struct VirtualDevice {
    state: Arc<DeviceState>,
    engine: Arc<EngineCounters>,
    sink: MetricsSink,
    registry: Arc<HandlerRegistry>,
    defaults: EngineDefaults,
    /// Holding this lock is the per-device transition window.
    runtime: Mutex<Option<DeviceRuntime>>,
}

impl VirtualDevice {
    pub fn new(
        id: String,
        model: Arc<DeviceModel>,
        group_id: Option<String>,
        engine: Arc<EngineCounters>,
        sink: MetricsSink,
        registry: Arc<HandlerRegistry>,
        defaults: EngineDefaults,
    ) -> Self {
        Self {
            state: DeviceState::new(id, model, group_id),
            engine,
            sink,
            registry,
            defaults,
            runtime: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<DeviceState> {
        &self.state
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.state.snapshot(None)
    }

    /// Accepts a start request: transitions to STARTING and spawns the
    /// supervisor. Connecting and reaching RUNNING happen asynchronously.
    pub async fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;

        match self.state.status() {
            // Idempotent when a run is already underway
            DeviceStatus::Starting | DeviceStatus::Running | DeviceStatus::Reconnecting => {
                return Ok(())
            }
            DeviceStatus::Stopping => {
                return Err(DeviceError::Conflict("device is stopping".to_string()))
            }
            DeviceStatus::Deleted => {
                return Err(DeviceError::Conflict("device is deleted".to_string()))
            }
            DeviceStatus::Created | DeviceStatus::Stopped | DeviceStatus::Error => {}
        }

        self.state.set_error(None);
        self.state.set_status(DeviceStatus::Starting);

        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_supervisor(
            Arc::clone(&self.state),
            Arc::clone(&self.engine),
            self.sink.clone(),
            Arc::clone(&self.registry),
            self.defaults.clone(),
            cancel.clone(),
            commands_rx,
        ));

        *runtime = Some(DeviceRuntime {
            cancel,
            commands: commands_tx,
            handle,
        });
        Ok(())
    }

    /// Stops the device, waiting up to the graceful-stop timeout before
    /// forcibly releasing its tasks.
    pub async fn stop(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;

        match self.state.status() {
            DeviceStatus::Created | DeviceStatus::Stopped | DeviceStatus::Deleted => return Ok(()),
            _ => {}
        }

        self.state.set_status(DeviceStatus::Stopping);

        if let Some(rt) = runtime.take() {
            rt.cancel.cancel();
            let mut handle = rt.handle;
            if tokio::time::timeout(self.defaults.graceful_stop_timeout, &mut handle)
                .await
                .is_err()
            {
                warn!("device {} supervisor missed stop deadline, aborting", self.state.id);
                handle.abort();
            }
        }

        self.finalize_stop();
        info!("device {} stopped", self.state.id);
        Ok(())
    }

    /// Injects a programmed failure into a running device. Returns `false`
    /// when the device was not running.
    pub async fn dropout(&self, reconnect: bool, delay: Duration) -> bool {
        let runtime = self.runtime.lock().await;
        if !matches!(self.state.status(), DeviceStatus::Running) {
            return false;
        }
        match runtime.as_ref() {
            Some(rt) => rt
                .commands
                .send(DeviceCommand::Dropout { reconnect, delay })
                .is_ok(),
            None => false,
        }
    }

    fn finalize_stop(&self) {
        if self.state.status() == DeviceStatus::Stopped {
            // The supervisor already completed the transition (dropout path)
            return;
        }
        self.state.unmark_running(&self.engine);
        self.state.set_connection_state(ConnectionState::Disconnected);
        self.state.set_status(DeviceStatus::Stopped);

        self.sink.submit(points::connection(
            &self.state.id,
            self.state.model.protocol.as_str(),
            self.state.source,
            false,
            None,
        ));
        self.sink
            .submit(points::device_event(&self.state.scope(), "stopped"));
    }
}

/// Derives the adapter connection parameters for a device.
fn adapter_config(state: &DeviceState, defaults: &EngineDefaults) -> AdapterConfig {
    let model = &state.model;
    let conn = model.connection.clone().unwrap_or_default();
    let ctx = PatternContext {
        device_id: &state.id,
        model_id: &model.id,
        group_id: state.group_id.as_deref(),
    };

    let client_id_pattern = conn
        .client_id_pattern
        .unwrap_or_else(|| "${modelId}-${deviceId}".to_string());
    let client_id = ResolvedPattern::resolve(&client_id_pattern, &ctx).render();

    let (default_host, default_port) = match model.protocol {
        Protocol::Mqtt => (defaults.mqtt_host.clone(), defaults.mqtt_port),
        Protocol::Coap => ("localhost".to_string(), 5683),
        Protocol::Http => ("localhost".to_string(), if conn.tls { 443 } else { 80 }),
    };

    AdapterConfig {
        protocol: model.protocol,
        client_id,
        host: conn.broker.unwrap_or(default_host),
        port: conn.port.unwrap_or(default_port),
        tls: conn.tls,
        username: conn.username,
        password: conn
            .password_ref
            .as_deref()
            .and_then(|name| std::env::var(name).ok()),
        keep_alive: Duration::from_secs(conn.keep_alive.max(1)),
        clean_session: conn.clean_session,
        connect_timeout: defaults.connect_timeout,
        publish_timeout: defaults.publish_timeout,
        failure_threshold: 3,
    }
}

/// Resolves the publish topic for one attribute, cached for the run.
fn attribute_topic(state: &DeviceState, attr: &TelemetryAttribute) -> ResolvedPattern {
    let ctx = PatternContext {
        device_id: &state.id,
        model_id: &state.model.id,
        group_id: state.group_id.as_deref(),
    };
    let pattern = attr
        .topic
        .clone()
        .or_else(|| {
            state
                .model
                .connection
                .as_ref()
                .and_then(|c| c.topic_pattern.clone())
        })
        .unwrap_or_else(|| "devices/${deviceId}/telemetry".to_string());
    ResolvedPattern::resolve(&pattern, &ctx)
}

fn fail_start(state: &DeviceState, sink: &MetricsSink, message: String) {
    warn!("device {} failed to start: {}", state.id, message);
    state.counters.error_count.fetch_add(1, Ordering::Relaxed);
    state.set_error(Some(message));
    state.set_connection_state(ConnectionState::Disconnected);
    state.set_status(DeviceStatus::Error);

    sink.submit(points::connection(
        &state.id,
        state.model.protocol.as_str(),
        state.source,
        false,
        None,
    ));
    sink.submit(points::device_event(&state.scope(), "error"));
}

#[allow(clippy::too_many_arguments)]
async fn run_supervisor(
    state: Arc<DeviceState>,
    engine: Arc<EngineCounters>,
    sink: MetricsSink,
    registry: Arc<HandlerRegistry>,
    defaults: EngineDefaults,
    cancel: CancellationToken,
    mut commands: mpsc::UnboundedReceiver<DeviceCommand>,
) {
    // Seed generator state for every attribute before touching the network
    let mut generators = Vec::with_capacity(state.model.telemetry.len());
    for attr in &state.model.telemetry {
        match ValueGenerator::from_spec(
            &attr.generator,
            attr.data_type,
            &state.id,
            &attr.name,
            &registry,
        ) {
            Ok(generator) => generators.push(generator),
            Err(e) => {
                fail_start(&state, &sink, e.to_string());
                return;
            }
        }
    }

    let config = adapter_config(&state, &defaults);
    let queue = Arc::new(PublishQueue::new(defaults.publish_queue_capacity));
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    state.set_connection_state(ConnectionState::Connecting);
    let adapter =
        match ProtocolAdapter::connect(config.clone(), Arc::clone(&queue), events_tx.clone()).await
        {
            Ok(adapter) => adapter,
            Err(e) => {
                fail_start(&state, &sink, e.to_string());
                return;
            }
        };

    state.mark_started();
    state.mark_running(&engine);
    state.set_status(DeviceStatus::Running);
    sink.submit(points::device_event(&state.scope(), "started"));
    info!("device {} started", state.id);

    // One independent periodic task per attribute
    let attr_cancel = cancel.child_token();
    let mut attr_tasks = Vec::with_capacity(generators.len());
    for (attr, generator) in state.model.telemetry.iter().zip(generators) {
        attr_tasks.push(tokio::spawn(attribute_loop(
            Arc::clone(&state),
            attr.clone(),
            generator,
            Arc::clone(&queue),
            attribute_topic(&state, attr),
            state
                .model
                .connection
                .as_ref()
                .map(|c| c.qos)
                .unwrap_or(0),
            attr_cancel.clone(),
        )));
    }

    let mut adapter = Some(adapter);
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            Some(command) = commands.recv() => match command {
                DeviceCommand::Dropout { reconnect, delay } => {
                    info!("device {} dropout (reconnect={})", state.id, reconnect);
                    if let Some(a) = adapter.take() {
                        a.close().await;
                    }
                    sink.submit(points::connection(
                        &state.id,
                        state.model.protocol.as_str(),
                        state.source,
                        false,
                        None,
                    ));
                    sink.submit(points::device_event(&state.scope(), "dropout"));

                    if reconnect {
                        state.set_status(DeviceStatus::Reconnecting);
                        state.set_connection_state(ConnectionState::Reconnecting);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        match reconnect_loop(&config, &queue, &events_tx, &cancel, &defaults).await {
                            Some(a) => {
                                adapter = Some(a);
                                state.set_status(DeviceStatus::Running);
                                consecutive_failures = 0;
                            }
                            None => break,
                        }
                    } else {
                        // Dropped for good: behave like a full stop
                        attr_cancel.cancel();
                        state.unmark_running(&engine);
                        state.set_connection_state(ConnectionState::Disconnected);
                        state.set_status(DeviceStatus::Stopped);
                        sink.submit(points::device_event(&state.scope(), "stopped"));
                        for task in attr_tasks {
                            let _ = task.await;
                        }
                        return;
                    }
                }
            },

            Some(event) = events_rx.recv() => match event {
                AdapterEvent::Connected { latency_ms } => {
                    state.set_connection_state(ConnectionState::Connected);
                    if state.status() == DeviceStatus::Reconnecting {
                        state.set_status(DeviceStatus::Running);
                    }
                    consecutive_failures = 0;
                    sink.submit(points::connection(
                        &state.id,
                        state.model.protocol.as_str(),
                        state.source,
                        true,
                        Some(latency_ms),
                    ));
                }
                AdapterEvent::ConnectionLost => {
                    // Scheduler keeps firing; publishes buffer or drop
                    state.set_connection_state(ConnectionState::Reconnecting);
                    if state.status() == DeviceStatus::Running {
                        state.set_status(DeviceStatus::Reconnecting);
                    }
                    sink.submit(points::connection(
                        &state.id,
                        state.model.protocol.as_str(),
                        state.source,
                        false,
                        None,
                    ));
                }
                AdapterEvent::Published { bytes, point } => {
                    state.record_publish(bytes, &engine);
                    sink.submit_opt(point);
                    consecutive_failures = 0;
                }
                AdapterEvent::PublishFailed => {
                    state.counters.error_count.fetch_add(1, Ordering::Relaxed);
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if consecutive_failures == 3 {
                        debug!("device {} has 3 consecutive publish failures, reconnecting", state.id);
                        if let Some(a) = adapter.take() {
                            a.close().await;
                        }
                        state.set_status(DeviceStatus::Reconnecting);
                        state.set_connection_state(ConnectionState::Reconnecting);
                        match reconnect_loop(&config, &queue, &events_tx, &cancel, &defaults).await {
                            Some(a) => {
                                adapter = Some(a);
                                state.set_status(DeviceStatus::Running);
                                consecutive_failures = 0;
                            }
                            None => break,
                        }
                    }
                }
            },
        }
    }

    // Cancelled: release tasks and the connection; the owner finishes the
    // state transition.
    attr_cancel.cancel();
    if let Some(a) = adapter.take() {
        a.close().await;
    }
    for task in attr_tasks {
        let _ = task.await;
    }
}

/// Re-establishes the adapter with exponential backoff capped at the
/// configured limit. Returns `None` when cancelled.
async fn reconnect_loop(
    config: &AdapterConfig,
    queue: &Arc<PublishQueue>,
    events_tx: &mpsc::UnboundedSender<AdapterEvent>,
    cancel: &CancellationToken,
    defaults: &EngineDefaults,
) -> Option<ProtocolAdapter> {
    let mut delay = Duration::from_secs(1);
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match ProtocolAdapter::connect(config.clone(), Arc::clone(queue), events_tx.clone()).await {
            Ok(adapter) => return Some(adapter),
            Err(e) => {
                debug!("reconnect attempt failed: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(defaults.reconnect_cap);
            }
        }
    }
}

async fn attribute_loop(
    state: Arc<DeviceState>,
    attr: TelemetryAttribute,
    mut generator: ValueGenerator,
    queue: Arc<PublishQueue>,
    topic: ResolvedPattern,
    qos: u8,
    cancel: CancellationToken,
) {
    let interval = Duration::from_millis(attr.interval_ms.max(1));
    let mut fire_at = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(fire_at.into()) => {}
        }

        let now = Utc::now();
        let value = generator.next(now);
        let payload = telemetry_payload(&state.id, &attr.name, attr.unit.as_deref(), &value, now);

        let point = metric_value(&value).and_then(|mv| {
            points::telemetry(
                &state.scope(),
                attr.unit.as_deref(),
                vec![(attr.name.clone(), mv)],
            )
        });

        let accepted = queue.push(PublishJob {
            topic: topic.render(),
            payload,
            qos,
            point,
        });
        if !accepted {
            state
                .counters
                .dropped_publishes
                .fetch_add(1, Ordering::Relaxed);
        }

        fire_at = next_fire(fire_at, interval, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(model_json: serde_json::Value) -> VirtualDevice {
        let model: DeviceModel = serde_json::from_value(model_json).unwrap();
        VirtualDevice::new(
            "t1-0".to_string(),
            Arc::new(model),
            Some("g1".to_string()),
            Arc::new(EngineCounters::default()),
            MetricsSink::capture(),
            Arc::new(HandlerRegistry::with_builtins()),
            EngineDefaults::default(),
        )
    }

    fn mqtt_model() -> serde_json::Value {
        serde_json::json!({
            "id": "t1",
            "name": "Temp",
            "type": "sensor",
            "protocol": "mqtt",
            "connection": {"broker": "mq", "port": 1883, "qos": 1, "topicPattern": "s/${deviceId}/t"},
            "telemetry": [{
                "name": "temperature",
                "type": "number",
                "unit": "celsius",
                "intervalMs": 1000,
                "generator": {"type": "random", "min": 20.0, "max": 30.0}
            }]
        })
    }

    #[test]
    fn test_adapter_config_defaults() {
        let dev = device(mqtt_model());
        let config = adapter_config(dev.state(), &EngineDefaults::default());

        assert_eq!(config.client_id, "t1-t1-0");
        assert_eq!(config.host, "mq");
        assert_eq!(config.port, 1883);
        assert_eq!(config.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn test_adapter_config_falls_back_to_engine_broker() {
        let mut model = mqtt_model();
        model["connection"] = serde_json::json!({});
        let dev = device(model);

        let defaults = EngineDefaults {
            mqtt_host: "engine-broker".to_string(),
            mqtt_port: 8883,
            ..Default::default()
        };
        let config = adapter_config(dev.state(), &defaults);
        assert_eq!(config.host, "engine-broker");
        assert_eq!(config.port, 8883);
    }

    #[test]
    fn test_attribute_topic_resolution() {
        let dev = device(mqtt_model());
        let topic = attribute_topic(dev.state(), &dev.state().model.telemetry[0]);
        assert_eq!(topic.render(), "s/t1-0/t");
    }

    #[test]
    fn test_attribute_topic_default() {
        let mut model = mqtt_model();
        model["connection"] = serde_json::json!({"broker": "mq"});
        let dev = device(model);
        let topic = attribute_topic(dev.state(), &dev.state().model.telemetry[0]);
        assert_eq!(topic.render(), "devices/t1-0/telemetry");
    }

    #[tokio::test]
    async fn test_start_fails_to_error_state_when_unreachable() {
        let mut model = mqtt_model();
        model["connection"]["broker"] = serde_json::json!("127.0.0.1");
        model["connection"]["port"] = serde_json::json!(1);
        let dev = device(model);

        // Short timeout keeps the test fast
        let dev = VirtualDevice {
            defaults: EngineDefaults {
                connect_timeout: Duration::from_millis(200),
                ..Default::default()
            },
            ..dev
        };

        dev.start().await.unwrap();
        assert_eq!(dev.state().status(), DeviceStatus::Starting);

        // Wait for the supervisor to give up
        for _ in 0..50 {
            if dev.state().status() == DeviceStatus::Error {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(dev.state().status(), DeviceStatus::Error);
        assert!(dev.state().error_message().is_some());

        // An errored device can be started again
        dev.start().await.unwrap();
        dev.stop().await.unwrap();
        assert_eq!(dev.state().status(), DeviceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_from_created() {
        let dev = device(mqtt_model());
        dev.stop().await.unwrap();
        assert_eq!(dev.state().status(), DeviceStatus::Created);
    }
}
