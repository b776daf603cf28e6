//! The device manager.

use crate::error::{ManagerError, Result};
use crate::launch::{
    dropout_offsets, launch_offsets, select_targets, DropoutConfig, LaunchConfig,
};
use crate::model_store::ModelStore;
use fleetsim_adapters::{WebhookDelivery, WebhookRegistry};
use fleetsim_core::{DeviceModel, DeviceStatus};
use fleetsim_device::{
    BindingConfig, BindingStatus, Device, DeviceMetricsSnapshot, DeviceSnapshot, EngineCounters,
    EngineDefaults, ProxyDevice, VirtualDevice,
};
use fleetsim_generators::HandlerRegistry;
use fleetsim_sink::{points, MetricsSink};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub model_dir: PathBuf,
    pub max_devices: usize,
    pub max_group_size: usize,
    pub stats_interval: Duration,
    pub defaults: EngineDefaults,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./device-models"),
            max_devices: 1_000_000,
            max_group_size: 1_000_000,
            stats_interval: Duration::from_secs(5),
            defaults: EngineDefaults::default(),
        }
    }
}

/// Request to create a single device.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceRequest {
    pub model_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
}

/// Request to create a group of devices.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub model_id: String,
    pub count: usize,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub id_pattern: Option<String>,
}

/// Device listing filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceFilter {
    pub model_id: Option<String>,
    pub group_id: Option<String>,
    pub status: Option<DeviceStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Result of a group creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCreated {
    pub group_id: String,
    pub device_count: usize,
}

/// Accepted group launch: starts happen asynchronously.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchAccepted {
    pub accepted_count: usize,
    pub estimated_duration_ms: u64,
}

/// Result of a group stop.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStopped {
    pub group_id: String,
    pub stopped_count: usize,
}

/// Accepted dropout: disconnects happen asynchronously.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropoutAccepted {
    pub affected_count: usize,
    pub estimated_duration_ms: u64,
}

/// Serializable group view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    pub id: String,
    pub model_id: String,
    pub expected_count: usize,
    pub id_pattern: String,
    pub member_count: usize,
}

/// Engine statistics, computed from running counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub total_devices: usize,
    pub running_devices: u64,
    pub running_simulated: u64,
    pub running_physical: u64,
    pub total_proxy_devices: u64,
    pub total_groups: usize,
    pub total_models: usize,
    pub total_messages_sent: u64,
    pub total_bytes_sent: u64,
    pub uptime_seconds: u64,
}

struct GroupEntry {
    model_id: String,
    id_pattern: String,
    expected_count: usize,
    members: BTreeSet<String>,
    launcher: Option<CancellationToken>,
    dropout: Option<CancellationToken>,
}

#[derive(Default)]
struct Catalog {
    models: HashMap<String, Arc<DeviceModel>>,
    devices: BTreeMap<String, Device>,
    groups: HashMap<String, GroupEntry>,
}

struct ManagerInner {
    catalog: RwLock<Catalog>,
    store: ModelStore,
    engine: Arc<EngineCounters>,
    sink: MetricsSink,
    webhooks: Arc<WebhookRegistry>,
    registry: Arc<HandlerRegistry>,
    config: ManagerConfig,
    started_at: Instant,
    total_proxy_devices: AtomicU64,
    shutdown: CancellationToken,
    stats_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Process-scope registry of models, devices and groups, and the sole
/// author of lifecycle transitions.
#[derive(Clone)]
pub struct DeviceManager {
    inner: Arc<ManagerInner>,
}

impl DeviceManager {
    /// Opens the model store, loads persisted models and starts the stats
    /// emitter.
    pub fn new(config: ManagerConfig, sink: MetricsSink) -> Result<Self> {
        let store = ModelStore::open(&config.model_dir)?;
        let mut catalog = Catalog::default();
        for model in store.load_all() {
            catalog.models.insert(model.id.clone(), Arc::new(model));
        }
        info!("device manager initialized with {} models", catalog.models.len());

        let manager = Self {
            inner: Arc::new(ManagerInner {
                catalog: RwLock::new(catalog),
                store,
                engine: Arc::new(EngineCounters::default()),
                sink,
                webhooks: Arc::new(WebhookRegistry::new()),
                registry: Arc::new(HandlerRegistry::with_builtins()),
                config,
                started_at: Instant::now(),
                total_proxy_devices: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                stats_task: parking_lot::Mutex::new(None),
            }),
        };

        let stats_manager = manager.clone();
        let handle = tokio::spawn(async move { stats_manager.run_stats_emitter().await });
        *manager.inner.stats_task.lock() = Some(handle);
        Ok(manager)
    }

    /// Registers a custom generator handler before any devices start.
    pub fn handler_registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    // ----- models -----------------------------------------------------

    /// Registers a model. Re-registering the identical document is a no-op;
    /// a different document under an existing id is refused.
    pub fn register_model(&self, model: DeviceModel) -> Result<Arc<DeviceModel>> {
        model.validate()?;

        {
            let catalog = self.inner.catalog.read();
            if let Some(existing) = catalog.models.get(&model.id) {
                return if **existing == model {
                    Ok(Arc::clone(existing))
                } else {
                    Err(ManagerError::AlreadyExists(format!(
                        "model already exists: {}",
                        model.id
                    )))
                };
            }
        }

        self.inner.store.persist(&model)?;

        let model = Arc::new(model);
        let mut catalog = self.inner.catalog.write();
        match catalog.models.get(&model.id) {
            // Lost a registration race: accept only the identical document
            Some(existing) if **existing == *model => Ok(Arc::clone(existing)),
            Some(_) => Err(ManagerError::AlreadyExists(format!(
                "model already exists: {}",
                model.id
            ))),
            None => {
                catalog.models.insert(model.id.clone(), Arc::clone(&model));
                info!("registered device model: {}", model.id);
                Ok(model)
            }
        }
    }

    pub fn list_models(&self) -> Vec<Arc<DeviceModel>> {
        let catalog = self.inner.catalog.read();
        let mut models: Vec<_> = catalog.models.values().cloned().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    pub fn get_model(&self, id: &str) -> Result<Arc<DeviceModel>> {
        self.inner
            .catalog
            .read()
            .models
            .get(id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(format!("model not found: {}", id)))
    }

    /// Deletes a model; refused while any device references it.
    pub fn delete_model(&self, id: &str) -> Result<()> {
        {
            let catalog = self.inner.catalog.read();
            if !catalog.models.contains_key(id) {
                return Err(ManagerError::NotFound(format!("model not found: {}", id)));
            }
            let referenced = catalog
                .devices
                .values()
                .any(|d| d.state().model.id == id);
            if referenced {
                return Err(ManagerError::Busy(format!(
                    "model {} has live device instances",
                    id
                )));
            }
        }

        self.inner.store.remove(id)?;
        self.inner.catalog.write().models.remove(id);
        info!("deleted device model: {}", id);
        Ok(())
    }

    // ----- devices ----------------------------------------------------

    pub fn create_device(&self, request: CreateDeviceRequest) -> Result<DeviceSnapshot> {
        let model = self.get_model(&request.model_id)?;

        let device_id = match request.device_id {
            Some(id) => id,
            None => format!(
                "{}-{}",
                model.id,
                &Uuid::new_v4().simple().to_string()[..8]
            ),
        };

        let device = if model.is_proxy() {
            Device::Proxy(Arc::new(ProxyDevice::new(
                device_id.clone(),
                Arc::clone(&model),
                request.group_id.clone(),
                Arc::clone(&self.inner.engine),
                self.inner.sink.clone(),
                Arc::clone(&self.inner.webhooks),
                self.inner.config.defaults.clone(),
            )))
        } else {
            Device::Virtual(Arc::new(VirtualDevice::new(
                device_id.clone(),
                Arc::clone(&model),
                request.group_id.clone(),
                Arc::clone(&self.inner.engine),
                self.inner.sink.clone(),
                Arc::clone(&self.inner.registry),
                self.inner.config.defaults.clone(),
            )))
        };

        {
            let mut catalog = self.inner.catalog.write();
            if catalog.devices.len() >= self.inner.config.max_devices {
                return Err(ManagerError::Busy(format!(
                    "maximum device count ({}) reached",
                    self.inner.config.max_devices
                )));
            }
            if catalog.devices.contains_key(&device_id) {
                return Err(ManagerError::AlreadyExists(format!(
                    "device already exists: {}",
                    device_id
                )));
            }

            catalog.devices.insert(device_id.clone(), device.clone());
            if let Some(group_id) = &request.group_id {
                catalog
                    .groups
                    .entry(group_id.clone())
                    .or_insert_with(|| GroupEntry {
                        model_id: model.id.clone(),
                        id_pattern: default_id_pattern(),
                        expected_count: 0,
                        members: BTreeSet::new(),
                        launcher: None,
                        dropout: None,
                    })
                    .members
                    .insert(device_id.clone());
            }
        }

        if device.is_proxy() {
            self.inner.total_proxy_devices.fetch_add(1, Ordering::Relaxed);
        }

        self.inner
            .sink
            .submit(points::device_event(&device.state().scope(), "created"));
        info!("created device: {}", device_id);
        Ok(device.snapshot())
    }

    pub fn get_device(&self, id: &str) -> Result<Device> {
        self.inner
            .catalog
            .read()
            .devices
            .get(id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(format!("device not found: {}", id)))
    }

    pub fn get_device_snapshot(&self, id: &str) -> Result<DeviceSnapshot> {
        Ok(self.get_device(id)?.snapshot())
    }

    pub fn get_device_metrics(&self, id: &str) -> Result<DeviceMetricsSnapshot> {
        Ok(self.get_device(id)?.metrics())
    }

    pub fn list_devices(&self, filter: &DeviceFilter) -> (Vec<DeviceSnapshot>, usize) {
        let catalog = self.inner.catalog.read();
        let matching: Vec<&Device> = catalog
            .devices
            .values()
            .filter(|d| {
                let state = d.state();
                filter
                    .model_id
                    .as_ref()
                    .is_none_or(|m| &state.model.id == m)
                    && filter.group_id.as_ref().is_none_or(|g| {
                        state.group_id.as_ref() == Some(g)
                    })
                    && filter.status.is_none_or(|s| state.status() == s)
            })
            .collect();

        let total = matching.len();
        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(100);
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|d| d.snapshot())
            .collect();
        (page, total)
    }

    pub async fn start_device(&self, id: &str) -> Result<DeviceSnapshot> {
        match self.get_device(id)? {
            Device::Virtual(device) => {
                device.start().await?;
                Ok(device.snapshot())
            }
            Device::Proxy(_) => Err(ManagerError::Validation(format!(
                "device {} is a proxy device; use bind instead",
                id
            ))),
        }
    }

    pub async fn stop_device(&self, id: &str) -> Result<DeviceSnapshot> {
        let device = self.get_device(id)?;
        device.stop().await?;
        Ok(device.snapshot())
    }

    pub async fn delete_device(&self, id: &str) -> Result<()> {
        let device = self.get_device(id)?;
        device.stop().await?;

        let state = device.state();
        state.set_status(DeviceStatus::Deleted);

        {
            let mut catalog = self.inner.catalog.write();
            catalog.devices.remove(id);
            if let Some(group_id) = &state.group_id {
                if let Some(group) = catalog.groups.get_mut(group_id) {
                    group.members.remove(id);
                }
            }
        }

        if device.is_proxy() {
            self.inner.total_proxy_devices.fetch_sub(1, Ordering::Relaxed);
        }

        self.inner
            .sink
            .submit(points::device_event(&state.scope(), "deleted"));
        info!("deleted device: {}", id);
        Ok(())
    }

    // ----- groups -----------------------------------------------------

    pub fn create_group(&self, request: CreateGroupRequest) -> Result<GroupCreated> {
        if request.count < 1 {
            return Err(ManagerError::Validation(
                "group count must be at least 1".to_string(),
            ));
        }
        if request.count > self.inner.config.max_group_size {
            return Err(ManagerError::Validation(format!(
                "group count exceeds maximum ({})",
                self.inner.config.max_group_size
            )));
        }
        self.get_model(&request.model_id)?;

        let group_id = request.group_id.unwrap_or_else(|| {
            format!("group-{}", &Uuid::new_v4().simple().to_string()[..8])
        });
        let id_pattern = request.id_pattern.unwrap_or_else(default_id_pattern);

        {
            let mut catalog = self.inner.catalog.write();
            if catalog.groups.contains_key(&group_id) {
                return Err(ManagerError::AlreadyExists(format!(
                    "group already exists: {}",
                    group_id
                )));
            }
            catalog.groups.insert(
                group_id.clone(),
                GroupEntry {
                    model_id: request.model_id.clone(),
                    id_pattern: id_pattern.clone(),
                    expected_count: request.count,
                    members: BTreeSet::new(),
                    launcher: None,
                    dropout: None,
                },
            );
        }

        let mut created: Vec<String> = Vec::with_capacity(request.count);
        for index in 0..request.count {
            let device_id = member_id(&id_pattern, &request.model_id, &group_id, index);
            let result = self.create_device(CreateDeviceRequest {
                model_id: request.model_id.clone(),
                device_id: Some(device_id.clone()),
                group_id: Some(group_id.clone()),
            });

            if let Err(e) = result {
                // Roll back everything created so far
                warn!("group {} creation failed at member {}: {}", group_id, index, e);
                let mut catalog = self.inner.catalog.write();
                for id in &created {
                    if let Some(device) = catalog.devices.remove(id) {
                        if device.is_proxy() {
                            self.inner.total_proxy_devices.fetch_sub(1, Ordering::Relaxed);
                        }
                    }
                }
                catalog.groups.remove(&group_id);
                return Err(e);
            }
            created.push(device_id);
        }

        info!("created group {} with {} devices", group_id, created.len());
        Ok(GroupCreated {
            group_id,
            device_count: created.len(),
        })
    }

    /// Accepts a staged launch and returns immediately; member starts are
    /// dispatched by a single cancellable launcher task.
    pub fn start_group(&self, group_id: &str, config: LaunchConfig) -> Result<LaunchAccepted> {
        let members = self.group_members(group_id)?;

        // Proxy members are not part of a launch
        let launchable: Vec<Arc<VirtualDevice>> = members
            .into_iter()
            .filter_map(|d| match d {
                Device::Virtual(v) => Some(v),
                Device::Proxy(_) => None,
            })
            .collect();

        let offsets = launch_offsets(&config, launchable.len());
        let estimated_duration_ms = offsets
            .last()
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let cancel = CancellationToken::new();
        {
            let mut catalog = self.inner.catalog.write();
            let group = catalog
                .groups
                .get_mut(group_id)
                .ok_or_else(|| ManagerError::NotFound(format!("group not found: {}", group_id)))?;
            if let Some(previous) = group.launcher.replace(cancel.clone()) {
                previous.cancel();
            }
        }

        let accepted_count = launchable.len();
        let group = group_id.to_string();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let epoch = tokio::time::Instant::now();
            for (device, offset) in launchable.into_iter().zip(offsets) {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("group {} launch cancelled", group);
                        return;
                    }
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep_until(epoch + offset) => {}
                }
                if let Err(e) = device.start().await {
                    error!("group {} member {} failed to start: {}", group, device.state().id, e);
                }
            }
            info!("group {} launch dispatched", group);
        });

        Ok(LaunchAccepted {
            accepted_count,
            estimated_duration_ms,
        })
    }

    /// Cancels any in-flight launch and stops all members in ascending
    /// device-id order.
    pub async fn stop_group(&self, group_id: &str) -> Result<GroupStopped> {
        let members = {
            let mut catalog = self.inner.catalog.write();
            let group = catalog
                .groups
                .get_mut(group_id)
                .ok_or_else(|| ManagerError::NotFound(format!("group not found: {}", group_id)))?;
            if let Some(launcher) = group.launcher.take() {
                launcher.cancel();
            }
            if let Some(dropout) = group.dropout.take() {
                dropout.cancel();
            }
            group.members.clone()
        };

        let mut stopped_count = 0;
        for id in members {
            let device = {
                let catalog = self.inner.catalog.read();
                catalog.devices.get(&id).cloned()
            };
            let Some(device) = device else { continue };
            if device.state().status().is_active() {
                if let Err(e) = device.stop().await {
                    error!("failed to stop group member {}: {}", id, e);
                } else {
                    stopped_count += 1;
                }
            }
        }

        Ok(GroupStopped {
            group_id: group_id.to_string(),
            stopped_count,
        })
    }

    /// Stops and deletes all members, then removes the group.
    pub async fn delete_group(&self, group_id: &str) -> Result<()> {
        self.stop_group(group_id).await?;

        let members = {
            let catalog = self.inner.catalog.read();
            catalog
                .groups
                .get(group_id)
                .map(|g| g.members.clone())
                .unwrap_or_default()
        };

        for id in members {
            if let Err(e) = self.delete_device(&id).await {
                error!("failed to delete group member {}: {}", id, e);
            }
        }

        self.inner.catalog.write().groups.remove(group_id);
        info!("deleted group: {}", group_id);
        Ok(())
    }

    /// Accepts a programmed-failure schedule for a group's running
    /// simulated members.
    pub fn dropout_group(&self, group_id: &str, config: DropoutConfig) -> Result<DropoutAccepted> {
        let members = self.group_members(group_id)?;

        // Candidates: running simulated members, ascending by device id
        let mut candidates: Vec<(String, Arc<VirtualDevice>)> = members
            .into_iter()
            .filter_map(|d| match d {
                Device::Virtual(v) if v.state().status() == DeviceStatus::Running => {
                    Some((v.state().id.clone(), v))
                }
                _ => None,
            })
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let candidate_ids: Vec<String> = candidates.iter().map(|(id, _)| id.clone()).collect();
        let seed = dropout_seed(group_id);
        let targets = select_targets(&candidate_ids, &config, seed);
        let offsets = dropout_offsets(&config, targets.len(), seed);
        let estimated_duration_ms = offsets
            .last()
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let by_id: HashMap<String, Arc<VirtualDevice>> = candidates.into_iter().collect();
        let selected: Vec<Arc<VirtualDevice>> = targets
            .iter()
            .filter_map(|id| by_id.get(id).cloned())
            .collect();

        let cancel = CancellationToken::new();
        {
            let mut catalog = self.inner.catalog.write();
            let group = catalog
                .groups
                .get_mut(group_id)
                .ok_or_else(|| ManagerError::NotFound(format!("group not found: {}", group_id)))?;
            if let Some(previous) = group.dropout.replace(cancel.clone()) {
                previous.cancel();
            }
        }

        let affected_count = selected.len();
        let reconnect = config.reconnect;
        let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);
        let group = group_id.to_string();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let epoch = tokio::time::Instant::now();
            for (device, offset) in selected.into_iter().zip(offsets) {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep_until(epoch + offset) => {}
                }
                device.dropout(reconnect, reconnect_delay).await;
            }
            info!("group {} dropout dispatched", group);
        });

        Ok(DropoutAccepted {
            affected_count,
            estimated_duration_ms,
        })
    }

    // ----- proxy bindings ---------------------------------------------

    pub async fn bind_device(
        &self,
        id: &str,
        config: BindingConfig,
    ) -> Result<(BindingStatus, Option<String>)> {
        match self.get_device(id)? {
            Device::Proxy(device) => {
                let webhook_url = device.bind(config).await?;
                Ok((device.binding_status(), webhook_url))
            }
            Device::Virtual(_) => Err(ManagerError::Validation(format!(
                "device {} is not a proxy device",
                id
            ))),
        }
    }

    pub async fn unbind_device(&self, id: &str) -> Result<()> {
        match self.get_device(id)? {
            Device::Proxy(device) => {
                device.unbind().await?;
                Ok(())
            }
            Device::Virtual(_) => Err(ManagerError::Validation(format!(
                "device {} is not a proxy device",
                id
            ))),
        }
    }

    pub fn get_binding(&self, id: &str) -> Result<BindingStatus> {
        match self.get_device(id)? {
            Device::Proxy(device) => Ok(device.binding_status()),
            Device::Virtual(_) => Err(ManagerError::Validation(format!(
                "device {} is not a proxy device",
                id
            ))),
        }
    }

    /// Routes an HTTP webhook body to its bound proxy device.
    pub fn ingest_webhook(&self, id: &str, payload: serde_json::Value) -> Result<()> {
        match self.inner.webhooks.deliver(id, payload) {
            WebhookDelivery::Accepted => Ok(()),
            WebhookDelivery::NotFound => Err(ManagerError::NotFound(format!(
                "no webhook binding for device: {}",
                id
            ))),
            WebhookDelivery::Rejected => Err(ManagerError::Validation(
                "webhook payload must be a JSON object".to_string(),
            )),
        }
    }

    // ----- stats & lifecycle ------------------------------------------

    pub fn stats(&self) -> EngineStats {
        let engine = &self.inner.engine;
        let (total_devices, total_groups, total_models) = {
            let catalog = self.inner.catalog.read();
            (
                catalog.devices.len(),
                catalog.groups.len(),
                catalog.models.len(),
            )
        };

        EngineStats {
            total_devices,
            running_devices: engine.running_devices(),
            running_simulated: engine.running_simulated.load(Ordering::Relaxed),
            running_physical: engine.running_physical.load(Ordering::Relaxed),
            total_proxy_devices: self.inner.total_proxy_devices.load(Ordering::Relaxed),
            total_groups,
            total_models,
            total_messages_sent: engine.total_messages.load(Ordering::Relaxed),
            total_bytes_sent: engine.total_bytes.load(Ordering::Relaxed),
            uptime_seconds: self.inner.started_at.elapsed().as_secs(),
        }
    }

    async fn run_stats_emitter(&self) {
        let interval = self.inner.config.stats_interval;
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let stats = self.stats();
            self.inner.sink.submit(points::engine_stats(
                stats.running_devices,
                stats.running_simulated,
                stats.running_physical,
                stats.total_messages_sent,
                stats.total_bytes_sent,
                stats.total_groups as u64,
            ));
        }
    }

    /// Graceful shutdown: cancels background tasks and stops every active
    /// device. The sink is flushed by its own shutdown, after this.
    pub async fn shutdown(&self) {
        info!("shutting down device manager");
        self.inner.shutdown.cancel();

        let handle = self.inner.stats_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let devices: Vec<Device> = {
            let mut catalog = self.inner.catalog.write();
            for group in catalog.groups.values_mut() {
                if let Some(launcher) = group.launcher.take() {
                    launcher.cancel();
                }
                if let Some(dropout) = group.dropout.take() {
                    dropout.cancel();
                }
            }
            catalog.devices.values().cloned().collect()
        };

        for device in devices {
            if device.state().status().is_active() {
                if let Err(e) = device.stop().await {
                    error!("error stopping device {}: {}", device.state().id, e);
                }
            }
        }
        info!("device manager shutdown complete");
    }

    pub fn get_group(&self, group_id: &str) -> Result<GroupSnapshot> {
        let catalog = self.inner.catalog.read();
        let group = catalog
            .groups
            .get(group_id)
            .ok_or_else(|| ManagerError::NotFound(format!("group not found: {}", group_id)))?;
        Ok(GroupSnapshot {
            id: group_id.to_string(),
            model_id: group.model_id.clone(),
            expected_count: group.expected_count,
            id_pattern: group.id_pattern.clone(),
            member_count: group.members.len(),
        })
    }

    fn group_members(&self, group_id: &str) -> Result<Vec<Device>> {
        let catalog = self.inner.catalog.read();
        let group = catalog
            .groups
            .get(group_id)
            .ok_or_else(|| ManagerError::NotFound(format!("group not found: {}", group_id)))?;

        // BTreeSet iteration gives ascending device-id order
        Ok(group
            .members
            .iter()
            .filter_map(|id| catalog.devices.get(id).cloned())
            .collect())
    }
}

fn default_id_pattern() -> String {
    "{modelId}-{index}".to_string()
}

/// Expands a group id pattern for one member.
fn member_id(pattern: &str, model_id: &str, group_id: &str, index: usize) -> String {
    pattern
        .replace("{index}", &index.to_string())
        .replace("{modelId}", model_id)
        .replace("{groupId}", group_id)
}

/// Dropout PRNG seed: group identity mixed with the wall clock.
fn dropout_seed(group_id: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = fxhash::FxHasher::default();
    group_id.hash(&mut hasher);
    hasher.finish() ^ fleetsim_core::now_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_id_patterns() {
        assert_eq!(member_id("{modelId}-{index}", "t1", "g", 3), "t1-3");
        assert_eq!(member_id("sensor-{index}", "t1", "g", 0), "sensor-0");
        assert_eq!(member_id("{groupId}-{index}", "t1", "g7", 2), "g7-2");
    }

    #[test]
    fn test_dropout_seed_varies_by_group() {
        // Seeds mix wall clock; equality across groups would be a fluke
        assert_ne!(dropout_seed("a"), dropout_seed("b"));
    }
}
