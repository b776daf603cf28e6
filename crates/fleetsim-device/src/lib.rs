//! Device actors for the FleetSim device engine.
//!
//! A virtual device is a supervisor task owning one protocol adapter and one
//! periodic task per telemetry attribute; lifecycle requests are serialized
//! through the device and long-running work never holds catalog locks. A
//! proxy device is a passthrough from an ingress adapter to the metrics
//! sink.

pub mod error;
pub mod proxy_device;
pub mod schedule;
pub mod state;
pub mod virtual_device;

pub use error::{DeviceError, Result};
pub use proxy_device::{BindingConfig, BindingStatus, ProxyDevice};
pub use state::{
    DeviceCounters, DeviceMetricsSnapshot, DeviceSnapshot, DeviceState, EngineCounters,
    EngineDefaults,
};
pub use virtual_device::VirtualDevice;

use std::sync::Arc;

/// A catalog entry: either a simulated device or a proxy passthrough.
#[derive(Clone)]
pub enum Device {
    Virtual(Arc<VirtualDevice>),
    Proxy(Arc<ProxyDevice>),
}

impl Device {
    pub fn state(&self) -> &Arc<DeviceState> {
        match self {
            Device::Virtual(d) => d.state(),
            Device::Proxy(d) => d.state(),
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Device::Proxy(_))
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        match self {
            Device::Virtual(d) => d.snapshot(),
            Device::Proxy(d) => d.snapshot(),
        }
    }

    pub fn metrics(&self) -> DeviceMetricsSnapshot {
        self.state().metrics()
    }

    /// Stops the device: virtual devices tear down their scheduler and
    /// adapter, proxy devices are unbound.
    pub async fn stop(&self) -> Result<()> {
        match self {
            Device::Virtual(d) => d.stop().await,
            Device::Proxy(d) => d.unbind().await,
        }
    }
}
