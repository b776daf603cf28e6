//! Lifecycle enums shared across the engine.

use serde::{Deserialize, Serialize};

/// Device lifecycle status.
///
/// Transitions are driven by the device manager and the per-device
/// supervisor; `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Reconnecting,
    Error,
    Deleted,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Created => "created",
            DeviceStatus::Starting => "starting",
            DeviceStatus::Running => "running",
            DeviceStatus::Stopping => "stopping",
            DeviceStatus::Stopped => "stopped",
            DeviceStatus::Reconnecting => "reconnecting",
            DeviceStatus::Error => "error",
            DeviceStatus::Deleted => "deleted",
        }
    }

    /// States in which a device has live tasks attached.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DeviceStatus::Starting | DeviceStatus::Running | DeviceStatus::Reconnecting
        )
    }
}

/// Protocol connection state, tracked independently of the lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// Origin of a device's telemetry; mandatory tag on every emitted point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Simulated,
    Physical,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Simulated => "simulated",
            Source::Physical => "physical",
        }
    }
}
