//! Core data types for the FleetSim device engine.
//!
//! This crate defines the device model configuration (the JSON documents
//! registered through the control plane), the lifecycle enums shared by the
//! engine crates, and `${var}` pattern interpolation for topics and client
//! ids.

pub mod error;
pub mod model;
pub mod pattern;
pub mod status;

pub use error::{CoreError, Result};
pub use model::{
    ConnectionConfig, DataType, DeviceModel, DeviceType, Distribution, GeneratorSpec,
    GeneratorType, Protocol, TelemetryAttribute,
};
pub use pattern::{PatternContext, ResolvedPattern};
pub use status::{ConnectionState, DeviceStatus, Source};

/// Nanosecond-precision Unix epoch timestamp.
pub type Timestamp = i64;

/// Returns the current wall clock as nanoseconds since the Unix epoch.
pub fn now_nanos() -> Timestamp {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
