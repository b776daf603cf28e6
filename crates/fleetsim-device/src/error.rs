//! Error types for fleetsim-device

use thiserror::Error;

/// Device lifecycle errors surfaced to the control plane.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("device is not a proxy device")]
    NotProxy,

    #[error("device already has an active binding")]
    AlreadyBound,

    #[error("failed to bind: {0}")]
    Bind(String),

    #[error("failed to initialize generators: {0}")]
    Generator(#[from] fleetsim_generators::GeneratorError),
}

/// Result type alias for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;
