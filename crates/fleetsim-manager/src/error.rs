//! Error types for fleetsim-manager

use thiserror::Error;

/// Manager errors, mapped onto the control plane's status codes.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Busy(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<fleetsim_core::CoreError> for ManagerError {
    fn from(e: fleetsim_core::CoreError) -> Self {
        ManagerError::Validation(e.to_string())
    }
}

impl From<fleetsim_device::DeviceError> for ManagerError {
    fn from(e: fleetsim_device::DeviceError) -> Self {
        use fleetsim_device::DeviceError;
        match e {
            DeviceError::Conflict(msg) => ManagerError::Conflict(msg),
            DeviceError::Validation(msg) => ManagerError::Validation(msg),
            DeviceError::NotProxy => ManagerError::Validation(e.to_string()),
            DeviceError::AlreadyBound => ManagerError::Conflict(e.to_string()),
            DeviceError::Bind(msg) => ManagerError::Unavailable(msg),
            DeviceError::Generator(err) => ManagerError::Validation(err.to_string()),
        }
    }
}

/// Result type alias for manager operations
pub type Result<T> = std::result::Result<T, ManagerError>;
