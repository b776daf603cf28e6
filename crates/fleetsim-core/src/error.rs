//! Error types for fleetsim-core

use thiserror::Error;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid id '{0}': must start with a lowercase letter and contain only lowercase letters, digits and dashes")]
    InvalidId(String),

    #[error("invalid port {0}: must be in 1..=65535")]
    InvalidPort(i64),

    #[error("invalid qos {0}: must be 0, 1 or 2")]
    InvalidQos(u8),

    #[error("{field}: {message}")]
    InvalidField { field: String, message: String },
}

impl CoreError {
    /// Shorthand for a field-scoped validation error.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
