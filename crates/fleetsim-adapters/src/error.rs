//! Error types for fleetsim-adapters

use thiserror::Error;

/// Adapter errors. Connection failures after startup are self-healed and
/// reported as events, not errors.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("mqtt client error: {0}")]
    Mqtt(String),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("udp socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("coap codec error: {0}")]
    CoapCodec(String),
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;
