//! Error types for fleetsim-sink

use thiserror::Error;

/// Sink errors. These never surface to devices; failed batches are retried
/// by the flusher and dropped when the buffer overflows.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned error: {status} - {body}")]
    Server { status: u16, body: String },
}

/// Result type alias for sink operations
pub type Result<T> = std::result::Result<T, SinkError>;
