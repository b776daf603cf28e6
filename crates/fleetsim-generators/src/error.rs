//! Error types for fleetsim-generators

use thiserror::Error;

/// Generator construction errors
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("unknown custom handler: {0}")]
    UnknownHandler(String),

    #[error("replay data file {path}: {source}")]
    ReplayFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("replay data file {0} contains no rows")]
    ReplayEmpty(String),

    #[error("replay data file {path}: column '{column}' not found")]
    ReplayColumn { path: String, column: String },

    #[error("constant generator has no value")]
    MissingValue,

    #[error("replay generator has no data file")]
    MissingDataFile,
}

/// Result type alias for generator operations
pub type Result<T> = std::result::Result<T, GeneratorError>;
