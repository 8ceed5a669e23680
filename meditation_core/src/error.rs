//! Error types for the meditation_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for meditation_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The key-value store refused a write
    #[error("Write denied for key '{key}'")]
    WriteDenied { key: String },

    /// The purchase store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the error came from the persistence layer.
    ///
    /// The in-memory state of the caller already holds the attempted
    /// mutation when this is returned.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Json(_) | Error::WriteDenied { .. })
    }
}
