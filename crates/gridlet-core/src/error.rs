//! Error types for gridlet

use thiserror::Error;

/// Main error type for gridlet
#[derive(Error, Debug)]
pub enum GridletError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Worker not found
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    /// Resource exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Task failure
    #[error("Task error: {0}")]
    Task(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for gridlet operations
pub type GridletResult<T> = Result<T, GridletError>;

impl From<serde_json::Error> for GridletError {
    fn from(err: serde_json::Error) -> Self {
        GridletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GridletError {
    fn from(err: toml::de::Error) -> Self {
        GridletError::Config(err.to_string())
    }
}
