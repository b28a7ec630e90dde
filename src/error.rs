//! Error handling and custom error types
//!
//! Provides unified error handling across the crate using thiserror.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport or store failure during put/delete/set-properties.
    #[error("Storage operation error: {0}")]
    Storage(String),

    /// Missing or invalid settings, raised before any publish activity.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Item or version could not be resolved for a publish event.
    #[error("Classification error: {0}")]
    Classification(String),
}

pub type Result<T> = std::result::Result<T, Error>;
