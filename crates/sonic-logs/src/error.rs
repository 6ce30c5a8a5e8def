//! Error types for the record model.
//!
//! Line parsing itself never fails; these errors only surface when a record is
//! serialized for the wire or rebuilt from stored columns.

use thiserror::Error;

/// Errors that can occur while handling log records.
#[derive(Debug, Error)]
pub enum LogError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored device class did not match any known value.
    #[error("unknown device class: {0}")]
    UnknownDeviceClass(String),
}

/// Result type alias for record operations.
pub type Result<T> = std::result::Result<T, LogError>;
