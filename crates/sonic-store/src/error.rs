//! Error types for record persistence.

use thiserror::Error;

/// Errors that can occur while persisting or reading records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected an operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Preparing the database location failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The database location could not be interpreted.
    #[error("invalid database location: {0}")]
    InvalidLocation(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
