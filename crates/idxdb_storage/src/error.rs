//! Error types for storage drivers.

use std::io;
use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors that can occur inside a storage driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The metadata catalog could not be read or written.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// The named database does not exist.
    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    /// The referenced object store does not exist.
    #[error("unknown object store id: {0}")]
    UnknownStore(i64),

    /// The referenced index does not exist.
    #[error("unknown index id: {0}")]
    UnknownIndex(i64),

    /// A savepoint name was not found or is malformed.
    #[error("invalid savepoint: {0}")]
    InvalidSavepoint(String),

    /// Stored data failed to parse.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl DriverError {
    /// Creates a catalog error.
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog(message.into())
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
