//! Error types for quill-core

use thiserror::Error;

/// Result type alias using quill-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quill-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A snapshot payload could not be parsed; the store was left untouched
    #[error("Corrupt snapshot payload: {0}")]
    CorruptPayload(String),

    /// The store rejected a wholesale replace; the previous contents are intact
    #[error("Store write failed: {0}")]
    StoreWrite(String),

    /// Remote backup provider was unreachable or returned an invalid response
    #[error("Backup fetch failed: {0}")]
    Fetch(String),

    /// The local store itself could not be opened or initialized
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
