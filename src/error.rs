//! Error types for retry-spool
//!
//! The public engine surface is best-effort and reports failures through logs,
//! but the store and configuration layers return these errors so callers that
//! want a signal (`try_schedule`, direct [`FailStore`](crate::FailStore) use)
//! can get one.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for retry-spool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for retry-spool
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "batch_size")
        key: Option<String>,
    },

    /// Fail store operation failed
    #[error("fail store error: {0}")]
    FailStore(#[from] FailStoreError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No async runtime available to drive the retry timer
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Fail store errors
#[derive(Debug, Error)]
pub enum FailStoreError {
    /// Failed to connect to the backing database
    #[error("failed to connect to fail store: {0}")]
    ConnectionFailed(String),

    /// Failed to run schema migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// The store lock is held by another holder and was not released in time
    #[error("timed out after {waited:?} waiting for lock on {path}")]
    LockTimeout {
        /// Lock file that could not be acquired
        path: PathBuf,
        /// How long the caller waited
        waited: Duration,
    },

    /// The OS refused a lock or unlock request
    #[error("file lock error: {0}")]
    Lock(String),

    /// Another live store in this process already owns the directory
    #[error("fail store path already in use: {0}")]
    PathInUse(PathBuf),
}

impl Error {
    /// Shorthand for a [`Error::Config`] tied to a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
