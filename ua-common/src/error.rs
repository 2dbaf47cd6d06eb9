//! Common error types for the attendance services

use thiserror::Error;

/// Common result type for storage and configuration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the attendance crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Write refused because it collides with existing state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored state breaks a uniqueness rule the engine relies on
    ///
    /// Only reachable through a concurrency-control bug.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when SQLite reported lock contention that a retry can clear
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }

    /// True when the error is a UNIQUE constraint rejection
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}
