//! Invocation history store error types.

use thiserror::Error;

/// Errors raised by the invocation history store.
#[derive(Debug, Error)]
pub enum LogStoreError {
    /// SQLite operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// The database directory could not be created.
    #[error("log store I/O error: {reason}")]
    IoError { reason: String },

    /// No home directory to place the default database in.
    #[error("cannot determine home directory for the invocation log")]
    NoHomeDir,

    /// A thread panicked while holding the connection.
    #[error("invocation log connection lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for LogStoreError {
    fn from(e: rusqlite::Error) -> Self {
        LogStoreError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for LogStoreError {
    fn from(e: std::io::Error) -> Self {
        LogStoreError::IoError {
            reason: e.to_string(),
        }
    }
}
