//! Invocation history: one record per tool invocation, with aggregate
//! statistics and recurring call-sequence analysis.
//!
//! The store is synchronous. The client records entries on a blocking
//! background task, so a slow or failing store never delays or fails an
//! invocation.

pub mod database;
pub mod errors;
pub mod summary;
pub mod types;

pub use database::{default_db_path, SqliteInvocationLogger};
pub use errors::LogStoreError;
pub use types::{InvocationLog, InvocationPattern, InvocationStats, ServerStats, ToolStats};

/// Sink and query interface for invocation history.
pub trait InvocationLogger: Send + Sync {
    /// Append one entry.
    fn log(&self, entry: &InvocationLog) -> Result<(), LogStoreError>;

    /// Most recent entries, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<InvocationLog>, LogStoreError>;

    fn stats(&self) -> Result<InvocationStats, LogStoreError>;

    /// Sequences of 2 or 3 consecutive calls seen more than once.
    fn patterns(&self) -> Result<Vec<InvocationPattern>, LogStoreError>;
}
