use beacon_core::Failure;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The registry file or its directory could not be created.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A registry row could not be decoded.
    #[error("Corrupt registry entry for query {query_id}: {reason}")]
    CorruptEntry { query_id: String, reason: String },

    /// No timer runtime is available to drive scheduled jobs.
    #[error("Scheduled queries cannot be started without a running timer runtime: {0}")]
    NoRuntime(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl From<SchedulerError> for Failure {
    fn from(e: SchedulerError) -> Self {
        Failure::new(e.to_string())
    }
}
