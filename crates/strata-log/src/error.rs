use std::io;

use strata_store::StoreError;
use strata_types::PartitionKey;

/// Errors produced by log implementations and collaborators.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// I/O error during segment file operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A payload could not be sealed for its readers.
    #[error("sealing failed: {0}")]
    Sealing(String),

    /// A sync marker was appended but never read back.
    #[error("sync marker {token:#018x} not observed on partition {partition}")]
    SyncNotObserved { partition: PartitionKey, token: u64 },
}

/// Convenience alias used throughout the log crate.
pub type LogResult<T> = Result<T, LogError>;

impl From<LogError> for StoreError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Io(e) => StoreError::Io(e),
            LogError::Serialization(msg) => StoreError::Serialization(msg),
            other => StoreError::Log(other.to_string()),
        }
    }
}
