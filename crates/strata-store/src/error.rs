use strata_merge::MergeError;
use strata_types::{EntityId, TypeError};

/// Errors from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The session may not perform this operation on the entity.
    #[error("permission denied: cannot {action} {id}")]
    PermissionDenied { id: EntityId, action: &'static str },

    /// Stored revisions of an entity could not be merged into one value.
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),

    /// A value could not be converted to or from a domain type.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing log rejected or failed an operation.
    #[error("log error: {0}")]
    Log(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;
