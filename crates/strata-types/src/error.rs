use thiserror::Error;

use crate::value::Shape;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid entity id: {0}")]
    InvalidId(String),

    #[error("invalid partition key: {0}")]
    InvalidPartitionKey(String),

    #[error("expected {expected} at `{path}`, found {found}")]
    UnexpectedShape {
        path: String,
        expected: Shape,
        found: String,
    },

    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("absent value nested inside {container} at `{path}`")]
    NestedAbsent { path: String, container: Shape },

    #[error("serialization error: {0}")]
    Serialization(String),
}
