use strata_types::Shape;

/// Errors produced by the merge engine.
///
/// None of these are transient: they indicate that the three inputs do not
/// describe versions of the same schema, which is a bug upstream of the merge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("shape mismatch at `{path}`: expected {expected}, found {found}")]
    ShapeMismatch {
        path: String,
        expected: Shape,
        found: Shape,
    },

    #[error("counter overflow at `{path}`")]
    CounterOverflow { path: String },
}

/// Result alias for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;
