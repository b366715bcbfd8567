use crate::error::TypeError;
use crate::id::EntityId;
use crate::value::{Shape, Value};

/// A domain type that can cross into and out of the [`Value`] model.
///
/// Implementations are the only place where a concrete Rust type is taken
/// apart into fields. Everything downstream (merging, caching,
/// transactions) works on the returned `Value` tree.
pub trait Entity: Sized {
    /// The identity under which the entity is stored.
    fn id(&self) -> EntityId;

    /// Destructure into a value tree. Usually a [`Value::Record`].
    fn to_value(&self) -> Value;

    /// Rebuild from a value tree previously produced by [`to_value`](Self::to_value)
    /// (or by merging such trees).
    fn from_value(id: EntityId, value: &Value) -> Result<Self, TypeError>;
}

/// Build a [`TypeError::UnexpectedShape`] describing `found` at `path`.
pub fn unexpected(path: impl Into<String>, expected: Shape, found: &Value) -> TypeError {
    let found = match found.shape() {
        Some(shape) => shape.to_string(),
        None => "absent".to_string(),
    };
    TypeError::UnexpectedShape {
        path: path.into(),
        expected,
        found,
    }
}
