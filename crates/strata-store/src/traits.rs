use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_types::{EntityId, Value};

use crate::error::StoreResult;

/// One historical version of an entity.
///
/// `marker` orders revisions of the same entity; for log-backed stores it is
/// the log offset the revision was read from. A deletion is recorded as a
/// revision whose value is [`Value::Absent`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub value: Value,
    pub marker: u64,
}

/// Finite, single-pass sequence of revisions, oldest first.
pub type History = Box<dyn Iterator<Item = Revision> + Send>;

/// Keyed entity storage.
///
/// Implemented by every tier of a cache chain and by the backing store
/// itself. Implementations must satisfy these invariants:
/// - `get` never returns `Some(Value::Absent)`; a missing entity is `None`.
/// - `put` of [`Value::Absent`] writes nothing and returns `Ok(false)`.
///   Deletion is always an explicit `remove`.
/// - All I/O errors are propagated, never silently ignored.
pub trait Repository: Send + Sync {
    /// Read the current value of an entity.
    ///
    /// Returns `Ok(None)` if the entity does not exist or is not readable
    /// by this session.
    fn get(&self, id: &EntityId) -> StoreResult<Option<Value>>;

    /// Store a value. Returns `true` if the tier accepted it.
    fn put(&self, id: &EntityId, value: Value) -> StoreResult<bool>;

    /// Delete an entity. Returns `true` if it existed.
    fn remove(&self, id: &EntityId) -> StoreResult<bool>;

    /// Check whether an entity exists.
    fn exists(&self, id: &EntityId) -> StoreResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Every recorded revision of an entity, oldest first.
    fn history(&self, id: &EntityId) -> StoreResult<History>;

    /// Read the freshest value available, bypassing any caching.
    ///
    /// Tiers that cache must override this; the default delegates to `get`.
    fn reload(&self, id: &EntityId) -> StoreResult<Option<Value>> {
        self.get(id)
    }
}

impl<R: Repository + ?Sized> Repository for Arc<R> {
    fn get(&self, id: &EntityId) -> StoreResult<Option<Value>> {
        (**self).get(id)
    }

    fn put(&self, id: &EntityId, value: Value) -> StoreResult<bool> {
        (**self).put(id, value)
    }

    fn remove(&self, id: &EntityId) -> StoreResult<bool> {
        (**self).remove(id)
    }

    fn exists(&self, id: &EntityId) -> StoreResult<bool> {
        (**self).exists(id)
    }

    fn history(&self, id: &EntityId) -> StoreResult<History> {
        (**self).history(id)
    }

    fn reload(&self, id: &EntityId) -> StoreResult<Option<Value>> {
        (**self).reload(id)
    }
}
