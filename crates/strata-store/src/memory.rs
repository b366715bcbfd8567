use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use strata_types::{EntityId, Value};
use tracing::trace;

use crate::error::StoreResult;
use crate::traits::{History, Repository, Revision};

#[derive(Default)]
struct EntityRecord {
    current: Option<Value>,
    revisions: Vec<Revision>,
}

/// In-memory, HashMap-based repository.
///
/// Intended for tests and embedding. Every write
/// and deletion is kept as a revision so `history` behaves like a
/// log-backed store. Values are cloned on read and write.
pub struct InMemoryRepository {
    entities: RwLock<HashMap<EntityId, EntityRecord>>,
    next_marker: AtomicU64,
}

impl InMemoryRepository {
    /// Create a new empty repository.
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            next_marker: AtomicU64::new(0),
        }
    }

    /// Number of entities that currently exist.
    pub fn len(&self) -> usize {
        self.entities
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|record| record.current.is_some())
            .count()
    }

    /// Returns `true` if no entity currently exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every entity, including its history.
    pub fn clear(&self) {
        self.entities.write().expect("lock poisoned").clear();
    }

    /// Sorted IDs of every entity that currently exists.
    pub fn ids(&self) -> Vec<EntityId> {
        let map = self.entities.read().expect("lock poisoned");
        let mut ids: Vec<EntityId> = map
            .iter()
            .filter(|(_, record)| record.current.is_some())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    fn next_marker(&self) -> u64 {
        self.next_marker.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository for InMemoryRepository {
    fn get(&self, id: &EntityId) -> StoreResult<Option<Value>> {
        let map = self.entities.read().expect("lock poisoned");
        Ok(map.get(id).and_then(|record| record.current.clone()))
    }

    fn put(&self, id: &EntityId, value: Value) -> StoreResult<bool> {
        if value.is_absent() {
            return Ok(false);
        }
        let mut map = self.entities.write().expect("lock poisoned");
        let marker = self.next_marker();
        trace!(%id, marker, "put");
        let record = map.entry(*id).or_default();
        record.current = Some(value.clone());
        record.revisions.push(Revision { value, marker });
        Ok(true)
    }

    fn remove(&self, id: &EntityId) -> StoreResult<bool> {
        let mut map = self.entities.write().expect("lock poisoned");
        let Some(record) = map.get_mut(id).filter(|r| r.current.is_some()) else {
            return Ok(false);
        };
        let marker = self.next_marker();
        trace!(%id, marker, "remove");
        record.current = None;
        record.revisions.push(Revision {
            value: Value::Absent,
            marker,
        });
        Ok(true)
    }

    fn exists(&self, id: &EntityId) -> StoreResult<bool> {
        let map = self.entities.read().expect("lock poisoned");
        Ok(map.get(id).is_some_and(|record| record.current.is_some()))
    }

    fn history(&self, id: &EntityId) -> StoreResult<History> {
        let map = self.entities.read().expect("lock poisoned");
        let revisions = map
            .get(id)
            .map(|record| record.revisions.clone())
            .unwrap_or_default();
        Ok(Box::new(revisions.into_iter()))
    }
}

impl std::fmt::Debug for InMemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("entity_count", &self.len())
            .finish()
    }
}
