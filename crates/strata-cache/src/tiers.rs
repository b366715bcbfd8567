//! The tiers a [`CacheChain`](crate::CacheChain) is built from.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use strata_store::{History, Repository, StoreResult};
use strata_types::{EntityId, Value};
use tracing::{debug, trace};

/// A repository that sits above the backing store in a cache chain.
///
/// Besides the normal repository operations (which the chain uses to pass
/// reads, writes and removals through), a cache tier can be filled with a
/// value read from a lower tier and told to forget an entity. Neither of
/// those counts as an access.
pub trait CacheTier: Repository {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Store a value found in a lower tier.
    fn fill(&self, id: &EntityId, value: Value) -> StoreResult<()> {
        self.put(id, value).map(|_| ())
    }

    /// Forget any cached value for an entity.
    fn invalidate(&self, id: &EntityId) -> StoreResult<()> {
        self.remove(id).map(|_| ())
    }

    /// Drop everything this tier holds.
    fn clear(&self) {}
}

// ---------------------------------------------------------------------------
// Request cache
// ---------------------------------------------------------------------------

/// Memory cache scoped to one request.
///
/// Holds only the current value of each entity; it keeps no revisions, so
/// its `history` is always empty.
#[derive(Debug, Default)]
pub struct RequestCacheTier {
    entities: RwLock<HashMap<EntityId, Value>>,
}

impl RequestCacheTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.entities.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Repository for RequestCacheTier {
    fn get(&self, id: &EntityId) -> StoreResult<Option<Value>> {
        Ok(self.entities.read().expect("lock poisoned").get(id).cloned())
    }

    fn put(&self, id: &EntityId, value: Value) -> StoreResult<bool> {
        if value.is_absent() {
            return Ok(false);
        }
        self.entities
            .write()
            .expect("lock poisoned")
            .insert(*id, value);
        Ok(true)
    }

    fn remove(&self, id: &EntityId) -> StoreResult<bool> {
        Ok(self
            .entities
            .write()
            .expect("lock poisoned")
            .remove(id)
            .is_some())
    }

    fn history(&self, _id: &EntityId) -> StoreResult<History> {
        Ok(Box::new(std::iter::empty()))
    }
}

impl CacheTier for RequestCacheTier {
    fn name(&self) -> &'static str {
        "request-cache"
    }

    fn clear(&self) {
        self.entities.write().expect("lock poisoned").clear();
    }
}

// ---------------------------------------------------------------------------
// Access log
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Read,
    Write,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub kind: AccessKind,
    pub id: EntityId,
}

/// Record of the entities a request read and wrote, in order.
///
/// Removals count as writes.
#[derive(Debug, Default)]
pub struct AccessLog {
    records: Mutex<Vec<AccessRecord>>,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: AccessKind, id: EntityId) {
        trace!(?kind, id = %id, "access");
        self.records
            .lock()
            .expect("lock poisoned")
            .push(AccessRecord { kind, id });
    }

    /// Every access so far, oldest first.
    pub fn records(&self) -> Vec<AccessRecord> {
        self.records.lock().expect("lock poisoned").clone()
    }

    /// Distinct entities read.
    pub fn reads(&self) -> BTreeSet<EntityId> {
        self.ids(AccessKind::Read)
    }

    /// Distinct entities written or removed.
    pub fn writes(&self) -> BTreeSet<EntityId> {
        self.ids(AccessKind::Write)
    }

    pub fn clear(&self) {
        self.records.lock().expect("lock poisoned").clear();
    }

    fn ids(&self, kind: AccessKind) -> BTreeSet<EntityId> {
        self.records
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.id)
            .collect()
    }
}

/// Instrumentation tier: records every read and write passing through it
/// into an [`AccessLog`] and never holds data itself, so reads always fall
/// through to the tier below.
#[derive(Debug, Clone)]
pub struct AccessLogTier {
    log: Arc<AccessLog>,
}

impl AccessLogTier {
    pub fn new(log: Arc<AccessLog>) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &Arc<AccessLog> {
        &self.log
    }
}

impl Repository for AccessLogTier {
    fn get(&self, id: &EntityId) -> StoreResult<Option<Value>> {
        self.log.record(AccessKind::Read, *id);
        Ok(None)
    }

    fn put(&self, id: &EntityId, _value: Value) -> StoreResult<bool> {
        self.log.record(AccessKind::Write, *id);
        Ok(false)
    }

    fn remove(&self, id: &EntityId) -> StoreResult<bool> {
        self.log.record(AccessKind::Write, *id);
        Ok(false)
    }

    fn exists(&self, id: &EntityId) -> StoreResult<bool> {
        self.log.record(AccessKind::Read, *id);
        Ok(false)
    }

    fn history(&self, _id: &EntityId) -> StoreResult<History> {
        Ok(Box::new(std::iter::empty()))
    }
}

impl CacheTier for AccessLogTier {
    fn name(&self) -> &'static str {
        "access-log"
    }

    fn fill(&self, _id: &EntityId, _value: Value) -> StoreResult<()> {
        Ok(())
    }

    fn invalidate(&self, _id: &EntityId) -> StoreResult<()> {
        Ok(())
    }

    fn clear(&self) {
        self.log.clear();
    }
}

// ---------------------------------------------------------------------------
// Backing tier
// ---------------------------------------------------------------------------

/// The bottom of a chain: the authoritative store every write goes to.
#[derive(Clone)]
pub struct BackingTier {
    inner: Arc<dyn Repository>,
}

impl BackingTier {
    pub fn new(inner: Arc<dyn Repository>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<dyn Repository> {
        &self.inner
    }
}

impl Repository for BackingTier {
    fn get(&self, id: &EntityId) -> StoreResult<Option<Value>> {
        self.inner.get(id)
    }

    fn put(&self, id: &EntityId, value: Value) -> StoreResult<bool> {
        let accepted = self.inner.put(id, value)?;
        debug!(id = %id, accepted, "backing write");
        Ok(accepted)
    }

    fn remove(&self, id: &EntityId) -> StoreResult<bool> {
        let removed = self.inner.remove(id)?;
        debug!(id = %id, removed, "backing remove");
        Ok(removed)
    }

    fn exists(&self, id: &EntityId) -> StoreResult<bool> {
        self.inner.exists(id)
    }

    fn history(&self, id: &EntityId) -> StoreResult<History> {
        self.inner.history(id)
    }

    fn reload(&self, id: &EntityId) -> StoreResult<Option<Value>> {
        self.inner.reload(id)
    }
}

impl std::fmt::Debug for BackingTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingTier").finish_non_exhaustive()
    }
}
