use std::sync::Arc;

use strata_store::{History, Repository, StoreResult};
use strata_types::{EntityId, Value};
use tracing::trace;

use crate::config::CacheConfig;
use crate::tiers::{AccessLog, AccessLogTier, BackingTier, CacheTier, RequestCacheTier};

/// Ordered stack of repository tiers, read-through and write-through.
///
/// - Reads try each cache tier top-down; a hit back-fills the tiers above
///   it. A miss everywhere reads the backing tier and fills every cache.
/// - Writes and removals go to the backing tier first; caches are updated
///   only once it has accepted.
/// - `reload` skips the caches, reads the backing tier and refreshes them.
/// - `history` always comes from the backing tier.
pub struct CacheChain {
    caches: Vec<Arc<dyn CacheTier>>,
    backing: BackingTier,
    access_log: Option<Arc<AccessLog>>,
}

impl CacheChain {
    pub fn builder() -> CacheChainBuilder {
        CacheChainBuilder::default()
    }

    /// Build the chain a configuration describes over `backing`.
    pub fn from_config(config: &CacheConfig, backing: Arc<dyn Repository>) -> Self {
        let mut builder = Self::builder();
        if config.request_cache {
            builder = builder.request_cache();
        }
        if config.access_log {
            builder = builder.access_log(Arc::new(AccessLog::new()));
        }
        builder.build(backing)
    }

    /// The access log recorded by this chain, if it has one.
    pub fn access_log(&self) -> Option<&Arc<AccessLog>> {
        self.access_log.as_ref()
    }

    pub fn backing(&self) -> &BackingTier {
        &self.backing
    }

    /// Names of the cache tiers, top first.
    pub fn tier_names(&self) -> Vec<&'static str> {
        self.caches.iter().map(|tier| tier.name()).collect()
    }

    /// Empty every cache tier, e.g. at the end of a request.
    pub fn clear_caches(&self) {
        for tier in &self.caches {
            tier.clear();
        }
    }

    fn fill_above(&self, level: usize, id: &EntityId, value: &Value) -> StoreResult<()> {
        for tier in &self.caches[..level] {
            tier.fill(id, value.clone())?;
        }
        Ok(())
    }
}

impl Repository for CacheChain {
    fn get(&self, id: &EntityId) -> StoreResult<Option<Value>> {
        for (level, tier) in self.caches.iter().enumerate() {
            if let Some(value) = tier.get(id)? {
                trace!(id = %id, tier = tier.name(), "cache hit");
                self.fill_above(level, id, &value)?;
                return Ok(Some(value));
            }
        }
        trace!(id = %id, "cache miss");
        let value = self.backing.get(id)?;
        if let Some(value) = &value {
            self.fill_above(self.caches.len(), id, value)?;
        }
        Ok(value)
    }

    fn put(&self, id: &EntityId, value: Value) -> StoreResult<bool> {
        if value.is_absent() {
            return Ok(false);
        }
        if !self.backing.put(id, value.clone())? {
            return Ok(false);
        }
        for tier in &self.caches {
            tier.put(id, value.clone())?;
        }
        Ok(true)
    }

    fn remove(&self, id: &EntityId) -> StoreResult<bool> {
        let removed = self.backing.remove(id)?;
        for tier in &self.caches {
            tier.remove(id)?;
        }
        Ok(removed)
    }

    fn history(&self, id: &EntityId) -> StoreResult<History> {
        self.backing.history(id)
    }

    fn reload(&self, id: &EntityId) -> StoreResult<Option<Value>> {
        let value = self.backing.reload(id)?;
        for tier in &self.caches {
            match &value {
                Some(value) => tier.fill(id, value.clone())?,
                None => tier.invalidate(id)?,
            }
        }
        Ok(value)
    }
}

impl std::fmt::Debug for CacheChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheChain")
            .field("tiers", &self.tier_names())
            .finish_non_exhaustive()
    }
}

/// Builder for [`CacheChain`]. Tiers are stacked in the order added, the
/// first one on top.
#[derive(Default)]
pub struct CacheChainBuilder {
    caches: Vec<Arc<dyn CacheTier>>,
    access_log: Option<Arc<AccessLog>>,
}

impl CacheChainBuilder {
    pub fn request_cache(self) -> Self {
        self.tier(Arc::new(RequestCacheTier::new()))
    }

    /// Add an access-log tier recording into `log`.
    pub fn access_log(mut self, log: Arc<AccessLog>) -> Self {
        self.access_log = Some(log.clone());
        self.tier(Arc::new(AccessLogTier::new(log)))
    }

    pub fn tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.caches.push(tier);
        self
    }

    pub fn build(self, backing: Arc<dyn Repository>) -> CacheChain {
        CacheChain {
            caches: self.caches,
            backing: BackingTier::new(backing),
            access_log: self.access_log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use strata_store::{InMemoryRepository, StoreError};

    /// Backing store that counts reads and can refuse writes.
    #[derive(Default)]
    struct CountingRepository {
        inner: InMemoryRepository,
        reads: AtomicUsize,
        read_only: bool,
    }

    impl Repository for CountingRepository {
        fn get(&self, id: &EntityId) -> StoreResult<Option<Value>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(id)
        }

        fn put(&self, id: &EntityId, value: Value) -> StoreResult<bool> {
            if self.read_only {
                return Ok(false);
            }
            self.inner.put(id, value)
        }

        fn remove(&self, id: &EntityId) -> StoreResult<bool> {
            self.inner.remove(id)
        }

        fn history(&self, id: &EntityId) -> StoreResult<History> {
            self.inner.history(id)
        }
    }

    /// Backing store whose every operation fails.
    struct FailingRepository;

    impl Repository for FailingRepository {
        fn get(&self, _id: &EntityId) -> StoreResult<Option<Value>> {
            Err(StoreError::Log("unavailable".into()))
        }

        fn put(&self, _id: &EntityId, _value: Value) -> StoreResult<bool> {
            Err(StoreError::Log("unavailable".into()))
        }

        fn remove(&self, _id: &EntityId) -> StoreResult<bool> {
            Err(StoreError::Log("unavailable".into()))
        }

        fn history(&self, _id: &EntityId) -> StoreResult<History> {
            Err(StoreError::Log("unavailable".into()))
        }
    }

    fn id() -> EntityId {
        EntityId::from_u128(7)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[test]
    fn read_through_fills_request_cache() {
        let backing = Arc::new(CountingRepository::default());
        backing.inner.put(&id(), Value::counter(1)).unwrap();
        let chain = CacheChain::builder().request_cache().build(backing.clone());

        assert_eq!(chain.get(&id()).unwrap(), Some(Value::counter(1)));
        assert_eq!(chain.get(&id()).unwrap(), Some(Value::counter(1)));
        assert_eq!(backing.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hit_in_lower_cache_back_fills_upper() {
        let top = Arc::new(RequestCacheTier::new());
        let lower = Arc::new(RequestCacheTier::new());
        lower.fill(&id(), Value::counter(3)).unwrap();
        let backing = Arc::new(CountingRepository::default());
        let chain = CacheChain::builder()
            .tier(top.clone())
            .tier(lower)
            .build(backing.clone());

        assert_eq!(chain.get(&id()).unwrap(), Some(Value::counter(3)));
        assert_eq!(top.get(&id()).unwrap(), Some(Value::counter(3)));
        assert_eq!(backing.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_everywhere_is_none() {
        let chain = CacheChain::from_config(&CacheConfig::default(), Arc::new(InMemoryRepository::new()));
        assert!(chain.get(&id()).unwrap().is_none());
        assert!(!chain.exists(&id()).unwrap());
    }

    #[test]
    fn reload_bypasses_stale_cache() {
        let backing = Arc::new(InMemoryRepository::new());
        let chain = CacheChain::builder().request_cache().build(backing.clone());
        chain.put(&id(), Value::counter(1)).unwrap();

        // Another writer updates the backing store directly.
        backing.put(&id(), Value::counter(2)).unwrap();
        assert_eq!(chain.get(&id()).unwrap(), Some(Value::counter(1)));
        assert_eq!(chain.reload(&id()).unwrap(), Some(Value::counter(2)));
        assert_eq!(chain.get(&id()).unwrap(), Some(Value::counter(2)));

        backing.remove(&id()).unwrap();
        assert!(chain.reload(&id()).unwrap().is_none());
        assert!(chain.get(&id()).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    #[test]
    fn write_through_reaches_backing() {
        let backing = Arc::new(InMemoryRepository::new());
        let chain = CacheChain::builder().request_cache().build(backing.clone());
        assert!(chain.put(&id(), Value::counter(4)).unwrap());
        assert_eq!(backing.get(&id()).unwrap(), Some(Value::counter(4)));

        assert!(chain.remove(&id()).unwrap());
        assert!(backing.get(&id()).unwrap().is_none());
        assert!(chain.get(&id()).unwrap().is_none());
    }

    #[test]
    fn rejected_write_leaves_caches_untouched() {
        let backing = Arc::new(CountingRepository {
            read_only: true,
            ..CountingRepository::default()
        });
        let top = Arc::new(RequestCacheTier::new());
        let chain = CacheChain::builder().tier(top.clone()).build(backing);
        assert!(!chain.put(&id(), Value::counter(1)).unwrap());
        assert!(top.is_empty());
    }

    #[test]
    fn failed_backing_write_propagates() {
        let top = Arc::new(RequestCacheTier::new());
        let chain = CacheChain::builder().tier(top.clone()).build(Arc::new(FailingRepository));
        assert!(chain.put(&id(), Value::counter(1)).is_err());
        assert!(chain.remove(&id()).is_err());
        assert!(top.is_empty());
    }

    #[test]
    fn put_absent_is_ignored() {
        let backing = Arc::new(InMemoryRepository::new());
        let chain = CacheChain::builder().request_cache().build(backing.clone());
        assert!(!chain.put(&id(), Value::Absent).unwrap());
        assert!(backing.is_empty());
    }

    #[test]
    fn history_comes_from_backing() {
        let backing = Arc::new(InMemoryRepository::new());
        let chain = CacheChain::builder().request_cache().build(backing);
        chain.put(&id(), Value::counter(1)).unwrap();
        chain.put(&id(), Value::counter(2)).unwrap();
        assert_eq!(chain.history(&id()).unwrap().count(), 2);
    }

    // -----------------------------------------------------------------------
    // Access log
    // -----------------------------------------------------------------------

    #[test]
    fn access_log_sees_only_backing_reads() {
        let config = CacheConfig {
            request_cache: true,
            access_log: true,
        };
        let chain = CacheChain::from_config(&config, Arc::new(InMemoryRepository::new()));
        assert_eq!(chain.tier_names(), vec!["request-cache", "access-log"]);

        chain.put(&id(), Value::counter(1)).unwrap();
        chain.reload(&id()).unwrap();
        chain.get(&id()).unwrap();

        let log = chain.access_log().expect("access log configured");
        assert!(log.reads().is_empty());
        assert_eq!(log.writes().len(), 1);

        chain.clear_caches();
        assert!(log.records().is_empty());
        chain.get(&id()).unwrap();
        assert_eq!(log.reads().len(), 1);
    }
}
