use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strata_merge::{merge, MergeMode};
use strata_store::Repository;
use strata_types::{EntityId, Value};
use tracing::{debug, warn};

use crate::error::{TxnError, TxnResult};

/// Identity of a transaction (UUID v7).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(uuid::Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.short_id())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionState {
    Active,
    Flushing,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Flushing => "flushing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// Where a flush writes its merged values.
pub enum FlushTarget<'a> {
    /// The enclosing transaction's pending set.
    Parent(&'a mut Transaction),
    /// A repository, normally the cache chain over the backing store.
    Repository(&'a dyn Repository),
}

/// What a successful flush did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entities written with a new value.
    pub written: Vec<EntityId>,
    /// Entities whose merged result was a deletion.
    pub removed: Vec<EntityId>,
    /// Entities whose merged result equalled what the target already held.
    pub unchanged: Vec<EntityId>,
}

impl FlushReport {
    /// Every entity the flush changed in its target.
    pub fn changed(&self) -> impl Iterator<Item = &EntityId> {
        self.written.iter().chain(self.removed.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.removed.is_empty() && self.unchanged.is_empty()
    }
}

#[derive(Clone, Debug)]
struct PendingEntry {
    /// The value as first read, before any local edit.
    base: Value,
    /// The locally staged value. `Absent` stages a deletion.
    value: Value,
}

/// A bounded unit of reads and staged edits.
///
/// Reads go through to a repository once and are remembered as the base of
/// any later edit. Edits stay pending until [`flush`](Self::flush), which
/// three-way merges each one (base, local edit, target's current value) and
/// writes the result either to a repository or into an enclosing
/// transaction.
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    read_cache: HashMap<EntityId, Value>,
    order: Vec<EntityId>,
    pending: HashMap<EntityId, PendingEntry>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            read_cache: HashMap::new(),
            order: Vec::new(),
            pending: HashMap::new(),
        }
    }

    /// A transaction nested in `parent`, seeing what the parent sees.
    pub fn child_of(parent: &Transaction) -> Self {
        let mut child = Self::new();
        child.seed_from(parent);
        child
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Ids with a staged edit, in first-touch order.
    pub fn pending_ids(&self) -> &[EntityId] {
        &self.order
    }

    pub fn has_pending(&self) -> bool {
        !self.order.is_empty()
    }

    /// Whether this transaction has read or staged the entity.
    pub fn knows(&self, id: &EntityId) -> bool {
        self.pending.contains_key(id) || self.read_cache.contains_key(id)
    }

    /// Copy the parent's view (its read cache overlaid with its staged
    /// values) into this transaction's read cache.
    pub fn seed_from(&mut self, parent: &Transaction) {
        for (id, value) in &parent.read_cache {
            self.read_cache.insert(*id, value.clone());
        }
        for (id, entry) in &parent.pending {
            self.read_cache.insert(*id, entry.value.clone());
        }
    }

    /// Read an entity: the staged value, else the cached read, else a read
    /// through `source` that is remembered as the base of later edits.
    pub fn read(&mut self, id: &EntityId, source: &dyn Repository) -> TxnResult<Option<Value>> {
        self.ensure_active()?;
        if let Some(value) = self.view(id) {
            return Ok(value.present().cloned());
        }
        let value = source.get(id)?;
        self.read_cache
            .insert(*id, value.clone().unwrap_or(Value::Absent));
        Ok(value)
    }

    /// Stage a new value. The base is whatever was read (or staged by a
    /// parent) for the entity; an entity never seen has an absent base.
    /// Writing `Absent` stages a deletion.
    pub fn write(&mut self, id: &EntityId, value: Value) -> TxnResult<()> {
        self.ensure_active()?;
        let base = self.base_of(id, Value::Absent);
        self.stage(*id, base, value);
        Ok(())
    }

    /// Stage a deletion. Deleting something that never existed just drops
    /// any staged value for it.
    pub fn delete(&mut self, id: &EntityId) -> TxnResult<()> {
        self.write(id, Value::Absent)
    }

    /// Discard every staged edit and cached read.
    pub fn rollback(&mut self) -> TxnResult<()> {
        self.ensure_active()?;
        debug!(txn = %self.id, pending = self.order.len(), "rolling back");
        self.clear();
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    /// Merge every staged edit into `target`, in first-touch order.
    ///
    /// For each entity the merge is `(base, staged, current)` where
    /// `current` is what the target holds now. A repository target is
    /// reloaded, bypassing caches. With `validate`, every merged value is
    /// checked before it is written.
    ///
    /// Entries are removed from the pending set as they are written. If one
    /// fails the transaction goes back to `Active` with the rest still
    /// staged, and the error is returned.
    pub fn flush(&mut self, validate: bool, target: FlushTarget<'_>) -> TxnResult<FlushReport> {
        self.ensure_active()?;
        self.state = TransactionState::Flushing;
        let mut report = FlushReport::default();
        let result = match target {
            FlushTarget::Parent(parent) => self.flush_into_parent(validate, parent, &mut report),
            FlushTarget::Repository(repo) => self.flush_into_repository(validate, repo, &mut report),
        };
        self.order.retain(|id| self.pending.contains_key(id));

        match result {
            Ok(()) => {
                self.clear();
                self.state = TransactionState::Committed;
                Ok(report)
            }
            Err(e) => {
                warn!(txn = %self.id, remaining = self.order.len(), error = %e, "flush failed");
                self.state = TransactionState::Active;
                Err(e)
            }
        }
    }

    fn flush_into_repository(
        &mut self,
        validate: bool,
        target: &dyn Repository,
        report: &mut FlushReport,
    ) -> TxnResult<()> {
        for id in self.order.clone() {
            let Some(entry) = self.pending.get(&id) else {
                continue;
            };
            let current = target.reload(&id)?.unwrap_or(Value::Absent);
            let merged = merge(MergeMode::ThreeWay, &entry.base, &entry.value, &current)?;
            if validate {
                merged.validate()?;
            }

            if merged == current {
                debug!(txn = %self.id, id = %id, "unchanged");
                report.unchanged.push(id);
            } else if merged.is_absent() {
                target.remove(&id)?;
                debug!(txn = %self.id, id = %id, "removed");
                report.removed.push(id);
            } else {
                target.put(&id, merged.clone())?;
                debug!(txn = %self.id, id = %id, "written");
                report.written.push(id);
            }
            self.pending.remove(&id);
            self.read_cache.insert(id, merged);
        }
        Ok(())
    }

    fn flush_into_parent(
        &mut self,
        validate: bool,
        parent: &mut Transaction,
        report: &mut FlushReport,
    ) -> TxnResult<()> {
        parent.ensure_active()?;
        for id in self.order.clone() {
            let Some(entry) = self.pending.get(&id) else {
                continue;
            };
            let current = parent.view(&id).cloned().unwrap_or_else(|| entry.base.clone());
            let merged = merge(MergeMode::ThreeWay, &entry.base, &entry.value, &current)?;
            if validate {
                merged.validate()?;
            }

            if merged == current {
                report.unchanged.push(id);
            } else {
                if merged.is_absent() {
                    report.removed.push(id);
                } else {
                    report.written.push(id);
                }
                parent.merge_staged(id, entry.base.clone(), merged);
            }
            debug!(txn = %self.id, parent = %parent.id, id = %id, "flushed into parent");
            self.pending.remove(&id);
        }
        for (id, value) in &self.read_cache {
            parent
                .read_cache
                .entry(*id)
                .or_insert_with(|| value.clone());
        }
        Ok(())
    }

    /// Accept a value flushed from a child. An entity the parent already
    /// staged keeps its own base; otherwise the parent's read (or the
    /// child's base) becomes the base.
    fn merge_staged(&mut self, id: EntityId, child_base: Value, value: Value) {
        let base = self.base_of(&id, child_base);
        self.stage(id, base, value);
    }

    /// The base an edit of `id` is made against: the staged entry's base,
    /// else the cached read, else `fallback`.
    fn base_of(&self, id: &EntityId, fallback: Value) -> Value {
        match self.pending.get(id) {
            Some(entry) => entry.base.clone(),
            None => self.read_cache.get(id).cloned().unwrap_or(fallback),
        }
    }

    fn stage(&mut self, id: EntityId, base: Value, value: Value) {
        if base.is_absent() && value.is_absent() {
            // Deleting something that never existed.
            self.pending.remove(&id);
            self.order.retain(|staged| *staged != id);
            self.read_cache.insert(id, Value::Absent);
            return;
        }
        match self.pending.get_mut(&id) {
            Some(entry) => entry.value = value,
            None => {
                self.pending.insert(id, PendingEntry { base, value });
                self.order.push(id);
            }
        }
    }

    /// The value this transaction currently sees for an entity without
    /// reading through: staged first, then cached.
    fn view(&self, id: &EntityId) -> Option<&Value> {
        self.pending
            .get(id)
            .map(|entry| &entry.value)
            .or_else(|| self.read_cache.get(id))
    }

    fn ensure_active(&self) -> TxnResult<()> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(TxnError::NotActive {
                id: self.id,
                state: self.state,
            })
        }
    }

    fn clear(&mut self) {
        self.read_cache.clear();
        self.order.clear();
        self.pending.clear();
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("cached", &self.read_cache.len())
            .field("pending", &self.order.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use strata_store::{History, InMemoryRepository, StoreError, StoreResult};

    fn id(n: u128) -> EntityId {
        EntityId::from_u128(n)
    }

    fn account(logins: i64) -> Value {
        Value::record()
            .with_field("name", "ada")
            .with_field("logins", Value::counter(logins))
    }

    /// Repository that fails every put after the first `allowed`.
    struct FlakyRepository {
        inner: InMemoryRepository,
        allowed: usize,
        puts: AtomicUsize,
    }

    impl Repository for FlakyRepository {
        fn get(&self, id: &EntityId) -> StoreResult<Option<Value>> {
            self.inner.get(id)
        }

        fn put(&self, id: &EntityId, value: Value) -> StoreResult<bool> {
            if self.puts.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                return Err(StoreError::Log("backing store unavailable".into()));
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

    // -----------------------------------------------------------------------
    // Reads and staging
    // -----------------------------------------------------------------------

    #[test]
    fn read_is_cached_after_first_lookup() {
        let repo = InMemoryRepository::new();
        repo.put(&id(1), account(1)).unwrap();
        let mut txn = Transaction::new();

        assert_eq!(txn.read(&id(1), &repo).unwrap(), Some(account(1)));
        repo.put(&id(1), account(9)).unwrap();
        assert_eq!(txn.read(&id(1), &repo).unwrap(), Some(account(1)));
    }

    #[test]
    fn read_sees_staged_value() {
        let repo = InMemoryRepository::new();
        let mut txn = Transaction::new();
        txn.write(&id(1), account(3)).unwrap();
        assert_eq!(txn.read(&id(1), &repo).unwrap(), Some(account(3)));

        txn.delete(&id(1)).unwrap();
        assert!(txn.read(&id(1), &repo).unwrap().is_none());
    }

    #[test]
    fn pending_keeps_first_touch_order() {
        let mut txn = Transaction::new();
        txn.write(&id(3), account(1)).unwrap();
        txn.write(&id(1), account(1)).unwrap();
        txn.write(&id(3), account(2)).unwrap();
        assert_eq!(txn.pending_ids(), &[id(3), id(1)]);
    }

    #[test]
    fn deleting_unsaved_entity_undoes_it() {
        let mut txn = Transaction::new();
        txn.write(&id(1), account(1)).unwrap();
        txn.delete(&id(1)).unwrap();
        assert!(!txn.has_pending());
    }

    // -----------------------------------------------------------------------
    // Flush to a repository
    // -----------------------------------------------------------------------

    #[test]
    fn flush_writes_and_commits() {
        let repo = InMemoryRepository::new();
        let mut txn = Transaction::new();
        txn.write(&id(1), account(1)).unwrap();

        let report = txn.flush(true, FlushTarget::Repository(&repo)).unwrap();
        assert_eq!(report.written, vec![id(1)]);
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(repo.get(&id(1)).unwrap(), Some(account(1)));
    }

    #[test]
    fn flush_merges_concurrent_counter_edits() {
        let repo = InMemoryRepository::new();
        repo.put(&id(1), account(10)).unwrap();

        let mut a = Transaction::new();
        let mut b = Transaction::new();
        a.read(&id(1), &repo).unwrap();
        b.read(&id(1), &repo).unwrap();
        a.write(&id(1), account(11)).unwrap();
        b.write(&id(1), account(15)).unwrap();

        a.flush(false, FlushTarget::Repository(&repo)).unwrap();
        b.flush(false, FlushTarget::Repository(&repo)).unwrap();
        assert_eq!(repo.get(&id(1)).unwrap(), Some(account(16)));
    }

    #[test]
    fn flush_of_delete_removes_entity() {
        let repo = InMemoryRepository::new();
        repo.put(&id(1), account(1)).unwrap();
        let mut txn = Transaction::new();
        txn.read(&id(1), &repo).unwrap();
        txn.delete(&id(1)).unwrap();

        let report = txn.flush(true, FlushTarget::Repository(&repo)).unwrap();
        assert_eq!(report.removed, vec![id(1)]);
        assert!(repo.get(&id(1)).unwrap().is_none());
    }

    #[test]
    fn flush_with_nothing_pending_changes_nothing() {
        let repo = InMemoryRepository::new();
        repo.put(&id(1), account(1)).unwrap();
        let mut txn = Transaction::new();
        txn.read(&id(1), &repo).unwrap();

        let report = txn.flush(true, FlushTarget::Repository(&repo)).unwrap();
        assert!(report.is_empty());
        assert_eq!(repo.history(&id(1)).unwrap().count(), 1);
    }

    #[test]
    fn unchanged_merge_is_not_rewritten() {
        let repo = InMemoryRepository::new();
        repo.put(&id(1), account(1)).unwrap();
        let mut txn = Transaction::new();
        txn.read(&id(1), &repo).unwrap();
        txn.write(&id(1), account(1)).unwrap();

        let report = txn.flush(true, FlushTarget::Repository(&repo)).unwrap();
        assert_eq!(report.unchanged, vec![id(1)]);
        assert_eq!(repo.history(&id(1)).unwrap().count(), 1);
    }

    #[test]
    fn validation_rejects_malformed_value() {
        let repo = InMemoryRepository::new();
        let mut txn = Transaction::new();
        let malformed = Value::Record(BTreeMap::from([("name".to_string(), Value::Absent)]));
        txn.write(&id(1), malformed).unwrap();

        let err = txn.flush(true, FlushTarget::Repository(&repo)).unwrap_err();
        assert!(matches!(err, TxnError::Type(_)));
        assert!(txn.is_active());
        assert_eq!(txn.pending_ids(), &[id(1)]);
    }

    #[test]
    fn failed_flush_keeps_unwritten_entries() {
        let repo = FlakyRepository {
            inner: InMemoryRepository::new(),
            allowed: 1,
            puts: AtomicUsize::new(0),
        };
        let mut txn = Transaction::new();
        txn.write(&id(1), account(1)).unwrap();
        txn.write(&id(2), account(2)).unwrap();

        assert!(txn.flush(true, FlushTarget::Repository(&repo)).is_err());
        assert_eq!(txn.state(), TransactionState::Active);
        assert_eq!(txn.pending_ids(), &[id(2)]);
        assert_eq!(repo.inner.get(&id(1)).unwrap(), Some(account(1)));
        assert!(repo.inner.get(&id(2)).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Nesting
    // -----------------------------------------------------------------------

    #[test]
    fn child_write_invisible_to_parent_until_flushed() {
        let repo = InMemoryRepository::new();
        let mut parent = Transaction::new();
        let mut child = Transaction::child_of(&parent);
        child.write(&id(1), account(1)).unwrap();

        assert!(parent.read(&id(1), &repo).unwrap().is_none());

        // The parent has now cached "absent"; the child's flush still wins.
        child.flush(true, FlushTarget::Parent(&mut parent)).unwrap();
        assert_eq!(parent.read(&id(1), &repo).unwrap(), Some(account(1)));
        assert!(repo.is_empty());

        parent.flush(true, FlushTarget::Repository(&repo)).unwrap();
        assert_eq!(repo.get(&id(1)).unwrap(), Some(account(1)));
    }

    #[test]
    fn child_sees_parent_staged_values() {
        let repo = InMemoryRepository::new();
        let mut parent = Transaction::new();
        parent.write(&id(1), account(1)).unwrap();

        let mut child = Transaction::child_of(&parent);
        assert_eq!(child.read(&id(1), &repo).unwrap(), Some(account(1)));
    }

    #[test]
    fn child_and_parent_edits_merge() {
        let repo = InMemoryRepository::new();
        repo.put(&id(1), account(10)).unwrap();
        let mut parent = Transaction::new();
        parent.read(&id(1), &repo).unwrap();
        let mut child = Transaction::child_of(&parent);

        parent.write(&id(1), account(12)).unwrap();
        child.write(&id(1), account(13)).unwrap();
        child.flush(true, FlushTarget::Parent(&mut parent)).unwrap();
        assert_eq!(parent.read(&id(1), &repo).unwrap(), Some(account(15)));

        parent.flush(true, FlushTarget::Repository(&repo)).unwrap();
        assert_eq!(repo.get(&id(1)).unwrap(), Some(account(15)));
    }

    #[test]
    fn child_reads_are_copied_to_parent() {
        let repo = InMemoryRepository::new();
        repo.put(&id(1), account(1)).unwrap();
        let mut parent = Transaction::new();
        let mut child = Transaction::child_of(&parent);
        child.read(&id(1), &repo).unwrap();
        child.flush(true, FlushTarget::Parent(&mut parent)).unwrap();
        assert!(parent.knows(&id(1)));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn finished_transaction_rejects_operations() {
        let repo = InMemoryRepository::new();
        let mut txn = Transaction::new();
        txn.rollback().unwrap();
        assert_eq!(txn.state(), TransactionState::RolledBack);

        let err = txn.write(&id(1), account(1)).unwrap_err();
        assert!(matches!(
            err,
            TxnError::NotActive {
                state: TransactionState::RolledBack,
                ..
            }
        ));
        assert!(txn.read(&id(1), &repo).is_err());
        assert!(txn.flush(true, FlushTarget::Repository(&repo)).is_err());
    }

    #[test]
    fn rollback_discards_pending() {
        let repo = InMemoryRepository::new();
        let mut txn = Transaction::new();
        txn.write(&id(1), account(1)).unwrap();
        txn.rollback().unwrap();
        assert!(!txn.has_pending());
        assert!(repo.is_empty());
    }

    #[test]
    fn flush_into_finished_parent_fails() {
        let mut parent = Transaction::new();
        let mut child = Transaction::child_of(&parent);
        child.write(&id(1), account(1)).unwrap();
        parent.rollback().unwrap();

        assert!(child.flush(true, FlushTarget::Parent(&mut parent)).is_err());
        assert!(child.is_active());
        assert_eq!(child.pending_ids(), &[id(1)]);
    }
}
