use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use strata_merge::apply;
use strata_store::{History, Repository, Revision, StoreError, StoreResult};
use strata_types::{EntityId, PartitionKey, Value};
use tracing::{debug, trace, warn};

use crate::message::{LogEntry, LogMessage, Offset, SealedPayload};
use crate::resolver::PartitionResolver;
use crate::sealer::PayloadSealer;
use crate::traits::ReplicatedLog;

#[derive(Default)]
struct EntityState {
    current: Value,
    revisions: Vec<Revision>,
}

/// Materialized state of one partition, up to `cursor`.
#[derive(Default)]
struct PartitionView {
    cursor: Offset,
    entities: HashMap<EntityId, EntityState>,
}

/// Repository backed by a [`ReplicatedLog`].
///
/// Writes are appended as messages carrying both the value the writer
/// started from and the value it wants. Reads replay the partition from
/// where this repository last stopped, applying each write onto the
/// materialized value with [`strata_merge::apply`], so concurrent writers
/// sharing the log converge on the same value.
///
/// Payloads are sealed for the entity's readers. Messages this session
/// holds no key for are skipped, so such entities read as not found.
pub struct LogRepository {
    log: Arc<dyn ReplicatedLog>,
    sealer: Arc<dyn PayloadSealer>,
    resolver: Arc<dyn PartitionResolver>,
    keys: BTreeSet<String>,
    views: Mutex<HashMap<PartitionKey, PartitionView>>,
}

impl LogRepository {
    pub fn new(
        log: Arc<dyn ReplicatedLog>,
        sealer: Arc<dyn PayloadSealer>,
        resolver: Arc<dyn PartitionResolver>,
    ) -> Self {
        Self {
            log,
            sealer,
            resolver,
            keys: BTreeSet::new(),
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Act with the given keys (role names) when opening payloads and
    /// checking write permissions.
    pub fn with_keys<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn log(&self) -> &Arc<dyn ReplicatedLog> {
        &self.log
    }

    pub fn resolver(&self) -> &Arc<dyn PartitionResolver> {
        &self.resolver
    }

    /// Run `f` on the entity's state after catching its partition up with
    /// the log.
    fn with_state<T>(
        &self,
        id: &EntityId,
        f: impl FnOnce(Option<&EntityState>) -> T,
    ) -> StoreResult<T> {
        let partition = self.resolver.resolve(id);
        let mut views = self.views.lock().expect("lock poisoned");
        let view = views.entry(partition.clone()).or_default();
        self.catch_up(&partition, view)?;
        Ok(f(view.entities.get(id)))
    }

    fn catch_up(&self, partition: &PartitionKey, view: &mut PartitionView) -> StoreResult<()> {
        let start = view.cursor;
        for entry in self.log.read_from(partition, view.cursor)? {
            let entry = entry?;
            self.replay(partition, view, &entry)?;
            view.cursor = entry.next;
        }
        if view.cursor != start {
            trace!(partition = %partition, from = start, to = view.cursor, "caught up");
        }
        Ok(())
    }

    fn replay(
        &self,
        partition: &PartitionKey,
        view: &mut PartitionView,
        entry: &LogEntry,
    ) -> StoreResult<()> {
        match &entry.message {
            LogMessage::Data { id, base, payload } => {
                let Some(what) = self.decode(payload) else {
                    debug!(partition = %partition, offset = entry.offset, id = %id, "payload not readable; skipping");
                    return Ok(());
                };
                let base = base
                    .as_ref()
                    .and_then(|b| self.decode(b))
                    .unwrap_or_default();
                let state = view.entities.entry(*id).or_default();
                state.current = apply(&base, &what, &state.current)?;
                state.revisions.push(Revision {
                    value: state.current.clone(),
                    marker: entry.offset,
                });
            }
            LogMessage::Tombstone { id } => {
                let state = view.entities.entry(*id).or_default();
                state.current = Value::Absent;
                state.revisions.push(Revision {
                    value: Value::Absent,
                    marker: entry.offset,
                });
            }
            LogMessage::Sync { .. } => {}
        }
        Ok(())
    }

    fn decode(&self, sealed: &SealedPayload) -> Option<Value> {
        let plaintext = self.sealer.open(sealed, &self.keys)?;
        match bincode::deserialize::<Value>(&plaintext) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "undecodable payload; skipping");
                None
            }
        }
    }

    fn seal(&self, value: &Value, readers: &BTreeSet<String>) -> StoreResult<SealedPayload> {
        let plaintext =
            bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(self.sealer.seal(&plaintext, readers)?)
    }

    fn check_write(&self, id: &EntityId, action: &'static str) -> StoreResult<BTreeSet<String>> {
        let permissions = self.sealer.derive_permissions(&[*id]);
        if !permissions.can_write(&self.keys) {
            warn!(id = %id, action, "write rejected");
            return Err(StoreError::PermissionDenied { id: *id, action });
        }
        Ok(permissions.read_roles)
    }
}

impl Repository for LogRepository {
    fn get(&self, id: &EntityId) -> StoreResult<Option<Value>> {
        self.with_state(id, |state| state.and_then(|s| s.current.present().cloned()))
    }

    fn put(&self, id: &EntityId, value: Value) -> StoreResult<bool> {
        if value.is_absent() {
            return Ok(false);
        }
        let readers = self.check_write(id, "write")?;
        let current = self.get(id)?;

        let base = current.map(|c| self.seal(&c, &readers)).transpose()?;
        let payload = self.seal(&value, &readers)?;
        let partition = self.resolver.resolve(id);
        let offset = self.log.append(
            &partition,
            LogMessage::Data {
                id: *id,
                base,
                payload,
            },
        )?;
        debug!(partition = %partition, id = %id, offset, "entity written");
        Ok(true)
    }

    fn remove(&self, id: &EntityId) -> StoreResult<bool> {
        self.check_write(id, "delete")?;
        if !self.exists(id)? {
            return Ok(false);
        }
        let partition = self.resolver.resolve(id);
        let offset = self.log.append(&partition, LogMessage::Tombstone { id: *id })?;
        debug!(partition = %partition, id = %id, offset, "entity removed");
        Ok(true)
    }

    fn history(&self, id: &EntityId) -> StoreResult<History> {
        let revisions = self.with_state(id, |state| {
            state.map(|s| s.revisions.clone()).unwrap_or_default()
        })?;
        Ok(Box::new(revisions.into_iter()))
    }
}

impl std::fmt::Debug for LogRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRepository")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileLog, FileLogConfig};
    use crate::memory::InMemoryLog;
    use crate::resolver::{HashedPartitions, SinglePartition};
    use crate::sealer::{Permissions, PlaintextSealer};

    fn partition() -> PartitionKey {
        PartitionKey::new("accounts", 0)
    }

    fn repo_over(log: Arc<dyn ReplicatedLog>, sealer: Arc<PlaintextSealer>) -> LogRepository {
        LogRepository::new(log, sealer, Arc::new(SinglePartition::new(partition())))
    }

    fn account(name: &str, logins: i64) -> Value {
        Value::record()
            .with_field("name", name)
            .with_field("logins", Value::counter(logins))
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn put_then_get() {
        let repo = repo_over(Arc::new(InMemoryLog::new()), Arc::new(PlaintextSealer::new()));
        let id = EntityId::new();
        assert!(repo.put(&id, account("alice", 0)).unwrap());
        assert_eq!(repo.get(&id).unwrap(), Some(account("alice", 0)));
        assert!(repo.exists(&id).unwrap());
    }

    #[test]
    fn put_absent_appends_nothing() {
        let log = Arc::new(InMemoryLog::new());
        let repo = repo_over(log.clone(), Arc::new(PlaintextSealer::new()));
        assert!(!repo.put(&EntityId::new(), Value::Absent).unwrap());
        assert_eq!(log.len(&partition()), 0);
    }

    #[test]
    fn remove_appends_tombstone() {
        let log = Arc::new(InMemoryLog::new());
        let repo = repo_over(log.clone(), Arc::new(PlaintextSealer::new()));
        let id = EntityId::new();
        repo.put(&id, account("alice", 0)).unwrap();
        assert!(repo.remove(&id).unwrap());
        assert!(repo.get(&id).unwrap().is_none());
        assert!(!repo.remove(&id).unwrap());
        assert_eq!(log.len(&partition()), 2);
    }

    // -----------------------------------------------------------------------
    // Replay
    // -----------------------------------------------------------------------

    #[test]
    fn independent_repositories_converge() {
        let log: Arc<dyn ReplicatedLog> = Arc::new(InMemoryLog::new());
        let sealer = Arc::new(PlaintextSealer::new());
        let a = repo_over(log.clone(), sealer.clone());
        let b = repo_over(log.clone(), sealer.clone());
        let id = EntityId::new();

        a.put(&id, account("alice", 0)).unwrap();
        assert_eq!(b.get(&id).unwrap(), Some(account("alice", 0)));

        // Both writers start from the same version and bump the counter.
        let base = account("alice", 0);
        let base_sealed = Some(a.seal(&base, &BTreeSet::new()).unwrap());
        for writer in [&a, &b] {
            let payload = writer.seal(&account("alice", 1), &BTreeSet::new()).unwrap();
            log.append(
                &partition(),
                LogMessage::Data {
                    id,
                    base: base_sealed.clone(),
                    payload,
                },
            )
            .unwrap();
        }

        assert_eq!(a.get(&id).unwrap(), Some(account("alice", 2)));
        assert_eq!(b.get(&id).unwrap(), Some(account("alice", 2)));
    }

    #[test]
    fn history_follows_log_offsets() {
        let repo = repo_over(Arc::new(InMemoryLog::new()), Arc::new(PlaintextSealer::new()));
        let id = EntityId::new();
        repo.put(&id, account("v1", 0)).unwrap();
        repo.put(&id, account("v2", 0)).unwrap();
        repo.remove(&id).unwrap();

        let revisions: Vec<Revision> = repo.history(&id).unwrap().collect();
        let markers: Vec<u64> = revisions.iter().map(|r| r.marker).collect();
        assert_eq!(markers, vec![0, 1, 2]);
        assert_eq!(revisions[1].value, account("v2", 0));
        assert_eq!(revisions[2].value, Value::Absent);
    }

    #[test]
    fn replay_survives_reopen_of_file_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileLogConfig {
            dir: dir.path().to_path_buf(),
            ..FileLogConfig::default()
        };
        let id = EntityId::new();
        {
            let log = Arc::new(FileLog::open(config.clone()).unwrap());
            let repo = repo_over(log, Arc::new(PlaintextSealer::new()));
            repo.put(&id, account("alice", 3)).unwrap();
        }
        let log = Arc::new(FileLog::open(config).unwrap());
        let repo = repo_over(log, Arc::new(PlaintextSealer::new()));
        assert_eq!(repo.get(&id).unwrap(), Some(account("alice", 3)));
        assert_eq!(repo.history(&id).unwrap().count(), 1);
    }

    #[test]
    fn hashed_partitions_route_each_entity_consistently() {
        let log = Arc::new(InMemoryLog::new());
        let repo = LogRepository::new(
            log.clone(),
            Arc::new(PlaintextSealer::new()),
            Arc::new(HashedPartitions::new("accounts", 2)),
        );
        let (even, odd) = (EntityId::from_u128(2), EntityId::from_u128(3));
        repo.put(&even, account("even", 0)).unwrap();
        repo.put(&odd, account("odd", 0)).unwrap();
        assert_eq!(log.len(&PartitionKey::new("accounts", 0)), 1);
        assert_eq!(log.len(&PartitionKey::new("accounts", 1)), 1);
        assert_eq!(repo.get(&odd).unwrap(), Some(account("odd", 0)));
    }

    // -----------------------------------------------------------------------
    // Permissions
    // -----------------------------------------------------------------------

    #[test]
    fn write_without_role_is_denied() {
        let sealer = Arc::new(PlaintextSealer::with_default(Permissions::new(
            Vec::<String>::new(),
            ["admin"],
        )));
        let log = Arc::new(InMemoryLog::new());
        let guest = repo_over(log.clone(), sealer.clone()).with_keys(["guest"]);
        let id = EntityId::new();

        let err = guest.put(&id, account("x", 0)).unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { action: "write", .. }));
        assert_eq!(log.len(&partition()), 0);

        let admin = repo_over(log, sealer).with_keys(["admin"]);
        assert!(admin.put(&id, account("x", 0)).unwrap());
        assert!(matches!(
            guest.remove(&id).unwrap_err(),
            StoreError::PermissionDenied { action: "delete", .. }
        ));
    }

    #[test]
    fn unreadable_entities_are_not_found() {
        let sealer = Arc::new(PlaintextSealer::new());
        let id = EntityId::new();
        sealer.grant(id, Permissions::new(["finance"], ["finance"]));

        let log: Arc<dyn ReplicatedLog> = Arc::new(InMemoryLog::new());
        let finance = repo_over(log.clone(), sealer.clone()).with_keys(["finance"]);
        finance.put(&id, account("ledger", 1)).unwrap();

        let sales = repo_over(log, sealer).with_keys(["sales"]);
        assert!(sales.get(&id).unwrap().is_none());
        assert_eq!(finance.get(&id).unwrap(), Some(account("ledger", 1)));
    }

    #[test]
    fn shape_conflict_in_log_surfaces_as_merge_error() {
        let log: Arc<dyn ReplicatedLog> = Arc::new(InMemoryLog::new());
        let repo = repo_over(log.clone(), Arc::new(PlaintextSealer::new()));
        let id = EntityId::new();
        repo.put(&id, Value::counter(1)).unwrap();

        let payload = repo.seal(&Value::text("one"), &BTreeSet::new()).unwrap();
        let base = Some(repo.seal(&Value::counter(1), &BTreeSet::new()).unwrap());
        log.append(&partition(), LogMessage::Data { id, base, payload })
            .unwrap();

        assert!(matches!(repo.get(&id).unwrap_err(), StoreError::Merge(_)));
    }
}
