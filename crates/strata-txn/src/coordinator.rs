use std::collections::BTreeSet;
use std::sync::Arc;

use strata_cache::CacheChain;
use strata_log::{PartitionResolver, ReplicatedLog};
use strata_types::{Entity, EntityId, PartitionKey, Value};
use tracing::{debug, info, warn};

use crate::config::TransactionConfig;
use crate::error::{TxnError, TxnResult};
use crate::transaction::{FlushReport, FlushTarget, Transaction, TransactionId};

/// Log and resolver used to place sync barriers after a root commit.
struct SyncBarrier {
    log: Arc<dyn ReplicatedLog>,
    resolver: Arc<dyn PartitionResolver>,
}

/// The stack of transactions belonging to one request scope.
///
/// The bottom of the stack is the root transaction; committing it flushes
/// into the cache chain. Every transaction above it is nested in the one
/// below and commits into it. A coordinator is owned by a single scope and
/// passed by reference to whatever needs the current transaction.
pub struct TransactionCoordinator {
    chain: Arc<CacheChain>,
    stack: Vec<Transaction>,
    config: TransactionConfig,
    sync: Option<SyncBarrier>,
}

impl TransactionCoordinator {
    pub fn new(chain: Arc<CacheChain>, config: TransactionConfig) -> Self {
        Self {
            chain,
            stack: Vec::new(),
            config,
            sync: None,
        }
    }

    /// Wait on a sync barrier in `log` after every root commit, when
    /// `sync_on_commit` is configured.
    pub fn with_sync(
        mut self,
        log: Arc<dyn ReplicatedLog>,
        resolver: Arc<dyn PartitionResolver>,
    ) -> Self {
        self.sync = Some(SyncBarrier { log, resolver });
        self
    }

    pub fn chain(&self) -> &Arc<CacheChain> {
        &self.chain
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Number of open transactions; zero outside any transaction.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// The innermost open transaction.
    pub fn current(&self) -> Option<&Transaction> {
        self.stack.last()
    }

    /// Open a transaction nested in the current one, or a root transaction
    /// if none is open.
    pub fn begin(&mut self) -> TransactionId {
        let txn = match self.stack.last() {
            Some(parent) => Transaction::child_of(parent),
            None => Transaction::new(),
        };
        let id = txn.id();
        debug!(txn = %id, depth = self.stack.len() + 1, "begin");
        self.stack.push(txn);
        id
    }

    /// Commit the innermost transaction.
    ///
    /// A nested transaction flushes into its parent. The root flushes into
    /// the cache chain and then, if configured, waits on a sync barrier in
    /// every partition it wrote to. If the flush fails the transaction stays
    /// open with its unwritten entries, so the caller may retry or roll
    /// back.
    pub fn commit(&mut self) -> TxnResult<FlushReport> {
        let mut txn = self.stack.pop().ok_or(TxnError::NoTransaction)?;
        let validate = self.config.validate_on_commit;
        let result = match self.stack.last_mut() {
            Some(parent) => txn.flush(validate, FlushTarget::Parent(parent)),
            None => txn.flush(validate, FlushTarget::Repository(self.chain.as_ref())),
        };

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                self.stack.push(txn);
                return Err(e);
            }
        };
        info!(
            txn = %txn.id(),
            depth = self.stack.len() + 1,
            written = report.written.len(),
            removed = report.removed.len(),
            unchanged = report.unchanged.len(),
            "committed"
        );

        if self.stack.is_empty() {
            self.await_durability(&report)?;
        }
        Ok(report)
    }

    /// Discard the innermost transaction.
    pub fn rollback(&mut self) -> TxnResult<()> {
        let mut txn = self.stack.pop().ok_or(TxnError::NoTransaction)?;
        txn.rollback()
    }

    /// Run `body` inside a new transaction.
    ///
    /// An `Ok` result commits it; an `Err` rolls it back and is returned
    /// as-is. Transactions the body opened and left open are closed the same
    /// way before the outcome is applied. If a commit fails, every
    /// transaction the call opened is rolled back before the commit error is
    /// returned, so the coordinator is back at the depth it started from.
    pub fn run_in_transaction<T, E, F>(&mut self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<TxnError>,
    {
        let depth = self.stack.len();
        self.begin();
        match body(self) {
            Ok(value) => {
                while self.stack.len() > depth {
                    if let Err(e) = self.commit() {
                        self.unwind_to(depth);
                        return Err(e.into());
                    }
                }
                Ok(value)
            }
            Err(e) => {
                self.unwind_to(depth);
                Err(e)
            }
        }
    }

    /// Read an entity in the current transaction.
    pub fn read(&mut self, id: &EntityId) -> TxnResult<Option<Value>> {
        let chain = self.chain.clone();
        self.top()?.read(id, chain.as_ref())
    }

    /// Stage a value in the current transaction.
    ///
    /// An entity the transaction has not seen is read first, so the edit is
    /// based on the value stored now rather than on nothing.
    pub fn write(&mut self, id: &EntityId, value: Value) -> TxnResult<()> {
        self.load(id)?;
        self.top()?.write(id, value)
    }

    /// Stage a deletion in the current transaction.
    pub fn delete(&mut self, id: &EntityId) -> TxnResult<()> {
        self.load(id)?;
        self.top()?.delete(id)
    }

    pub fn read_entity<E: Entity>(&mut self, id: &EntityId) -> TxnResult<Option<E>> {
        match self.read(id)? {
            Some(value) => Ok(Some(E::from_value(*id, &value)?)),
            None => Ok(None),
        }
    }

    pub fn write_entity<E: Entity>(&mut self, entity: &E) -> TxnResult<()> {
        self.write(&entity.id(), entity.to_value())
    }

    fn load(&mut self, id: &EntityId) -> TxnResult<()> {
        if !self.top()?.knows(id) {
            self.read(id)?;
        }
        Ok(())
    }

    /// Roll back and drop every transaction above `depth`.
    fn unwind_to(&mut self, depth: usize) {
        while self.stack.len() > depth {
            let Some(mut txn) = self.stack.pop() else {
                break;
            };
            if let Err(e) = txn.rollback() {
                warn!(txn = %txn.id(), error = %e, "rollback while unwinding failed");
            }
        }
    }

    fn top(&mut self) -> TxnResult<&mut Transaction> {
        self.stack.last_mut().ok_or(TxnError::NoTransaction)
    }

    fn await_durability(&self, report: &FlushReport) -> TxnResult<()> {
        let Some(sync) = self.sync.as_ref().filter(|_| self.config.sync_on_commit) else {
            return Ok(());
        };
        let partitions: BTreeSet<PartitionKey> = report
            .changed()
            .map(|id| sync.resolver.resolve(id))
            .collect();
        for partition in &partitions {
            let marker = sync.log.begin_sync(partition)?;
            sync.log.await_sync(&marker)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("depth", &self.stack.len())
            .field("chain", &self.chain)
            .field("config", &self.config)
            .field("sync", &self.sync.is_some())
            .finish()
    }
}
