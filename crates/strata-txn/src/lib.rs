//! Transactions for Strata.
//!
//! A [`Transaction`] remembers what it read and stages edits against it.
//! Committing merges every edit three ways (what was read, what was staged,
//! what the target holds now) so concurrent scopes never overwrite each
//! other's changes and never fail because someone else committed first.
//!
//! The [`TransactionCoordinator`] owns the stack of open transactions for
//! one request scope: nested transactions commit into their parent, the
//! root commits into the [`CacheChain`](strata_cache::CacheChain).

pub mod config;
pub mod coordinator;
pub mod error;
pub mod transaction;

pub use config::TransactionConfig;
pub use coordinator::TransactionCoordinator;
pub use error::{TxnError, TxnResult};
pub use transaction::{FlushReport, FlushTarget, Transaction, TransactionId, TransactionState};
