//! Repository contract for Strata.
//!
//! Every storage tier (per-request caches, instrumentation layers and the
//! log-backed store itself) implements [`Repository`], so tiers can be
//! stacked into a cache chain and transactions can flush into any of them.
//!
//! # Design Rules
//!
//! 1. Entities are addressed by [`EntityId`](strata_types::EntityId) and hold
//!    a single [`Value`](strata_types::Value) tree.
//! 2. A missing entity is `None`, never `Some(Value::Absent)`.
//! 3. Writing `Absent` is a no-op; deletion is always an explicit `remove`.
//! 4. History is append-only: deletions are recorded, not erased.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryRepository;
pub use traits::{History, Repository, Revision};
