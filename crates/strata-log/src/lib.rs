//! Replicated log layer for Strata.
//!
//! Entities are persisted as a partitioned, append-only stream of messages.
//! This crate defines the contracts of the collaborators involved (the
//! [`ReplicatedLog`] itself with its sync barrier, the [`PayloadSealer`]
//! that encrypts payloads and derives permissions, and the
//! [`PartitionResolver`] that shards entities), reference implementations
//! of each, and [`LogRepository`], the backing store that materializes
//! entities by replaying their partition.

pub mod error;
pub mod file;
pub mod memory;
pub mod message;
pub mod repository;
pub mod resolver;
pub mod sealer;
pub mod traits;

pub use error::{LogError, LogResult};
pub use file::{FileLog, FileLogConfig, SyncMode};
pub use memory::InMemoryLog;
pub use message::{LogEntry, LogMessage, Offset, SealedPayload};
pub use repository::LogRepository;
pub use resolver::{HashedPartitions, PartitionResolver, SinglePartition};
pub use sealer::{Permissions, PayloadSealer, PlaintextSealer};
pub use traits::{LogEntries, ReplicatedLog, SyncMarker};
