use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strata_types::EntityId;

/// Position of an entry within one partition.
pub type Offset = u64;

/// An encoded value as it travels through the log.
///
/// `readers` names the roles allowed to open it; an empty set means anyone
/// may. How `data` relates to the plaintext is up to the
/// [`PayloadSealer`](crate::PayloadSealer) that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub readers: BTreeSet<String>,
    pub data: Bytes,
}

/// A message stored in a partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogMessage {
    /// A write of an entity. `base` is the value the writer started from
    /// (absent for a creation); `payload` the value it wants.
    Data {
        id: EntityId,
        base: Option<SealedPayload>,
        payload: SealedPayload,
    },
    /// A deletion of an entity.
    Tombstone { id: EntityId },
    /// A synchronization marker; carries no data.
    Sync { token: u64 },
}

impl LogMessage {
    /// The entity this message concerns, if any.
    pub fn entity(&self) -> Option<&EntityId> {
        match self {
            Self::Data { id, .. } | Self::Tombstone { id } => Some(id),
            Self::Sync { .. } => None,
        }
    }

    /// Short lowercase name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Data { .. } => "data",
            Self::Tombstone { .. } => "tombstone",
            Self::Sync { .. } => "sync",
        }
    }
}

/// A message read back from a partition.
///
/// `next` is the offset to resume reading from after this entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub offset: Offset,
    pub next: Offset,
    pub message: LogMessage,
}
