use serde::{Deserialize, Serialize};
use strata_types::PartitionKey;
use tracing::debug;

use crate::error::{LogError, LogResult};
use crate::message::{LogEntry, LogMessage, Offset};

/// Lazy, finite sequence of entries read from one partition.
pub type LogEntries<'a> = Box<dyn Iterator<Item = LogResult<LogEntry>> + Send + 'a>;

/// A marker appended to a partition by [`ReplicatedLog::begin_sync`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMarker {
    pub partition: PartitionKey,
    pub token: u64,
    pub offset: Offset,
}

/// Durable, partition-ordered message log.
///
/// Messages appended to one partition are read back in append order by
/// every reader. No ordering is implied across partitions.
pub trait ReplicatedLog: Send + Sync {
    /// Append a message and return the offset it was stored at.
    fn append(&self, partition: &PartitionKey, message: LogMessage) -> LogResult<Offset>;

    /// Read every entry at or after `from`, in order.
    ///
    /// Reading a partition that was never written yields no entries.
    fn read_from(&self, partition: &PartitionKey, from: Offset) -> LogResult<LogEntries<'_>>;

    /// Append a random sync marker to a partition.
    fn begin_sync(&self, partition: &PartitionKey) -> LogResult<SyncMarker> {
        let token: u64 = rand::random();
        let offset = self.append(partition, LogMessage::Sync { token })?;
        debug!(partition = %partition, token, offset, "sync barrier started");
        Ok(SyncMarker {
            partition: partition.clone(),
            token,
            offset,
        })
    }

    /// Confirm a marker from [`begin_sync`](Self::begin_sync) is readable,
    /// so every write appended before it is too.
    fn await_sync(&self, marker: &SyncMarker) -> LogResult<()> {
        for entry in self.read_from(&marker.partition, marker.offset)? {
            if let LogMessage::Sync { token } = entry?.message {
                if token == marker.token {
                    debug!(partition = %marker.partition, token, "sync barrier observed");
                    return Ok(());
                }
            }
        }
        Err(LogError::SyncNotObserved {
            partition: marker.partition.clone(),
            token: marker.token,
        })
    }
}
