use std::collections::HashMap;
use std::sync::RwLock;

use strata_types::PartitionKey;
use tracing::trace;

use crate::error::LogResult;
use crate::message::{LogEntry, LogMessage, Offset};
use crate::traits::{LogEntries, ReplicatedLog};

/// In-memory log for tests and embedding.
///
/// Offsets are message indices within the partition.
#[derive(Default)]
pub struct InMemoryLog {
    partitions: RwLock<HashMap<PartitionKey, Vec<LogMessage>>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages stored in a partition.
    pub fn len(&self, partition: &PartitionKey) -> usize {
        self.partitions
            .read()
            .expect("lock poisoned")
            .get(partition)
            .map_or(0, Vec::len)
    }

    /// Sorted keys of every partition written so far.
    pub fn partitions(&self) -> Vec<PartitionKey> {
        let map = self.partitions.read().expect("lock poisoned");
        let mut keys: Vec<PartitionKey> = map.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl ReplicatedLog for InMemoryLog {
    fn append(&self, partition: &PartitionKey, message: LogMessage) -> LogResult<Offset> {
        let mut map = self.partitions.write().expect("lock poisoned");
        let messages = map.entry(partition.clone()).or_default();
        let offset = messages.len() as Offset;
        trace!(partition = %partition, offset, kind = message.kind(), "append");
        messages.push(message);
        Ok(offset)
    }

    fn read_from(&self, partition: &PartitionKey, from: Offset) -> LogResult<LogEntries<'_>> {
        let map = self.partitions.read().expect("lock poisoned");
        let entries: Vec<LogResult<LogEntry>> = map
            .get(partition)
            .map(|messages| {
                messages
                    .iter()
                    .enumerate()
                    .skip(from as usize)
                    .map(|(index, message)| {
                        Ok(LogEntry {
                            offset: index as Offset,
                            next: index as Offset + 1,
                            message: message.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(entries.into_iter()))
    }
}

impl std::fmt::Debug for InMemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLog")
            .field("partitions", &self.partitions().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::EntityId;

    fn tombstone(n: u128) -> LogMessage {
        LogMessage::Tombstone {
            id: EntityId::from_u128(n),
        }
    }

    #[test]
    fn append_assigns_sequential_offsets() {
        let log = InMemoryLog::new();
        let p = PartitionKey::new("accounts", 0);
        assert_eq!(log.append(&p, tombstone(1)).unwrap(), 0);
        assert_eq!(log.append(&p, tombstone(2)).unwrap(), 1);
        assert_eq!(log.len(&p), 2);
    }

    #[test]
    fn read_from_offset() {
        let log = InMemoryLog::new();
        let p = PartitionKey::new("accounts", 0);
        for n in 1..=3 {
            log.append(&p, tombstone(n)).unwrap();
        }
        let entries: Vec<LogEntry> = log
            .read_from(&p, 1)
            .unwrap()
            .collect::<LogResult<_>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset, 1);
        assert_eq!(entries[0].next, 2);
        assert_eq!(entries[1].message, tombstone(3));
    }

    #[test]
    fn partitions_are_independent() {
        let log = InMemoryLog::new();
        let a = PartitionKey::new("accounts", 0);
        let b = PartitionKey::new("accounts", 1);
        log.append(&a, tombstone(1)).unwrap();
        assert_eq!(log.read_from(&b, 0).unwrap().count(), 0);
        assert_eq!(log.partitions(), vec![a]);
    }

    #[test]
    fn sync_barrier_round_trips() {
        let log = InMemoryLog::new();
        let p = PartitionKey::new("accounts", 0);
        log.append(&p, tombstone(1)).unwrap();
        let marker = log.begin_sync(&p).unwrap();
        assert_eq!(marker.offset, 1);
        log.await_sync(&marker).unwrap();
    }

    #[test]
    fn sync_barrier_on_wrong_partition_fails() {
        let log = InMemoryLog::new();
        let mut marker = log.begin_sync(&PartitionKey::new("accounts", 0)).unwrap();
        marker.partition = PartitionKey::new("accounts", 9);
        assert!(log.await_sync(&marker).is_err());
    }
}
