use strata_types::{EntityId, PartitionKey};

/// Maps an entity to the partition its writes are appended to.
///
/// Every write of one entity must land in the same partition so replay sees
/// them in order.
pub trait PartitionResolver: Send + Sync {
    fn resolve(&self, id: &EntityId) -> PartitionKey;
}

/// Every entity lives in one partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinglePartition(PartitionKey);

impl SinglePartition {
    pub fn new(partition: PartitionKey) -> Self {
        Self(partition)
    }
}

impl PartitionResolver for SinglePartition {
    fn resolve(&self, _id: &EntityId) -> PartitionKey {
        self.0.clone()
    }
}

/// Spreads entities over `count` partitions of one topic by their id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashedPartitions {
    topic: String,
    count: u32,
}

impl HashedPartitions {
    /// `count` is clamped to at least one partition.
    pub fn new(topic: impl Into<String>, count: u32) -> Self {
        Self {
            topic: topic.into(),
            count: count.max(1),
        }
    }
}

impl PartitionResolver for HashedPartitions {
    fn resolve(&self, id: &EntityId) -> PartitionKey {
        let index = (id.as_uuid().as_u128() % u128::from(self.count)) as u32;
        PartitionKey::new(self.topic.clone(), index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_partition_ignores_id() {
        let resolver = SinglePartition::new(PartitionKey::new("accounts", 3));
        assert_eq!(resolver.resolve(&EntityId::new()), PartitionKey::new("accounts", 3));
    }

    #[test]
    fn hashed_partitions_are_stable_and_in_range() {
        let resolver = HashedPartitions::new("accounts", 4);
        for n in 0..32u128 {
            let id = EntityId::from_u128(n);
            let key = resolver.resolve(&id);
            assert_eq!(key, resolver.resolve(&id));
            assert_eq!(key.topic(), "accounts");
            assert!(key.index() < 4);
        }
        assert_eq!(resolver.resolve(&EntityId::from_u128(6)).index(), 2);
    }

    #[test]
    fn zero_partitions_clamps_to_one() {
        let resolver = HashedPartitions::new("accounts", 0);
        assert_eq!(resolver.resolve(&EntityId::new()).index(), 0);
    }
}
