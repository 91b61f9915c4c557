//! DHT position policy
//!
//! The registry never computes DHT positions itself; it asks a
//! [`PartitionScheme`].

use crate::types::SeedHash;

pub trait PartitionScheme: Send + Sync {
    /// Position of a peer in the DHT ring
    fn dht_position(&self, hash: &SeedHash) -> u64;

    /// Number of vertical partitions
    fn vertical_partitions(&self) -> u64;

    /// Position of a peer inside one vertical partition
    fn vertical_position(&self, hash: &SeedHash, partition: u64) -> u64;
}

/// Ring split into `2^exponent` vertical partitions of equal width
#[derive(Debug, Clone, Copy)]
pub struct VerticalPartitionScheme {
    partition_exponent: u32,
}

impl VerticalPartitionScheme {
    pub fn new(partition_exponent: u32) -> Self {
        Self {
            partition_exponent: partition_exponent.min(63),
        }
    }
}

impl PartitionScheme for VerticalPartitionScheme {
    fn dht_position(&self, hash: &SeedHash) -> u64 {
        hash.leading_u64()
    }

    fn vertical_partitions(&self) -> u64 {
        1u64 << self.partition_exponent
    }

    fn vertical_position(&self, hash: &SeedHash, partition: u64) -> u64 {
        if self.partition_exponent == 0 {
            return self.dht_position(hash);
        }
        let width_bits = 64 - self.partition_exponent;
        let partition = partition % self.vertical_partitions();
        let offset = self.dht_position(hash) >> self.partition_exponent;
        (partition << width_bits) | offset
    }
}
