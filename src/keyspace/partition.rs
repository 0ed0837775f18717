//! Block partitioning of a key space
//!
//! Blocks are numbered from zero. Every block holds `chunk_size` keys except
//! the last one, which holds whatever remains. The union of all blocks is the
//! whole key space and no key belongs to two blocks.

use crate::error::PartitionError;
use crate::keyspace::BlockId;
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest supported block-count exponent for [`ChunkStrategy::BlockBits`]
pub const MAX_BLOCK_BITS: u32 = 128;

/// How the block size of a job is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Fixed number of keys per block
    ChunkSize(u64),

    /// Split the space into `2^bits` blocks (fewer if the space is small)
    BlockBits(u32),
}

impl Default for ChunkStrategy {
    fn default() -> Self {
        ChunkStrategy::ChunkSize(1 << 20)
    }
}

impl ChunkStrategy {
    /// Resolve the strategy into a concrete chunk size for a space of `total` keys
    pub fn chunk_size(&self, total: &BigUint) -> Result<u64, PartitionError> {
        match *self {
            ChunkStrategy::ChunkSize(0) => Err(PartitionError::InvalidChunkSize(0)),
            ChunkStrategy::ChunkSize(size) => Ok(size),
            ChunkStrategy::BlockBits(bits) => {
                if bits == 0 || bits > MAX_BLOCK_BITS {
                    return Err(PartitionError::InvalidBlockBits {
                        bits,
                        min: 1,
                        max: MAX_BLOCK_BITS,
                    });
                }
                let blocks = BigUint::one() << bits;
                let chunk = ceil_div(total, &blocks).max(BigUint::one());
                chunk.to_u64().ok_or_else(|| PartitionError::ChunkTooLarge {
                    size: chunk.to_string(),
                })
            }
        }
    }
}

/// A contiguous run of keys: `len` keys starting at index `start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    /// Index of the first key in the key space
    pub start: BigUint,

    /// Number of keys in the range
    pub len: u64,
}

impl KeyRange {
    pub fn new(start: BigUint, len: u64) -> Self {
        Self { start, len }
    }

    /// Index one past the last key
    pub fn end(&self) -> BigUint {
        &self.start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

/// Divides a key space of a known size into addressable blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspacePartitioner {
    total: BigUint,
    chunk_size: u64,
    block_count: BigUint,
}

impl KeyspacePartitioner {
    /// Partition `total` keys into blocks of `chunk_size` keys
    pub fn new(total: BigUint, chunk_size: u64) -> Result<Self, PartitionError> {
        if chunk_size == 0 {
            return Err(PartitionError::InvalidChunkSize(chunk_size));
        }
        let block_count = ceil_div(&total, &BigUint::from(chunk_size));
        Ok(Self {
            total,
            chunk_size,
            block_count,
        })
    }

    /// Partition `total` keys using a [`ChunkStrategy`]
    pub fn with_strategy(total: BigUint, strategy: ChunkStrategy) -> Result<Self, PartitionError> {
        let chunk = strategy.chunk_size(&total)?;
        Self::new(total, chunk)
    }

    /// Total number of keys covered
    pub fn total(&self) -> &BigUint {
        &self.total
    }

    /// Configured keys per block
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of blocks: `ceil(total / chunk_size)`
    pub fn block_count(&self) -> &BigUint {
        &self.block_count
    }

    /// Key range of block `id`
    pub fn block(&self, id: &BlockId) -> Result<KeyRange, PartitionError> {
        if id >= &self.block_count {
            return Err(PartitionError::OutOfBounds {
                id: id.clone(),
                count: self.block_count.clone(),
            });
        }

        let start = id * self.chunk_size;
        let remaining = &self.total - &start;
        // remaining > 0 here, and only the last block can hold fewer than chunk_size keys
        let len = remaining.to_u64().map_or(self.chunk_size, |r| r.min(self.chunk_size));
        Ok(KeyRange::new(start, len))
    }

    /// Iterate over every block id in ascending order
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        let mut next = BigUint::zero();
        std::iter::from_fn(move || {
            if next >= self.block_count {
                return None;
            }
            let id = next.clone();
            next += 1u32;
            Some(id)
        })
    }
}

fn ceil_div(n: &BigUint, d: &BigUint) -> BigUint {
    if n.is_zero() {
        return BigUint::zero();
    }
    (n - 1u32) / d + 1u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(n: u64) -> BigUint {
        BigUint::from(n)
    }

    #[test]
    fn test_exact_division() {
        let p = KeyspacePartitioner::new(big(256), 16).unwrap();
        assert_eq!(p.block_count(), &big(16));

        let last = p.block(&big(15)).unwrap();
        assert_eq!(last.start, big(240));
        assert_eq!(last.len, 16);
    }

    #[test]
    fn test_short_last_block() {
        let p = KeyspacePartitioner::new(big(100), 30).unwrap();
        assert_eq!(p.block_count(), &big(4));
        assert_eq!(p.block(&big(0)).unwrap(), KeyRange::new(big(0), 30));
        assert_eq!(p.block(&big(3)).unwrap(), KeyRange::new(big(90), 10));
    }

    #[test]
    fn test_out_of_bounds() {
        let p = KeyspacePartitioner::new(big(100), 30).unwrap();
        let err = p.block(&big(4)).unwrap_err();
        assert!(matches!(err, PartitionError::OutOfBounds { .. }));
    }

    #[test]
    fn test_zero_chunk_rejected() {
        assert_eq!(
            KeyspacePartitioner::new(big(10), 0).unwrap_err(),
            PartitionError::InvalidChunkSize(0)
        );
    }

    #[test]
    fn test_empty_space_has_no_blocks() {
        let p = KeyspacePartitioner::new(big(0), 8).unwrap();
        assert!(p.block_count().is_zero());
        assert_eq!(p.block_ids().count(), 0);
        assert!(p.block(&big(0)).is_err());
    }

    #[test]
    fn test_huge_space() {
        let total = BigUint::one() << 128u32;
        let p = KeyspacePartitioner::new(total.clone(), 1 << 32).unwrap();
        assert_eq!(p.block_count(), &(BigUint::one() << 96u32));

        let last_id = p.block_count() - 1u32;
        let last = p.block(&last_id).unwrap();
        assert_eq!(last.end(), total);
        assert_eq!(last.len, 1 << 32);
    }

    #[test]
    fn test_block_bits_strategy() {
        let strategy = ChunkStrategy::BlockBits(4);
        assert_eq!(strategy.chunk_size(&big(256)).unwrap(), 16);
        assert_eq!(strategy.chunk_size(&big(250)).unwrap(), 16);
        // Fewer keys than blocks: one key per block
        assert_eq!(strategy.chunk_size(&big(3)).unwrap(), 1);

        let p = KeyspacePartitioner::with_strategy(big(256), strategy).unwrap();
        assert_eq!(p.block_count(), &big(16));
    }

    #[test]
    fn test_block_bits_bounds() {
        assert!(ChunkStrategy::BlockBits(0).chunk_size(&big(10)).is_err());
        assert!(ChunkStrategy::BlockBits(129).chunk_size(&big(10)).is_err());

        let total = BigUint::one() << 200u32;
        let err = ChunkStrategy::BlockBits(8).chunk_size(&total).unwrap_err();
        assert!(matches!(err, PartitionError::ChunkTooLarge { .. }));
    }

    #[test]
    fn test_block_ids_cover_space() {
        let p = KeyspacePartitioner::new(big(1000), 64).unwrap();
        let mut next = big(0);
        for id in p.block_ids() {
            let range = p.block(&id).unwrap();
            assert_eq!(range.start, next);
            next = range.end();
        }
        assert_eq!(next, big(1000));
    }
}
