//! Key space description and block partitioning
//!
//! A [`KeySpace`] is any enumerable set of candidate keys with a known size.
//! [`KeyspacePartitioner`] slices it into disjoint, contiguous blocks that
//! can be searched independently.

pub mod partition;
pub mod pattern;

pub use partition::{ChunkStrategy, KeyRange, KeyspacePartitioner, MAX_BLOCK_BITS};
pub use pattern::{KeyEncoding, KeyPattern, PatternKeyIterator};
pub(crate) use pattern::hex_value;

use crate::capability::KeyIterator;
use num_bigint::BigUint;

/// Identifier of a block within a job (`0 <= id < block_count`)
pub type BlockId = BigUint;

/// An enumerable description of every candidate key of a job
pub trait KeySpace: Send + Sync {
    /// Total number of keys
    fn size(&self) -> BigUint;

    /// A fresh, unbound iterator over this space
    fn key_iterator(&self) -> Box<dyn KeyIterator>;
}
