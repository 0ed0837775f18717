//! Capabilities consumed by the search engine
//!
//! The engine never knows which cipher or which scoring it runs. A job
//! brings a [`Decryptor`], a [`CostFunction`] and a key space whose
//! [`KeyIterator`] enumerates the keys of one block.

pub mod cost;
pub mod xor;

pub use cost::{CostKind, IndexOfCoincidence, ShannonEntropy};
pub use xor::{CipherKind, XorCipher};

use crate::error::CapabilityResult;
use crate::keyspace::{KeyRange, KeySpace};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Whether lower or higher costs are better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationOperator {
    /// Lower cost is better
    Minimize,

    /// Higher cost is better
    Maximize,
}

impl RelationOperator {
    /// Best-first ordering of two costs
    ///
    /// NaN sorts after every number for both operators.
    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match self {
                RelationOperator::Minimize => a.total_cmp(&b),
                RelationOperator::Maximize => b.total_cmp(&a),
            },
        }
    }

    /// True if `candidate` is better than `incumbent` by more than `tolerance`
    ///
    /// Minimize: `candidate < incumbent - tolerance`.
    /// Maximize: `candidate > incumbent + tolerance`.
    /// A NaN on either side never qualifies.
    pub fn beats(&self, candidate: f64, incumbent: f64, tolerance: f64) -> bool {
        match self {
            RelationOperator::Minimize => candidate < incumbent - tolerance,
            RelationOperator::Maximize => candidate > incumbent + tolerance,
        }
    }
}

impl fmt::Display for RelationOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationOperator::Minimize => write!(f, "minimize"),
            RelationOperator::Maximize => write!(f, "maximize"),
        }
    }
}

/// Enumerates the keys of one block
///
/// After [`set_keys`](KeyIterator::set_keys) the iterator sits before the
/// first key; each successful [`next_key`](KeyIterator::next_key) moves to
/// the next one.
pub trait KeyIterator: Send {
    /// Bind the iterator to `range`, resetting its position and progress
    fn set_keys(&mut self, range: &KeyRange) -> CapabilityResult<()>;

    /// Advance to the next key; false once the range is exhausted
    fn next_key(&mut self) -> bool;

    /// Bytes of the current key
    fn key(&self) -> &[u8];

    /// Keys produced since the last `set_keys`
    fn progress(&self) -> u64;
}

/// Decrypts a ciphertext under a candidate key
pub trait Decryptor: Send + Sync {
    /// Decrypt `ciphertext` with `key` and `iv`.
    /// Only the first `bytes_to_use` bytes are processed (0 means all).
    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8],
        iv: &[u8],
        bytes_to_use: usize,
    ) -> CapabilityResult<Vec<u8>>;

    /// Iterator translating the key space into key bytes this cipher accepts
    fn key_translator(&self, space: &dyn KeySpace) -> Box<dyn KeyIterator> {
        space.key_iterator()
    }

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Scores a candidate plaintext
pub trait CostFunction: Send + Sync {
    fn calculate_cost(&self, plaintext: &[u8]) -> CapabilityResult<f64>;

    fn relation_operator(&self) -> RelationOperator;

    /// Short name used in logs
    fn name(&self) -> &str;
}
