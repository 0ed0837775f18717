//! Exhaustive search of key blocks
//!
//! - [`BlockWorker`] searches one block and keeps its best candidates
//! - [`TopList`] is the bounded, ordered candidate list
//! - [`ResultMerger`] folds lists from many blocks into one

pub mod context;
pub mod merge;
pub mod toplist;
pub mod worker;

pub use context::JobContext;
pub use merge::ResultMerger;
pub use toplist::{CandidateResult, TopList, REPLACEMENT_TOLERANCE, TOP_LIST_CAPACITY};
pub use worker::BlockWorker;

use crate::keyspace::BlockId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of a fully searched block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockResult {
    pub block_id: BlockId,
    pub local_results: TopList,
}

/// Progress of a block search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockProgress {
    /// Keys evaluated so far
    pub evaluated: u64,

    /// Keys in the block
    pub block_size: u64,
}

impl BlockProgress {
    pub fn fraction(&self) -> f64 {
        if self.block_size == 0 {
            1.0
        } else {
            self.evaluated as f64 / self.block_size as f64
        }
    }
}

/// Cooperative cancellation flag shared between a controller and its workers
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing shutdown flag
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// The underlying flag
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}
