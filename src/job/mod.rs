//! Jobs: definition, payload, block computation and coordination
//!
//! A job is one search over a fixed key space and ciphertext. It is
//! described by a [`JobDefinition`], shipped as a [`JobPayload`], computed
//! block by block through the [`BlockComputable`] trait and driven by a
//! [`JobCoordinator`].

pub mod coordinator;
pub mod definition;
pub mod payload;

pub use coordinator::{JobCoordinator, JobState, StopHandle};
pub use definition::{integrity_hash, IntegrityHash, JobDefinition};
pub use payload::{JobPayload, MAX_DEFINITION_SIZE};

use crate::config::SearchTuning;
use crate::error::{BlockOutcome, Result, WorkerError};
use crate::keyspace::{BlockId, ChunkStrategy, KeyRange, KeyspacePartitioner};
use crate::search::{BlockProgress, BlockWorker, CancelToken, JobContext, ResultMerger, TopList};
use num_bigint::BigUint;
use std::time::Duration;

/// Identifier a distributed runtime knows a job by
pub type JobId = uuid::Uuid;

/// A job that can be computed one block at a time
///
/// Runtimes call `compute_block` for every block id, possibly concurrently,
/// more than once and in any order, and fold results with `merge`.
pub trait BlockComputable: Send + Sync {
    /// Number of blocks in the job
    fn block_count(&self) -> BigUint;

    /// Search one block
    fn compute_block(
        &self,
        block_id: &BlockId,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(BlockProgress),
    ) -> std::result::Result<BlockOutcome, WorkerError>;

    /// Fold a new result list into the running one
    fn merge(&self, old: &TopList, new: &TopList) -> TopList;

    /// The empty running result
    fn empty_result(&self) -> TopList;
}

/// A key search built from a job definition
pub struct KeySearchJob {
    name: String,
    payload: JobPayload,
    chunking: ChunkStrategy,
    context: JobContext,
    partitioner: KeyspacePartitioner,
    tuning: SearchTuning,
}

impl KeySearchJob {
    /// Build a job from a definition, stamping a fresh payload
    pub fn new(definition: &JobDefinition, tuning: SearchTuning) -> Result<Self> {
        let payload = JobPayload::new(definition.to_document()?)?;
        Self::build(definition, payload, tuning)
    }

    /// Rebuild a job on an executing node
    pub fn from_payload(payload: JobPayload, tuning: SearchTuning) -> Result<Self> {
        let definition = JobDefinition::from_document(payload.job_definition())?;
        Self::build(&definition, payload, tuning)
    }

    fn build(definition: &JobDefinition, payload: JobPayload, tuning: SearchTuning) -> Result<Self> {
        let context = definition.build_context()?;
        let partitioner = definition.partitioner(&context)?;
        Ok(Self {
            name: definition.name.clone(),
            payload,
            chunking: definition.chunking,
            context,
            partitioner,
            tuning,
        })
    }

    /// Replace the capabilities of the job, keeping its payload
    pub fn with_context(mut self, context: JobContext) -> Result<Self> {
        self.partitioner =
            KeyspacePartitioner::with_strategy(context.key_space.size(), self.chunking)?;
        self.context = context;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    pub fn context(&self) -> &JobContext {
        &self.context
    }

    pub fn partitioner(&self) -> &KeyspacePartitioner {
        &self.partitioner
    }

    pub fn tuning(&self) -> SearchTuning {
        self.tuning
    }

    /// Key range of a block
    pub fn block_range(&self, block_id: &BlockId) -> std::result::Result<KeyRange, WorkerError> {
        Ok(self.partitioner.block(block_id)?)
    }
}

impl BlockComputable for KeySearchJob {
    fn block_count(&self) -> BigUint {
        self.partitioner.block_count().clone()
    }

    fn compute_block(
        &self,
        block_id: &BlockId,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(BlockProgress),
    ) -> std::result::Result<BlockOutcome, WorkerError> {
        let range = self.block_range(block_id)?;
        BlockWorker::new(&self.context, self.tuning).compute_block(block_id, &range, cancel, progress)
    }

    fn merge(&self, old: &TopList, new: &TopList) -> TopList {
        ResultMerger::merge(old, new)
    }

    fn empty_result(&self) -> TopList {
        TopList::new(self.context.relation())
    }
}

/// Snapshot of a running job
#[derive(Debug, Clone)]
pub struct JobProgress {
    /// Blocks searched to the end
    pub blocks_completed: u64,

    /// Blocks in the job
    pub blocks_total: BigUint,

    /// Keys evaluated, including work lost to cancellation
    pub keys_evaluated: u64,

    /// Cost of the best candidate so far
    pub best_cost: Option<f64>,

    /// Time since the job started
    pub elapsed: Duration,
}

impl JobProgress {
    /// Keys per second
    pub fn keys_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.keys_evaluated as f64 / secs
        } else {
            0.0
        }
    }
}

/// Final outcome of a job
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Job-wide best candidates
    pub best: TopList,

    /// Distinct blocks searched to the end
    pub blocks_completed: u64,

    /// Blocks in the job
    pub blocks_total: BigUint,

    /// Keys evaluated, including work lost to cancellation
    pub keys_evaluated: u64,

    /// Blocks that failed permanently
    pub blocks_failed: u64,

    /// Results delivered for blocks already merged
    pub duplicate_results: u64,

    /// Wall-clock duration
    pub duration: Duration,

    /// Whether every block was searched (vs stopped or failed)
    pub completed: bool,
}

impl JobReport {
    /// Keys per second over the whole job
    pub fn keys_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.keys_evaluated as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CipherKind, CostKind, XorCipher};
    use crate::keyspace::KeyEncoding;
    use num_traits::Zero;

    fn definition() -> JobDefinition {
        JobDefinition {
            name: "unit".into(),
            ciphertext: XorCipher::encrypt(b"hello world", &[0x33]).unwrap(),
            iv: Vec::new(),
            bytes_to_use: 0,
            key_pattern: "[0-9A-F][0-9A-F]".into(),
            key_encoding: KeyEncoding::Hex,
            cipher: CipherKind::Xor,
            cost: CostKind::IndexOfCoincidence,
            chunking: ChunkStrategy::ChunkSize(100),
        }
    }

    #[test]
    fn test_job_from_payload() {
        let job = KeySearchJob::new(&definition(), SearchTuning::default()).unwrap();
        assert_eq!(job.block_count(), BigUint::from(3u32));

        let rebuilt = KeySearchJob::from_payload(job.payload().clone(), SearchTuning::default()).unwrap();
        assert_eq!(rebuilt.name(), "unit");
        assert_eq!(rebuilt.payload(), job.payload());
    }

    #[test]
    fn test_compute_last_block() {
        let job = KeySearchJob::new(&definition(), SearchTuning::default()).unwrap();
        let mut last = None;
        let outcome = job
            .compute_block(&BigUint::from(2u32), &CancelToken::new(), &mut |p| last = Some(p))
            .unwrap();
        assert!(outcome.is_completed());
        assert_eq!(
            last,
            Some(BlockProgress {
                evaluated: 56,
                block_size: 56
            })
        );
    }

    #[test]
    fn test_compute_block_out_of_bounds() {
        let job = KeySearchJob::new(&definition(), SearchTuning::default()).unwrap();
        let err = job
            .compute_block(&BigUint::from(3u32), &CancelToken::new(), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, WorkerError::Range(_)));
    }

    #[test]
    fn test_empty_result() {
        let job = KeySearchJob::new(&definition(), SearchTuning::default()).unwrap();
        assert!(job.empty_result().is_empty());
        assert!(!job.block_count().is_zero());
    }
}
