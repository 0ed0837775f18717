//! Error types for keysearcher
//!
//! This module defines the error hierarchy for the search engine:
//! - Key space partitioning errors
//! - Collaborator (cipher, cost function, key iterator) errors
//! - Job payload codec errors
//! - Configuration and CLI errors
//! - Block worker and runtime errors
//!
//! Cancellation is not an error. A block that stops early reports
//! [`BlockOutcome::Cancelled`] so the scheduler can hand it out again.

use crate::keyspace::BlockId;
use crate::search::BlockResult;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for keysearcher
#[derive(Error, Debug)]
pub enum SearchError {
    /// Partitioning errors
    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    /// Cipher / cost function / key iterator errors
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// Payload encode/decode errors
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Block worker errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Distributed runtime errors
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Key space partitioning errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Chunk size of zero
    #[error("Invalid chunk size {0}: must be at least 1")]
    InvalidChunkSize(u64),

    /// Block-count exponent outside the supported range
    #[error("Invalid block bits {bits}: must be between {min} and {max}")]
    InvalidBlockBits { bits: u32, min: u32, max: u32 },

    /// Derived chunk does not fit into a u64 key counter
    #[error("Chunk of {size} keys is too large for a single block")]
    ChunkTooLarge { size: String },

    /// Requested block id is not in `[0, block_count)`
    #[error("Block {id} out of bounds: job has {count} blocks")]
    OutOfBounds { id: BlockId, count: BlockId },
}

/// Errors raised by the external collaborators of a search
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    /// Decryption failed
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    /// Cost evaluation failed
    #[error("Cost evaluation failed: {0}")]
    Cost(String),

    /// Key pattern could not be parsed
    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Key iterator could not be bound to a range
    #[error("Key range starting at {start} ({len} keys) exceeds key space of {size} keys")]
    RangeOutOfSpace {
        start: BlockId,
        len: u64,
        size: BlockId,
    },

    /// A generated key could not be translated into bytes
    #[error("Key '{key}' cannot be encoded: {reason}")]
    KeyEncoding { key: String, reason: String },
}

/// Job payload codec errors
#[derive(Error, Debug)]
pub enum PayloadError {
    /// No bytes were supplied
    #[error("Invalid argument: payload bytes are empty")]
    InvalidArgument,

    /// Decompressed stream is shorter than the timestamp header
    #[error("Payload truncated: {len} bytes after decompression, at least {min} required")]
    Truncated { len: usize, min: usize },

    /// Compression or decompression failed (corrupt stream)
    #[error("Payload stream error: {0}")]
    Stream(#[from] std::io::Error),

    /// Payload file could not be read or written
    #[error("Cannot access payload file '{path}': {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Job definition exceeds the allowed size
    #[error("Job definition too big: {size} bytes > {max} bytes")]
    TooLarge { size: usize, max: usize },

    /// Job definition document could not be parsed or written
    #[error("Invalid job definition: {0}")]
    Definition(#[from] serde_json::Error),

    /// Timestamp cannot be represented as a date
    #[error("Invalid creation timestamp: {ticks} ticks")]
    InvalidTimestamp { ticks: i64 },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid check interval
    #[error("Invalid {name} interval {value}: must be at least 1")]
    InvalidInterval { name: &'static str, value: u64 },

    /// Ciphertext could not be parsed
    #[error("Invalid hex input '{input}': {reason}")]
    InvalidHex { input: String, reason: String },

    /// Ciphertext is missing or empty
    #[error("Ciphertext is empty")]
    EmptyCiphertext,

    /// Key pattern rejected
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(#[from] CapabilityError),

    /// Chunking parameters rejected
    #[error("Invalid chunking: {0}")]
    InvalidChunking(#[from] PartitionError),

    /// Output path is unusable
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },
}

/// Block worker errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A collaborator failed while searching a block
    #[error("Block {block} failed: {source}")]
    BlockFailed {
        block: BlockId,
        #[source]
        source: CapabilityError,
    },

    /// Block range could not be computed
    #[error("Block range unavailable: {0}")]
    Range(#[from] PartitionError),

    /// Worker thread could not be started
    #[error("Failed to spawn worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },

    /// Worker thread panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },
}

/// Distributed runtime errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// No job with this id has been joined
    #[error("Unknown job {0}")]
    UnknownJob(String),

    /// The job id is already registered
    #[error("Job {0} is already running")]
    DuplicateJob(String),

    /// A job id was bound but no runtime was injected
    #[error("Job {0} is bound but no distributed runtime is attached")]
    NotAttached(String),

    /// Worker threads could not be started
    #[error("Runtime could not start workers: {0}")]
    StartFailed(String),

    /// A delivered result names a block outside the job
    #[error("Block {block} is outside job {job} ({total} blocks)")]
    BlockOutOfRange {
        job: String,
        block: String,
        total: String,
    },
}

/// Result type alias for SearchError
pub type Result<T> = std::result::Result<T, SearchError>;

/// Result type alias for CapabilityError
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

/// Result type alias for PayloadError
pub type PayloadResult<T> = std::result::Result<T, PayloadError>;

/// Represents the outcome of searching a single block
#[derive(Debug, Clone)]
pub enum BlockOutcome {
    /// Every key in the block was evaluated
    Completed(BlockResult),

    /// Cancellation was observed; no partial result is kept
    Cancelled { block_id: BlockId, evaluated: u64 },
}

impl BlockOutcome {
    /// Returns true if the block was searched to the end
    pub fn is_completed(&self) -> bool {
        matches!(self, BlockOutcome::Completed(_))
    }

    /// Returns the block this outcome belongs to
    pub fn block_id(&self) -> &BlockId {
        match self {
            BlockOutcome::Completed(result) => &result.block_id,
            BlockOutcome::Cancelled { block_id, .. } => block_id,
        }
    }

    /// Consumes the outcome, returning the result of a completed block
    pub fn into_result(self) -> Option<BlockResult> {
        match self {
            BlockOutcome::Completed(result) => Some(result),
            BlockOutcome::Cancelled { .. } => None,
        }
    }
}
