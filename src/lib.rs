//! keysearcher - Block-Partitioned Brute-Force Key Search
//!
//! Searches a key space for the key that decrypts a ciphertext into the
//! most plausible plaintext. Every candidate key is tried, every plaintext
//! is scored by a cost function, and the ten best keys are kept.
//!
//! # Features
//!
//! - **Block Partitioning**: The key space is cut into contiguous blocks
//!   addressed by arbitrary-precision ids, so spaces far beyond 2^64 keys
//!   can still be scheduled block by block.
//!
//! - **Pluggable Capabilities**: Decryptors, cost functions and key spaces
//!   are traits; the crate ships XOR, index of coincidence, Shannon entropy
//!   and wildcard key patterns.
//!
//! - **Order-Independent Merging**: Per-block top lists merge into the job's
//!   top list the same way regardless of completion order or duplicates.
//!
//! - **Cooperative Cancellation**: Block searches poll a cancel token at a
//!   fixed evaluation interval and report progress as they go.
//!
//! - **Portable Jobs**: A job definition travels as a gzip payload with its
//!   creation time and is verified against a blake3 hash before running.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       JobCoordinator                             │
//! │        hash check · online/offline · stop · best list            │
//! └──────────────┬─────────────────────────────────┬────────────────┘
//!                │ offline                         │ online
//!                ▼                                 ▼
//! ┌──────────────────────────┐    ┌─────────────────────────────────┐
//! │   block loop (caller)    │    │        LocalRuntime              │
//! │                          │    │  feeder ─► Block Queue ─┐        │
//! │                          │    │  (crossbeam bounded,    │        │
//! │                          │    │   retry channel)        ▼        │
//! │                          │    │  ┌────────┐ ┌────────┐ ┌────────┐│
//! │                          │    │  │Worker 1│ │Worker 2│ │Worker N││
//! │                          │    │  └───┬────┘ └───┬────┘ └───┬────┘│
//! └────────────┬─────────────┘    └──────┼──────────┼──────────┼─────┘
//!              │                         └──────────┼──────────┘
//!              ▼                                    ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BlockWorker                               │
//! │   KeyIterator ─► Decryptor ─► CostFunction ─► TopList (10)       │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//!                    ┌──────────────────┐
//!                    │  ResultMerger    │
//!                    │  (job top list)  │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Encrypt a test message with key 0x42
//! keysearcher encrypt 'thequickbrownfoxjumpsoverthelazydog' --key 42
//!
//! # Search all one-byte keys, 16 keys per block
//! keysearcher search <CIPHERTEXT_HEX> --chunk-size 16
//!
//! # Same search on 8 worker threads
//! keysearcher search <CIPHERTEXT_HEX> --online -w 8
//!
//! # Pack the job and run it later
//! keysearcher pack <CIPHERTEXT_HEX> --block-bits 4 -o job.ksp
//! keysearcher run job.ksp -w 8
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod job;
pub mod keyspace;
pub mod progress;
pub mod runtime;
pub mod search;

pub use config::{SearchConfig, SearchTuning};
pub use error::{BlockOutcome, Result, SearchError};
pub use job::{JobCoordinator, JobDefinition, JobPayload, KeySearchJob};
pub use search::{CandidateResult, TopList};
