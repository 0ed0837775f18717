//! Distributed runtime contract
//!
//! A runtime owns block scheduling, transport and retries. The coordinator
//! hands it a job and later asks for the merged outcome. [`LocalRuntime`]
//! runs jobs on a pool of threads in this process.

pub mod local;
pub mod queue;

pub use local::{LocalRuntime, RuntimeConfig};

use crate::error::RuntimeError;
use crate::job::{BlockComputable, JobId, JobPayload, JobProgress, JobReport};
use std::sync::Arc;

/// Executes jobs block by block on behalf of a coordinator
pub trait DistributedRuntime: Send + Sync {
    /// Start computing `job`
    fn join_job(
        &self,
        job_id: JobId,
        payload: JobPayload,
        job: Arc<dyn BlockComputable>,
    ) -> Result<(), RuntimeError>;

    /// Abandon a job. Blocks in flight are cancelled and not merged.
    fn stop_job(&self, job_id: &JobId) -> Result<(), RuntimeError>;

    /// Current progress of a job
    fn progress(&self, job_id: &JobId) -> Result<JobProgress, RuntimeError>;

    /// True once every block is resolved or the job was stopped
    fn is_finished(&self, job_id: &JobId) -> Result<bool, RuntimeError>;

    /// Wait for the job to wind down and return its outcome
    fn wait_job(&self, job_id: &JobId) -> Result<JobReport, RuntimeError>;
}
