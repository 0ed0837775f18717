//! Job coordinator - drives a job to completion
//!
//! The coordinator is responsible for:
//! - Checking the integrity of the job definition before running
//! - Choosing online (distributed runtime) or offline (local loop) execution
//! - Stopping the job on request
//! - Holding the job-wide best list in offline mode
//!
//! ```text
//! Created -> PreExecution -> OnlineRunning  -> Stopped
//!                         \-> OfflineRunning -/
//! ```

use crate::error::{BlockOutcome, Result, RuntimeError};
use crate::job::{
    integrity_hash, BlockComputable, IntegrityHash, JobId, JobProgress, JobReport, KeySearchJob,
};
use crate::runtime::DistributedRuntime;
use crate::search::{CancelToken, TopList};
use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of a coordinated job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    PreExecution,
    OnlineRunning,
    OfflineRunning,
    Stopped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Created => write!(f, "created"),
            JobState::PreExecution => write!(f, "pre-execution"),
            JobState::OnlineRunning => write!(f, "online"),
            JobState::OfflineRunning => write!(f, "offline"),
            JobState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Stops a running job from another thread (signal handlers, UIs)
#[derive(Clone)]
pub struct StopHandle {
    cancel: CancelToken,
    runtime: Option<Arc<dyn DistributedRuntime>>,
    job_id: Option<JobId>,
}

impl StopHandle {
    /// Online: ask the runtime to abandon the job. Offline: cancel the local loop.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let (Some(runtime), Some(job_id)) = (&self.runtime, &self.job_id) {
            if let Err(e) = runtime.stop_job(job_id) {
                warn!(job = %job_id, error = %e, "Runtime refused to stop job");
            }
        }
    }
}

/// Drives a [`KeySearchJob`] through its lifecycle
pub struct JobCoordinator {
    job: Arc<KeySearchJob>,
    runtime: Option<Arc<dyn DistributedRuntime>>,
    job_id: Option<JobId>,
    valid_hash: Option<IntegrityHash>,
    state: Mutex<JobState>,
    cancel: CancelToken,
    best: Mutex<TopList>,
    poll_interval: Duration,
}

impl JobCoordinator {
    /// Create a coordinator. `runtime` is only used once a job id is bound.
    pub fn new(job: KeySearchJob, runtime: Option<Arc<dyn DistributedRuntime>>) -> Self {
        let best = job.empty_result();
        Self {
            job: Arc::new(job),
            runtime,
            job_id: None,
            valid_hash: None,
            state: Mutex::new(JobState::Created),
            cancel: CancelToken::new(),
            best: Mutex::new(best),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Bind a runtime job id, switching the coordinator to online mode
    pub fn bind_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Record the hash the definition is expected to have
    pub fn with_valid_hash(mut self, hash: impl Into<IntegrityHash>) -> Self {
        self.valid_hash = Some(hash.into());
        self
    }

    pub fn job(&self) -> &KeySearchJob {
        &self.job
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub fn is_online(&self) -> bool {
        self.job_id.is_some()
    }

    /// Snapshot of the offline best list
    pub fn best(&self) -> TopList {
        self.best.lock().clone()
    }

    /// Handle for stopping the job from elsewhere
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
            runtime: self.runtime.clone(),
            job_id: self.job_id,
        }
    }

    /// Stop the job
    pub fn stop(&self) {
        info!(state = %self.state(), "Stop requested");
        self.stop_handle().stop();
    }

    /// Recompute the integrity hash and compare it with the recorded one
    ///
    /// Returns true when they match or nothing was recorded. A mismatch is
    /// only reported; the job is left untouched.
    pub fn pre_execution(&self) -> bool {
        *self.state.lock() = JobState::PreExecution;

        let actual = integrity_hash(self.job.payload().job_definition());
        match &self.valid_hash {
            Some(expected) if expected != &actual => {
                warn!(
                    job = self.job.name(),
                    expected = %expected,
                    actual = %actual,
                    "Job definition does not match its recorded hash"
                );
                false
            }
            Some(_) => {
                debug!(job = self.job.name(), hash = %actual, "Job definition hash verified");
                true
            }
            None => {
                debug!(job = self.job.name(), hash = %actual, "No recorded hash to verify");
                true
            }
        }
    }

    /// Run the job to completion or until stopped
    pub fn execute(&self) -> Result<JobReport> {
        self.execute_with_progress(|_| {})
    }

    /// Run the job, reporting progress along the way
    pub fn execute_with_progress<F>(&self, on_progress: F) -> Result<JobReport>
    where
        F: FnMut(&JobProgress),
    {
        if self.state() == JobState::Created {
            self.pre_execution();
        }

        let result = match self.job_id {
            Some(job_id) => self.run_online(job_id, on_progress),
            None => self.run_offline(on_progress),
        };

        *self.state.lock() = JobState::Stopped;
        result
    }

    fn run_online<F>(&self, job_id: JobId, mut on_progress: F) -> Result<JobReport>
    where
        F: FnMut(&JobProgress),
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| RuntimeError::NotAttached(job_id.to_string()))?;

        *self.state.lock() = JobState::OnlineRunning;
        if self.cancel.is_cancelled() {
            info!(job = self.job.name(), id = %job_id, "Stopped before joining runtime");
            return Ok(JobReport {
                best: self.best(),
                blocks_completed: 0,
                blocks_total: self.job.block_count(),
                keys_evaluated: 0,
                blocks_failed: 0,
                duplicate_results: 0,
                duration: Duration::ZERO,
                completed: false,
            });
        }

        info!(
            job = self.job.name(),
            id = %job_id,
            blocks = %self.job.block_count(),
            "Joining job on distributed runtime"
        );

        let computable: Arc<dyn BlockComputable> = self.job.clone();
        runtime.join_job(job_id, self.job.payload().clone(), computable)?;

        // A stop that raced the join never reached the runtime
        let mut stop_forwarded = false;
        while !runtime.is_finished(&job_id)? {
            if self.cancel.is_cancelled() && !stop_forwarded {
                runtime.stop_job(&job_id)?;
                stop_forwarded = true;
                continue;
            }
            on_progress(&runtime.progress(&job_id)?);
            thread::sleep(self.poll_interval);
        }

        let report = runtime.wait_job(&job_id)?;
        *self.best.lock() = report.best.clone();
        on_progress(&JobProgress {
            blocks_completed: report.blocks_completed,
            blocks_total: report.blocks_total.clone(),
            keys_evaluated: report.keys_evaluated,
            best_cost: report.best.best().map(|c| c.cost),
            elapsed: report.duration,
        });
        Ok(report)
    }

    fn run_offline<F>(&self, mut on_progress: F) -> Result<JobReport>
    where
        F: FnMut(&JobProgress),
    {
        *self.state.lock() = JobState::OfflineRunning;

        let job = &self.job;
        let total = job.block_count();
        let start = Instant::now();
        let mut blocks_completed = 0u64;
        let mut keys_evaluated = 0u64;
        let mut completed = true;

        info!(
            job = job.name(),
            blocks = %total,
            chunk = job.partitioner().chunk_size(),
            "Starting offline search"
        );

        let mut block_id = BigUint::zero();
        while block_id < total {
            if self.cancel.is_cancelled() {
                info!(block = %block_id, "Stopped at block boundary");
                completed = false;
                break;
            }

            let best_cost = self.best.lock().best().map(|c| c.cost);
            let mut block_evaluated = 0u64;
            let outcome = job.compute_block(&block_id, &self.cancel, &mut |p| {
                block_evaluated = p.evaluated;
                on_progress(&JobProgress {
                    blocks_completed,
                    blocks_total: total.clone(),
                    keys_evaluated: keys_evaluated + p.evaluated,
                    best_cost,
                    elapsed: start.elapsed(),
                });
            })?;

            match outcome {
                BlockOutcome::Completed(result) => {
                    keys_evaluated += block_evaluated;
                    let mut best = self.best.lock();
                    *best = job.merge(&best, &result.local_results);
                    blocks_completed += 1;
                    debug!(block = %block_id, best = ?best.best().map(|c| c.cost), "Block merged");
                }
                BlockOutcome::Cancelled { evaluated, .. } => {
                    keys_evaluated += evaluated;
                    info!(block = %block_id, evaluated, "Block cancelled, result discarded");
                    completed = false;
                    break;
                }
            }
            block_id += 1u32;
        }

        let duration = start.elapsed();
        let best = self.best();
        info!(
            blocks = blocks_completed,
            keys = keys_evaluated,
            duration_secs = duration.as_secs(),
            completed,
            "Offline search finished"
        );

        Ok(JobReport {
            best,
            blocks_completed,
            blocks_total: total,
            keys_evaluated,
            blocks_failed: 0,
            duplicate_results: 0,
            duration,
            completed,
        })
    }
}
