//! In-process distributed runtime
//!
//! Each joined job gets:
//! - a feeder thread handing out block ids in order from a cursor
//! - a pool of worker threads pulling blocks from a [`BlockQueue`]
//! - a ledger of completed blocks, so a block delivered twice is counted
//!   as a duplicate and merged idempotently
//!
//! Failed or cancelled blocks go back on the queue until they exhaust
//! `max_retries`, after which they are recorded as failed.

use crate::error::{BlockOutcome, RuntimeError, WorkerError};
use crate::job::{BlockComputable, JobId, JobPayload, JobProgress, JobReport};
use crate::keyspace::BlockId;
use crate::runtime::queue::{BlockQueue, BlockQueueReceiver, BlockQueueSender, BlockTask, Feed, WorkGuard};
use crate::runtime::DistributedRuntime;
use crate::search::{BlockResult, CancelToken, TopList};
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Maximum reasonable worker count
pub const MAX_WORKERS: usize = 512;

/// Queued fresh blocks per worker
const QUEUE_DEPTH_PER_WORKER: usize = 4;

/// How long idle threads wait before re-checking for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Local runtime settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Worker threads per job
    pub workers: usize,

    /// Attempts a block may fail before it is given up
    pub max_retries: u32,

    /// Capacity of the fresh-block queue
    pub queue_capacity: usize,
}

impl RuntimeConfig {
    pub fn with_workers(workers: usize) -> Self {
        let workers = workers.clamp(1, MAX_WORKERS);
        Self {
            workers,
            queue_capacity: workers * QUEUE_DEPTH_PER_WORKER,
            ..Self::default()
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let workers = num_cpus::get().clamp(1, MAX_WORKERS);
        Self {
            workers,
            max_retries: 3,
            queue_capacity: workers * QUEUE_DEPTH_PER_WORKER,
        }
    }
}

/// Statistics collected by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Blocks searched to the end
    pub blocks_searched: AtomicU64,

    /// Blocks abandoned because of cancellation
    pub blocks_cancelled: AtomicU64,

    /// Block attempts that failed
    pub failures: AtomicU64,

    /// Keys evaluated
    pub keys_evaluated: AtomicU64,
}

impl WorkerStats {
    fn record_searched(&self) {
        self.blocks_searched.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cancelled(&self) {
        self.blocks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_keys(&self, count: u64) {
        self.keys_evaluated.fetch_add(count, Ordering::Relaxed);
    }
}

/// Job-wide counters
#[derive(Debug, Default)]
struct RunStats {
    blocks_completed: AtomicU64,
    blocks_failed: AtomicU64,
    duplicates: AtomicU64,
    keys_evaluated: AtomicU64,
}

/// State shared by the feeder, the workers and the runtime
struct JobShared {
    id: JobId,
    job: Arc<dyn BlockComputable>,
    total: BigUint,
    cancel: CancelToken,
    best: Mutex<TopList>,
    ledger: Mutex<HashSet<BlockId>>,
    stats: RunStats,
    max_retries: u32,
    started: Instant,
}

impl JobShared {
    fn new(id: JobId, job: Arc<dyn BlockComputable>, max_retries: u32) -> Self {
        Self {
            id,
            total: job.block_count(),
            best: Mutex::new(job.empty_result()),
            job,
            cancel: CancelToken::new(),
            ledger: Mutex::new(HashSet::new()),
            stats: RunStats::default(),
            max_retries,
            started: Instant::now(),
        }
    }

    /// Blocks that are either completed or given up
    fn resolved(&self) -> u64 {
        self.stats.blocks_completed.load(Ordering::SeqCst)
            + self.stats.blocks_failed.load(Ordering::SeqCst)
    }

    fn is_done(&self) -> bool {
        BigUint::from(self.resolved()) >= self.total
    }

    fn is_finished(&self) -> bool {
        self.is_done() || self.cancel.is_cancelled()
    }

    /// Merge a block result. Returns false if the block was already merged.
    fn deliver(&self, result: &BlockResult) -> Result<bool, RuntimeError> {
        if result.block_id >= self.total {
            return Err(RuntimeError::BlockOutOfRange {
                job: self.id.to_string(),
                block: result.block_id.to_string(),
                total: self.total.to_string(),
            });
        }
        let first = self.ledger.lock().insert(result.block_id.clone());
        {
            let mut best = self.best.lock();
            *best = self.job.merge(&best, &result.local_results);
        }
        if first {
            self.stats.blocks_completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(job = %self.id, block = %result.block_id, "Duplicate block result");
        }
        Ok(first)
    }

    fn record_failed(&self, block_id: &BlockId) {
        let newly_failed = !self.ledger.lock().contains(block_id);
        if newly_failed {
            self.stats.blocks_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn progress(&self) -> JobProgress {
        JobProgress {
            blocks_completed: self.stats.blocks_completed.load(Ordering::Relaxed),
            blocks_total: self.total.clone(),
            keys_evaluated: self.stats.keys_evaluated.load(Ordering::Relaxed),
            best_cost: self.best.lock().best().map(|c| c.cost),
            elapsed: self.started.elapsed(),
        }
    }

    fn report(&self) -> JobReport {
        let blocks_failed = self.stats.blocks_failed.load(Ordering::SeqCst);
        JobReport {
            best: self.best.lock().clone(),
            blocks_completed: self.stats.blocks_completed.load(Ordering::SeqCst),
            blocks_total: self.total.clone(),
            keys_evaluated: self.stats.keys_evaluated.load(Ordering::Relaxed),
            blocks_failed,
            duplicate_results: self.stats.duplicates.load(Ordering::Relaxed),
            duration: self.started.elapsed(),
            completed: self.is_done() && blocks_failed == 0,
        }
    }
}

/// A worker thread searching blocks of one job
struct Worker {
    id: usize,
    handle: Option<JoinHandle<Result<(), WorkerError>>>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    fn spawn(
        id: usize,
        shared: Arc<JobShared>,
        queue_rx: BlockQueueReceiver,
        queue_tx: BlockQueueSender,
    ) -> Result<Self, WorkerError> {
        let stats = Arc::new(WorkerStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("searcher-{}", id))
            .spawn(move || worker_loop(id, shared, queue_rx, queue_tx, stats_clone))
            .map_err(|e| WorkerError::SpawnFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    fn join(mut self) -> Result<(), WorkerError> {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Panicked {
                    id: self.id,
                    message: "Worker thread panicked".into(),
                }),
            }
        } else {
            Ok(())
        }
    }
}

fn worker_loop(
    id: usize,
    shared: Arc<JobShared>,
    queue_rx: BlockQueueReceiver,
    queue_tx: BlockQueueSender,
    stats: Arc<WorkerStats>,
) -> Result<(), WorkerError> {
    debug!(worker = id, job = %shared.id, "Worker starting");

    while !shared.is_finished() {
        let task = match queue_rx.recv_timeout(POLL_INTERVAL) {
            Some(task) => task,
            None => continue,
        };

        let _guard = WorkGuard::new(&queue_rx);
        search_block(id, &shared, &queue_tx, &stats, task);
    }

    debug!(
        worker = id,
        blocks = stats.blocks_searched.load(Ordering::Relaxed),
        keys = stats.keys_evaluated.load(Ordering::Relaxed),
        "Worker finished"
    );
    Ok(())
}

fn search_block(
    id: usize,
    shared: &JobShared,
    queue_tx: &BlockQueueSender,
    stats: &WorkerStats,
    task: BlockTask,
) {
    let mut counted = 0u64;
    let mut count_keys = |evaluated: u64| {
        let delta = evaluated.saturating_sub(counted);
        counted = evaluated.max(counted);
        stats.record_keys(delta);
        shared.stats.keys_evaluated.fetch_add(delta, Ordering::Relaxed);
    };

    let outcome = shared
        .job
        .compute_block(&task.block_id, &shared.cancel, &mut |p| count_keys(p.evaluated));

    match outcome {
        Ok(BlockOutcome::Completed(result)) => {
            stats.record_searched();
            match shared.deliver(&result) {
                Ok(_) => trace!(worker = id, block = %task.block_id, "Block completed"),
                Err(e) => warn!(worker = id, error = %e, "Block result discarded"),
            }
        }
        Ok(BlockOutcome::Cancelled { evaluated, .. }) => {
            count_keys(evaluated);
            stats.record_cancelled();
            if !shared.cancel.is_cancelled() {
                retry_or_fail(shared, queue_tx, task, "cancelled");
            }
        }
        Err(e) => {
            stats.record_failure();
            warn!(worker = id, block = %task.block_id, attempt = task.attempt, error = %e, "Block failed");
            retry_or_fail(shared, queue_tx, task, "failed");
        }
    }
}

fn retry_or_fail(shared: &JobShared, queue_tx: &BlockQueueSender, task: BlockTask, why: &str) {
    if task.attempt < shared.max_retries && queue_tx.requeue(task.clone().retry()) {
        debug!(block = %task.block_id, attempt = task.attempt + 1, reason = why, "Block re-queued");
        return;
    }
    error!(
        job = %shared.id,
        block = %task.block_id,
        attempts = task.attempt + 1,
        "Block given up"
    );
    shared.record_failed(&task.block_id);
}

fn feeder_loop(shared: Arc<JobShared>, queue_tx: BlockQueueSender) {
    let mut next = BigUint::zero();
    let mut pending: Option<BlockTask> = None;

    while !shared.cancel.is_cancelled() {
        let task = match pending.take() {
            Some(task) => task,
            None if next < shared.total => {
                let task = BlockTask::new(next.clone());
                next += 1u32;
                task
            }
            None => break,
        };
        match queue_tx.feed(task, POLL_INTERVAL) {
            Feed::Sent => {}
            Feed::Full(task) => pending = Some(task),
            Feed::Disconnected => break,
        }
    }
    debug!(job = %shared.id, fed = %next, "Feeder finished");
}

/// One joined job
struct JobRun {
    shared: Arc<JobShared>,
    payload: JobPayload,
    queue: BlockQueue,
    feeder: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<Worker>>,
}

impl JobRun {
    /// Join the feeder and all workers
    fn join(&self) {
        if let Some(feeder) = self.feeder.lock().take() {
            if feeder.join().is_err() {
                warn!(job = %self.shared.id, "Feeder thread panicked");
            }
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        let mut searched = 0u64;
        for worker in workers {
            searched += worker.stats.blocks_searched.load(Ordering::Relaxed);
            if let Err(e) = worker.join() {
                warn!(error = %e, "Worker failed to join cleanly");
            }
        }
        debug!(
            job = %self.shared.id,
            searched,
            requeued = self.queue.stats().requeue_count(),
            "Job threads joined"
        );
    }
}

/// Runs jobs on local worker threads
pub struct LocalRuntime {
    config: RuntimeConfig,
    jobs: Mutex<HashMap<JobId, Arc<JobRun>>>,
}

impl LocalRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn run(&self, job_id: &JobId) -> Result<Arc<JobRun>, RuntimeError> {
        self.jobs
            .lock()
            .get(job_id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownJob(job_id.to_string()))
    }

    /// When the payload of a job was created
    pub fn job_created_at(&self, job_id: &JobId) -> Result<Option<DateTime<Utc>>, RuntimeError> {
        Ok(self.run(job_id)?.payload.created_at().ok())
    }

    /// Deliver a block result computed elsewhere (e.g. by a remote peer)
    ///
    /// Returns false if the block had already been merged. Results for
    /// block ids outside the job are rejected without touching the ledger.
    pub fn submit_result(&self, job_id: &JobId, result: &BlockResult) -> Result<bool, RuntimeError> {
        self.run(job_id)?.shared.deliver(result)
    }

    fn spawn_threads(&self, run: &JobRun) -> Result<(), RuntimeError> {
        let shared = Arc::clone(&run.shared);
        let tx = run.queue.sender();
        let feeder = thread::Builder::new()
            .name("block-feeder".into())
            .spawn(move || feeder_loop(shared, tx))
            .map_err(|e| RuntimeError::StartFailed(e.to_string()))?;
        *run.feeder.lock() = Some(feeder);

        let mut workers = run.workers.lock();
        for id in 0..self.config.workers {
            match Worker::spawn(id, Arc::clone(&run.shared), run.queue.receiver(), run.queue.sender()) {
                Ok(worker) => workers.push(worker),
                Err(e) => warn!(worker = id, error = %e, "Failed to spawn worker"),
            }
        }
        if workers.is_empty() {
            run.shared.cancel.cancel();
            return Err(RuntimeError::StartFailed("no worker thread could be spawned".into()));
        }

        info!(count = workers.len(), job = %run.shared.id, "Workers spawned");
        Ok(())
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl DistributedRuntime for LocalRuntime {
    fn join_job(
        &self,
        job_id: JobId,
        payload: JobPayload,
        job: Arc<dyn BlockComputable>,
    ) -> Result<(), RuntimeError> {
        let run = {
            let mut jobs = self.jobs.lock();
            if jobs.contains_key(&job_id) {
                return Err(RuntimeError::DuplicateJob(job_id.to_string()));
            }
            let run = Arc::new(JobRun {
                shared: Arc::new(JobShared::new(job_id, job, self.config.max_retries)),
                payload,
                queue: BlockQueue::new(self.config.queue_capacity),
                feeder: Mutex::new(None),
                workers: Mutex::new(Vec::new()),
            });
            jobs.insert(job_id, Arc::clone(&run));
            run
        };

        info!(
            job = %job_id,
            blocks = %run.shared.total,
            created = ?run.payload.created_at().ok(),
            "Job joined"
        );

        if let Err(e) = self.spawn_threads(&run) {
            run.join();
            self.jobs.lock().remove(&job_id);
            return Err(e);
        }
        Ok(())
    }

    fn stop_job(&self, job_id: &JobId) -> Result<(), RuntimeError> {
        let run = self.run(job_id)?;
        info!(job = %job_id, "Stopping job");
        run.shared.cancel.cancel();
        Ok(())
    }

    fn progress(&self, job_id: &JobId) -> Result<JobProgress, RuntimeError> {
        Ok(self.run(job_id)?.shared.progress())
    }

    fn is_finished(&self, job_id: &JobId) -> Result<bool, RuntimeError> {
        Ok(self.run(job_id)?.shared.is_finished())
    }

    fn wait_job(&self, job_id: &JobId) -> Result<JobReport, RuntimeError> {
        let run = self.run(job_id)?;
        while !run.shared.is_finished() {
            thread::sleep(POLL_INTERVAL);
        }
        // Lets workers observe completion and exit
        run.shared.cancel.cancel();
        run.join();
        self.jobs.lock().remove(job_id);

        let report = run.shared.report();
        info!(
            job = %job_id,
            blocks = report.blocks_completed,
            failed = report.blocks_failed,
            duplicates = report.duplicate_results,
            keys = report.keys_evaluated,
            duration_secs = report.duration.as_secs(),
            "Job finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::RelationOperator;
    use crate::search::{BlockProgress, ResultMerger};
    use num_traits::ToPrimitive;
    use std::sync::atomic::AtomicU32;

    /// Block `n` yields one candidate with cost `n`; block 3 fails `failures` times
    struct CountingJob {
        blocks: u32,
        failures: AtomicU32,
    }

    impl BlockComputable for CountingJob {
        fn block_count(&self) -> BigUint {
            BigUint::from(self.blocks)
        }

        fn compute_block(
            &self,
            block_id: &BlockId,
            _cancel: &CancelToken,
            progress: &mut dyn FnMut(BlockProgress),
        ) -> Result<BlockOutcome, WorkerError> {
            let n = block_id.to_u32().unwrap_or(0);
            if n == 3 && self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(WorkerError::SpawnFailed {
                    id: 0,
                    reason: "flaky".into(),
                });
            }
            progress(BlockProgress {
                evaluated: 5,
                block_size: 5,
            });
            let mut list = self.empty_result();
            list.offer(f64::from(n), &n.to_le_bytes(), Vec::new());
            Ok(BlockOutcome::Completed(BlockResult {
                block_id: block_id.clone(),
                local_results: list,
            }))
        }

        fn merge(&self, old: &TopList, new: &TopList) -> TopList {
            ResultMerger::merge(old, new)
        }

        fn empty_result(&self) -> TopList {
            TopList::new(RelationOperator::Maximize)
        }
    }

    fn payload() -> JobPayload {
        JobPayload::with_ticks(b"{}".to_vec(), 0).unwrap()
    }

    fn runtime() -> LocalRuntime {
        LocalRuntime::new(RuntimeConfig {
            workers: 3,
            max_retries: 2,
            queue_capacity: 2,
        })
    }

    #[test]
    fn test_runs_all_blocks() {
        let rt = runtime();
        let id = JobId::new_v4();
        let job = Arc::new(CountingJob {
            blocks: 25,
            failures: AtomicU32::new(0),
        });
        rt.join_job(id, payload(), job).unwrap();
        let report = rt.wait_job(&id).unwrap();

        assert!(report.completed);
        assert_eq!(report.blocks_completed, 25);
        assert_eq!(report.keys_evaluated, 125);
        assert_eq!(report.best.len(), 10);
        assert_eq!(report.best.best().unwrap().cost, 24.0);
        assert!(matches!(rt.progress(&id), Err(RuntimeError::UnknownJob(_))));
    }

    #[test]
    fn test_failed_block_retried() {
        let rt = runtime();
        let id = JobId::new_v4();
        let job = Arc::new(CountingJob {
            blocks: 5,
            failures: AtomicU32::new(2),
        });
        rt.join_job(id, payload(), job).unwrap();
        let report = rt.wait_job(&id).unwrap();
        assert!(report.completed);
        assert_eq!(report.blocks_completed, 5);
        assert_eq!(report.blocks_failed, 0);
    }

    #[test]
    fn test_block_given_up_after_retries() {
        let rt = runtime();
        let id = JobId::new_v4();
        let job = Arc::new(CountingJob {
            blocks: 5,
            failures: AtomicU32::new(100),
        });
        rt.join_job(id, payload(), job).unwrap();
        let report = rt.wait_job(&id).unwrap();
        assert!(!report.completed);
        assert_eq!(report.blocks_completed, 4);
        assert_eq!(report.blocks_failed, 1);
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let rt = runtime();
        let id = JobId::new_v4();
        let job = Arc::new(CountingJob {
            blocks: 2,
            failures: AtomicU32::new(0),
        });
        rt.join_job(id, payload(), job.clone()).unwrap();
        assert_eq!(
            rt.join_job(id, payload(), job),
            Err(RuntimeError::DuplicateJob(id.to_string()))
        );
        rt.wait_job(&id).unwrap();
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let job: Arc<dyn BlockComputable> = Arc::new(CountingJob {
            blocks: 4,
            failures: AtomicU32::new(0),
        });
        let shared = JobShared::new(JobId::new_v4(), Arc::clone(&job), 0);

        let outcome = job
            .compute_block(&BigUint::from(2u32), &CancelToken::new(), &mut |_| {})
            .unwrap();
        let result = outcome.into_result().unwrap();

        assert!(shared.deliver(&result).unwrap());
        let once = shared.best.lock().clone();
        assert!(!shared.deliver(&result).unwrap());
        assert_eq!(*shared.best.lock(), once);

        let report = shared.report();
        assert_eq!(report.blocks_completed, 1);
        assert_eq!(report.duplicate_results, 1);
    }

    #[test]
    fn test_out_of_range_block_rejected() {
        let job: Arc<dyn BlockComputable> = Arc::new(CountingJob {
            blocks: 4,
            failures: AtomicU32::new(0),
        });
        let shared = JobShared::new(JobId::new_v4(), Arc::clone(&job), 0);

        let mut list = job.empty_result();
        list.offer(99.0, b"stray", Vec::new());
        for block in [4u32, 1000] {
            let result = BlockResult {
                block_id: BigUint::from(block),
                local_results: list.clone(),
            };
            assert!(matches!(
                shared.deliver(&result),
                Err(RuntimeError::BlockOutOfRange { .. })
            ));
        }

        let report = shared.report();
        assert_eq!(report.blocks_completed, 0);
        assert!(report.best.is_empty());
        assert!(!shared.is_done());
        assert!(shared.ledger.lock().is_empty());
    }

    #[test]
    fn test_unknown_job() {
        let rt = runtime();
        let id = JobId::new_v4();
        assert!(matches!(rt.stop_job(&id), Err(RuntimeError::UnknownJob(_))));
        assert!(matches!(rt.wait_job(&id), Err(RuntimeError::UnknownJob(_))));
    }

    #[test]
    fn test_payload_time_kept() {
        let rt = runtime();
        let id = JobId::new_v4();
        let job = Arc::new(CountingJob {
            blocks: 1,
            failures: AtomicU32::new(0),
        });
        let payload = JobPayload::new(b"{}".to_vec()).unwrap();
        let created = payload.created_at().unwrap();
        rt.join_job(id, payload, job).unwrap();
        assert_eq!(rt.job_created_at(&id).unwrap(), Some(created));
        rt.wait_job(&id).unwrap();
    }
}
