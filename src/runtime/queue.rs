//! Block queue with backpressure and retries
//!
//! Fresh block ids flow through a bounded channel filled by a feeder
//! thread, so a job with 2^64 blocks never materializes more than
//! `capacity` of them. Blocks that must be searched again go to an
//! unbounded retry channel, which workers drain first.

use crate::keyspace::BlockId;
use crossbeam_channel::{bounded, select, unbounded, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A block waiting to be searched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTask {
    pub block_id: BlockId,

    /// Failed attempts so far
    pub attempt: u32,
}

impl BlockTask {
    pub fn new(block_id: BlockId) -> Self {
        Self {
            block_id,
            attempt: 0,
        }
    }

    /// The same block, one attempt later
    pub fn retry(self) -> Self {
        Self {
            block_id: self.block_id,
            attempt: self.attempt + 1,
        }
    }
}

/// Statistics for the block queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Fresh blocks enqueued
    pub enqueued: AtomicU64,

    /// Blocks handed to workers
    pub dequeued: AtomicU64,

    /// Blocks put back for another attempt
    pub requeued: AtomicU64,

    /// Times the feeder found the queue full
    pub backpressure_events: AtomicU64,
}

impl QueueStats {
    pub fn throughput(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    pub fn requeue_count(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }
}

/// Outcome of a feeder send
#[derive(Debug, PartialEq, Eq)]
pub enum Feed {
    Sent,
    /// Queue stayed full for the whole timeout; the task is handed back
    Full(BlockTask),
    Disconnected,
}

/// Block queue shared by a feeder and a pool of workers
pub struct BlockQueue {
    fresh_tx: Sender<BlockTask>,
    fresh_rx: Receiver<BlockTask>,
    retry_tx: Sender<BlockTask>,
    retry_rx: Receiver<BlockTask>,
    active_workers: Arc<AtomicUsize>,
    stats: Arc<QueueStats>,
}

impl BlockQueue {
    pub fn new(capacity: usize) -> Self {
        let (fresh_tx, fresh_rx) = bounded(capacity.max(1));
        let (retry_tx, retry_rx) = unbounded();
        Self {
            fresh_tx,
            fresh_rx,
            retry_tx,
            retry_rx,
            active_workers: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Handle for the feeder and for workers re-queueing blocks
    pub fn sender(&self) -> BlockQueueSender {
        BlockQueueSender {
            fresh: self.fresh_tx.clone(),
            retry: self.retry_tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Handle for a worker (clone for each worker)
    pub fn receiver(&self) -> BlockQueueReceiver {
        BlockQueueReceiver {
            fresh: self.fresh_rx.clone(),
            retry: self.retry_rx.clone(),
            active_workers: Arc::clone(&self.active_workers),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Blocks waiting in either channel
    pub fn len(&self) -> usize {
        self.fresh_rx.len() + self.retry_rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workers currently searching a block
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }
}

/// Sending side of a [`BlockQueue`]
#[derive(Clone)]
pub struct BlockQueueSender {
    fresh: Sender<BlockTask>,
    retry: Sender<BlockTask>,
    stats: Arc<QueueStats>,
}

impl BlockQueueSender {
    /// Enqueue a fresh block, waiting at most `timeout` for room
    pub fn feed(&self, task: BlockTask, timeout: Duration) -> Feed {
        match self.fresh.send_timeout(task, timeout) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Feed::Sent
            }
            Err(SendTimeoutError::Timeout(task)) => {
                self.stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
                Feed::Full(task)
            }
            Err(SendTimeoutError::Disconnected(_)) => Feed::Disconnected,
        }
    }

    /// Put a block back for another attempt. Never blocks.
    pub fn requeue(&self, task: BlockTask) -> bool {
        let sent = self.retry.send(task).is_ok();
        if sent {
            self.stats.requeued.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }
}

/// Receiving side of a [`BlockQueue`]
#[derive(Clone)]
pub struct BlockQueueReceiver {
    fresh: Receiver<BlockTask>,
    retry: Receiver<BlockTask>,
    active_workers: Arc<AtomicUsize>,
    stats: Arc<QueueStats>,
}

impl BlockQueueReceiver {
    /// Next block to search, preferring retries
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BlockTask> {
        let task = match self.retry.try_recv() {
            Ok(task) => Some(task),
            Err(_) => select! {
                recv(self.retry) -> task => task.ok(),
                recv(self.fresh) -> task => task.ok(),
                default(timeout) => None,
            },
        };
        if task.is_some() {
            self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        task
    }

    fn begin_work(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn end_work(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// RAII guard marking a worker as busy
pub struct WorkGuard<'a> {
    receiver: &'a BlockQueueReceiver,
}

impl<'a> WorkGuard<'a> {
    pub fn new(receiver: &'a BlockQueueReceiver) -> Self {
        receiver.begin_work();
        Self { receiver }
    }
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        self.receiver.end_work();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u32) -> BlockTask {
        BlockTask::new(BlockId::from(id))
    }

    #[test]
    fn test_queue_basic() {
        let queue = BlockQueue::new(4);
        let tx = queue.sender();
        let rx = queue.receiver();

        assert_eq!(tx.feed(task(0), Duration::from_millis(10)), Feed::Sent);
        assert_eq!(queue.len(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Some(task(0)));
        assert!(queue.is_empty());
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_queue_backpressure() {
        let queue = BlockQueue::new(2);
        let tx = queue.sender();
        assert_eq!(tx.feed(task(0), Duration::from_millis(5)), Feed::Sent);
        assert_eq!(tx.feed(task(1), Duration::from_millis(5)), Feed::Sent);
        assert_eq!(tx.feed(task(2), Duration::from_millis(5)), Feed::Full(task(2)));
        assert_eq!(queue.stats().backpressure_events.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_retries_first() {
        let queue = BlockQueue::new(4);
        let tx = queue.sender();
        let rx = queue.receiver();

        tx.feed(task(0), Duration::from_millis(5));
        assert!(tx.requeue(task(7).retry()));

        let first = rx.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(first.block_id, BlockId::from(7u32));
        assert_eq!(first.attempt, 1);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Some(task(0)));
        assert_eq!(queue.stats().requeue_count(), 1);
        assert_eq!(queue.stats().throughput(), 2);
    }

    #[test]
    fn test_work_guard() {
        let queue = BlockQueue::new(1);
        let rx = queue.receiver();
        {
            let _guard = WorkGuard::new(&rx);
            assert_eq!(queue.active_workers(), 1);
        }
        assert_eq!(queue.active_workers(), 0);
    }
}
