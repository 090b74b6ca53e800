//! Bounded per-model job queue
//!
//! A FIFO with blocking offer/poll semantics built from a plain mutex and two
//! [`Notify`] handles. The mutex is never held across an await point, and the
//! async operations only await *before* any job moves in or out, so a
//! cancelled `poll_batch` or `offer` never loses a job.

use mux_core::Job;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};
use tracing::trace;

/// Bounded FIFO of pending jobs for one model
#[derive(Debug)]
pub struct JobQueue {
    items: Mutex<VecDeque<Job>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl JobQueue {
    /// Create a queue with the given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    fn lock_items(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking enqueue. Hands the job back when the queue is full so the
    /// caller can retry the same envelope.
    pub fn try_offer(&self, job: Job) -> std::result::Result<(), Job> {
        let mut items = self.lock_items();
        if items.len() >= self.capacity {
            return Err(job);
        }
        items.push_back(job);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue, blocking up to `wait` for space. Hands the job back on
    /// timeout.
    pub async fn offer(&self, job: Job, wait: Duration) -> std::result::Result<(), Job> {
        let deadline = Instant::now() + wait;
        let mut job = job;
        loop {
            match self.try_offer(job) {
                Ok(()) => return Ok(()),
                Err(back) => job = back,
            }
            let now = Instant::now();
            if now >= deadline {
                trace!(capacity = self.capacity, "offer timed out on full queue");
                return Err(job);
            }
            // A missed wakeup is tolerated: the loop re-checks on timeout.
            let _ = timeout(deadline - now, self.not_full.notified()).await;
        }
    }

    /// Dequeue a batch, blocking up to `max_delay` for the first job.
    ///
    /// Once one job is available, up to `max_size - 1` additional jobs that
    /// are already queued are drained without further waiting. Returns an
    /// empty batch when the first-job wait times out. Jobs come back in
    /// queue order.
    pub async fn poll_batch(&self, max_size: usize, max_delay: Duration) -> Vec<Job> {
        let deadline = Instant::now() + max_delay;
        loop {
            {
                let mut items = self.lock_items();
                if !items.is_empty() {
                    let take = max_size.max(1).min(items.len());
                    let batch: Vec<Job> = items.drain(..take).collect();
                    drop(items);
                    self.not_full.notify_waiters();
                    return batch;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Vec::new();
            }
            let _ = timeout(deadline - now, self.not_empty.notified()).await;
        }
    }

    /// Current number of pending jobs
    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    /// Check if no jobs are pending
    pub fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    /// Maximum number of pending jobs
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_core::Payload;
    use std::sync::Arc;

    fn job(tag: &str) -> Job {
        let (job, _ticket) = Job::new(Payload::new(tag.as_bytes().to_vec()));
        // The ticket is dropped; completion delivery tolerates that.
        job
    }

    #[tokio::test]
    async fn test_try_offer_respects_capacity() {
        let queue = JobQueue::new(2);
        assert!(queue.try_offer(job("a")).is_ok());
        assert!(queue.try_offer(job("b")).is_ok());
        assert!(queue.try_offer(job("c")).is_err());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_times_out_when_full() {
        let queue = JobQueue::new(1);
        assert!(queue.try_offer(job("a")).is_ok());

        let rejected = queue.offer(job("b"), Duration::from_millis(20)).await;
        assert!(rejected.is_err());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_offer_unblocks_after_poll() {
        let queue = Arc::new(JobQueue::new(1));
        assert!(queue.try_offer(job("a")).is_ok());

        let offeror = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.offer(job("b"), Duration::from_secs(5)).await })
        };

        // Draining the queue frees capacity for the blocked offer.
        let batch = queue.poll_batch(1, Duration::from_millis(100)).await;
        assert_eq!(batch.len(), 1);

        assert!(offeror.await.unwrap().is_ok());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_poll_batch_drains_available_jobs() {
        let queue = JobQueue::new(8);
        for tag in ["a", "b", "c"] {
            assert!(queue.try_offer(job(tag)).is_ok());
        }

        let batch = queue.poll_batch(8, Duration::from_millis(10)).await;
        assert_eq!(batch.len(), 3);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_poll_batch_caps_at_max_size() {
        let queue = JobQueue::new(8);
        for tag in ["a", "b", "c", "d"] {
            assert!(queue.try_offer(job(tag)).is_ok());
        }

        let batch = queue.poll_batch(3, Duration::from_millis(10)).await;
        assert_eq!(batch.len(), 3);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_poll_batch_preserves_fifo_order() {
        let queue = JobQueue::new(4);
        let mut ids = Vec::new();
        for tag in ["a", "b", "c"] {
            let j = job(tag);
            ids.push(j.id);
            assert!(queue.try_offer(j).is_ok());
        }

        let batch = queue.poll_batch(4, Duration::from_millis(10)).await;
        let polled: Vec<_> = batch.iter().map(|j| j.id).collect();
        assert_eq!(polled, ids);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_batch_empty_on_timeout() {
        let queue = JobQueue::new(4);
        let batch = queue.poll_batch(4, Duration::from_millis(50)).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_poll_batch_wakes_on_late_offer() {
        let queue = Arc::new(JobQueue::new(4));

        let poller = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.poll_batch(4, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.try_offer(job("late")).is_ok());

        let batch = poller.await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
