//! In-process job queue for deferred submissions.
//!
//! A task-and-channel design: producers enqueue jobs, workers block on
//! `dequeue` with a timeout, and outcomes are stored under the job handle
//! for clients to poll. FIFO order is preserved.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use super::job::{JobOutcome, SubmissionJob};

/// Shared in-process job queue.
#[derive(Default)]
pub struct JobQueue {
    pending: Mutex<VecDeque<SubmissionJob>>,
    outcomes: Mutex<HashMap<Uuid, JobOutcome>>,
    notify: Notify,
}

impl JobQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a job and wakes one waiting worker.
    pub async fn enqueue(&self, job: SubmissionJob) {
        self.pending.lock().await.push_back(job);
        self.notify.notify_one();
    }

    /// Dequeues the next job, waiting up to `timeout` for one to arrive.
    ///
    /// # Returns
    ///
    /// - `Some(job)` when a job was dequeued
    /// - `None` when the timeout expired with no jobs available
    pub async fn dequeue(&self, timeout: Duration) -> Option<SubmissionJob> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(job) = self.pending.lock().await.pop_front() {
                return Some(job);
            }

            let notified = self.notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // Deadline hit; one last non-blocking look.
                return self.pending.lock().await.pop_front();
            }
        }
    }

    /// Requeues a job at the front for immediate retry.
    pub async fn requeue(&self, job: SubmissionJob) {
        self.pending.lock().await.push_front(job);
        self.notify.notify_one();
    }

    /// Stores the outcome of a processed job.
    pub async fn complete(&self, outcome: JobOutcome) {
        self.outcomes.lock().await.insert(outcome.job_id, outcome);
    }

    /// Retrieves the outcome of a job, if processing has finished.
    ///
    /// Outcomes stay retrievable for the lifetime of the process, so
    /// clients may poll repeatedly.
    pub async fn get_outcome(&self, job_id: Uuid) -> Option<JobOutcome> {
        self.outcomes.lock().await.get(&job_id).cloned()
    }

    /// Number of jobs waiting to be processed.
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether no jobs are waiting.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(user: &str) -> SubmissionJob {
        SubmissionJob::new(user, "- hosts: all", None, 0)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new();
        let first = job("alice");
        let second = job("bob");
        let first_id = first.id;
        let second_id = second.id;

        queue.enqueue(first).await;
        queue.enqueue(second).await;

        let a = queue.dequeue(Duration::from_millis(10)).await.expect("job");
        let b = queue.dequeue(Duration::from_millis(10)).await.expect("job");
        assert_eq!(a.id, first_id);
        assert_eq!(b.id, second_id);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = JobQueue::new();
        let result = queue.dequeue(Duration::from_millis(10)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(JobQueue::new());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(job("alice")).await;

        let dequeued = waiter.await.expect("join").expect("job");
        assert_eq!(dequeued.user_id, "alice");
    }

    #[tokio::test]
    async fn test_requeue_puts_job_first() {
        let queue = JobQueue::new();
        let first = job("alice");
        let retry = job("bob");
        let retry_id = retry.id;

        queue.enqueue(first).await;
        queue.requeue(retry).await;

        let next = queue.dequeue(Duration::from_millis(10)).await.expect("job");
        assert_eq!(next.id, retry_id);
    }

    #[tokio::test]
    async fn test_outcome_polling() {
        let queue = JobQueue::new();
        let job = job("alice");
        let job_id = job.id;

        assert!(queue.get_outcome(job_id).await.is_none());

        queue
            .complete(JobOutcome::failed(job_id, "worker-0", "boom", 10))
            .await;

        let outcome = queue.get_outcome(job_id).await.expect("outcome");
        assert!(!outcome.is_success());
        // Poll again: outcomes are retained.
        assert!(queue.get_outcome(job_id).await.is_some());
    }
}
