//! Worker pool processing deferred submissions from the job queue.
//!
//! Each worker runs as an independent tokio task, pulls jobs from the
//! shared queue and drives the submission service. Shutdown is coordinated
//! through a broadcast channel; workers finish their current job first.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::SubmitError;
use crate::submission::SubmissionService;

use super::job::{JobOutcome, SubmissionJob};
use super::queue::JobQueue;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long a worker blocks on the queue per poll.
    pub poll_interval: Duration,
    /// Maximum time allowed for processing a single job.
    pub job_timeout: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(900),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Total number of jobs completed successfully.
    pub jobs_completed: u64,
    /// Total number of jobs that failed.
    pub jobs_failed: u64,
}

impl PoolStats {
    /// Returns the total number of jobs processed.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
        }
    }
}

/// Pool of workers draining the submission job queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<JobQueue>,
    service: Arc<SubmissionService>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool over a shared queue and service.
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<JobQueue>,
        service: Arc<SubmissionService>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            service,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{i}"),
                queue: Arc::clone(&self.queue),
                service: Arc::clone(&self.service),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                job_timeout: self.config.job_timeout,
                stats: Arc::clone(&self.stats),
            };

            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");
        let _ = self.shutdown_tx.send(());

        let drain = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, drain).await {
            Ok(()) => {
                self.is_running.store(false, Ordering::SeqCst);
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns a reference to the job queue.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}

/// A single worker draining the queue.
struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    service: Arc<SubmissionService>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    job_timeout: Duration,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    /// Main worker loop: poll for jobs until a shutdown signal arrives.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.dequeue(self.poll_interval).await {
                Some(job) => self.process_job(job).await,
                None => debug!(worker_id = %self.id, "No jobs available"),
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Processes a single job, retrying transient failures.
    async fn process_job(&self, mut job: SubmissionJob) {
        let job_id = job.id;
        let start = Instant::now();

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            user_id = %job.user_id,
            attempt = job.attempts + 1,
            "Processing job"
        );

        self.stats.active_workers.fetch_add(1, Ordering::SeqCst);
        job.increment_attempts();

        let submit = self.service.submit(
            &job.user_id,
            &job.code,
            job.exercise_id.as_deref(),
            job.hints_used,
        );
        let result = tokio::time::timeout(self.job_timeout, submit).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        self.stats.active_workers.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(Ok(response)) => {
                self.stats.jobs_completed.fetch_add(1, Ordering::SeqCst);
                self.queue
                    .complete(JobOutcome::completed(job_id, &self.id, response, duration_ms))
                    .await;
            }
            Ok(Err(e)) if is_transient(&e) && job.should_retry() => {
                warn!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    error = %e,
                    "Transient failure, requeueing job"
                );
                self.queue.requeue(job).await;
            }
            Ok(Err(e)) => {
                self.stats.jobs_failed.fetch_add(1, Ordering::SeqCst);
                self.queue
                    .complete(JobOutcome::failed(job_id, &self.id, e.to_string(), duration_ms))
                    .await;
            }
            Err(_) => {
                self.stats.jobs_failed.fetch_add(1, Ordering::SeqCst);
                error!(worker_id = %self.id, job_id = %job_id, "Job processing timed out");
                self.queue
                    .complete(JobOutcome::failed(
                        job_id,
                        &self.id,
                        "Job processing timed out",
                        duration_ms,
                    ))
                    .await;
            }
        }
    }
}

/// Whether a submission error is worth retrying.
///
/// Validation, rate and cap errors are deterministic; provisioning and
/// storage hiccups may clear up.
fn is_transient(err: &SubmitError) -> bool {
    matches!(
        err,
        SubmitError::Provisioning(_) | SubmitError::Storage(_) | SubmitError::Sandbox(_)
    )
}
