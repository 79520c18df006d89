//! Deferred execution and periodic maintenance.
//!
//! Two independent pieces share this module:
//!
//! - **JobQueue + WorkerPool**: a task-and-channel pipeline for long-running
//!   submissions. The HTTP layer enqueues a job and returns its handle; a
//!   worker drives the same orchestration steps as the inline path and the
//!   client polls the outcome.
//! - **Sweeper**: an interval task reaping expired sessions and stranded
//!   `starting` rows.
//!
//! ```text
//!    ┌──────────┐   enqueue    ┌──────────┐   dequeue   ┌──────────┐
//!    │ API/CLI  │ ───────────▶ │ JobQueue │ ──────────▶ │ Worker N │
//!    └──────────┘              └──────────┘             └──────────┘
//!          ▲                        │ outcomes                │
//!          └────────── poll ────────┘◀───────── complete ─────┘
//! ```
//!
//! Both pieces stop on the same broadcast shutdown signal.

pub mod job;
pub mod queue;
pub mod sweeper;
pub mod worker_pool;

pub use job::{JobOutcome, JobStatus, SubmissionJob};
pub use queue::JobQueue;
pub use sweeper::{SweepReport, Sweeper};
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
