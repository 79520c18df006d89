//! Job definitions for deferred submission execution.
//!
//! Long-running submissions can be posted to the job queue instead of
//! executing inline; a worker then drives the same orchestration steps and
//! stores the outcome under the job handle for out-of-band polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::submission::SubmissionResponse;

/// Default maximum number of execution attempts for a job.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A queued playbook submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionJob {
    /// Unique handle returned to the client.
    pub id: Uuid,
    /// Submitting user.
    pub user_id: String,
    /// Exercise to grade against, when any.
    pub exercise_id: Option<String>,
    /// Submitted playbook text.
    pub code: String,
    /// Hints revealed before this submission.
    pub hints_used: u32,
    /// When this job was enqueued.
    pub created_at: DateTime<Utc>,
    /// Number of times this job has been attempted.
    pub attempts: u32,
    /// Maximum attempts before the job fails permanently.
    pub max_attempts: u32,
}

impl SubmissionJob {
    /// Creates a new job with default retry settings.
    pub fn new(
        user_id: impl Into<String>,
        code: impl Into<String>,
        exercise_id: Option<String>,
        hints_used: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            exercise_id,
            code: code.into(),
            hints_used,
            created_at: Utc::now(),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Increments the attempt counter; call before each execution.
    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Whether the job may be retried after a transient failure.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Final status of a processed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// The submission was executed and a response produced.
    Completed,
    /// The job failed permanently.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Stored outcome of a processed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Job this outcome belongs to.
    pub job_id: Uuid,
    /// Final status.
    pub status: JobStatus,
    /// The submission response, when the job completed.
    pub response: Option<SubmissionResponse>,
    /// Error description, when the job failed.
    pub error: Option<String>,
    /// When processing finished.
    pub completed_at: DateTime<Utc>,
    /// Worker that processed the job.
    pub worker_id: String,
    /// Processing duration in milliseconds.
    pub duration_ms: u64,
}

impl JobOutcome {
    /// Outcome for a completed submission.
    pub fn completed(
        job_id: Uuid,
        worker_id: impl Into<String>,
        response: SubmissionResponse,
        duration_ms: u64,
    ) -> Self {
        Self {
            job_id,
            status: JobStatus::Completed,
            response: Some(response),
            error: None,
            completed_at: Utc::now(),
            worker_id: worker_id.into(),
            duration_ms,
        }
    }

    /// Outcome for a permanently failed job.
    pub fn failed(
        job_id: Uuid,
        worker_id: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            response: None,
            error: Some(error.into()),
            completed_at: Utc::now(),
            worker_id: worker_id.into(),
            duration_ms,
        }
    }

    /// Whether the job completed with a response.
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_new() {
        let job = SubmissionJob::new("alice", "- hosts: all", Some("ex-1".to_string()), 0);

        assert!(!job.id.is_nil());
        assert_eq!(job.user_id, "alice");
        assert_eq!(job.exercise_id.as_deref(), Some("ex-1"));
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert!(job.should_retry());
    }

    #[test]
    fn test_retry_accounting() {
        let mut job = SubmissionJob::new("alice", "code", None, 0).with_max_attempts(2);

        job.increment_attempts();
        assert!(job.should_retry());
        job.increment_attempts();
        assert!(!job.should_retry());
    }

    #[test]
    fn test_job_serialization_roundtrip() {
        let job = SubmissionJob::new("alice", "- hosts: all", None, 1);
        let json = serde_json::to_string(&job).expect("serializes");
        let parsed: SubmissionJob = serde_json::from_str(&json).expect("deserializes");

        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.user_id, job.user_id);
        assert_eq!(parsed.hints_used, 1);
    }

    #[test]
    fn test_outcome_constructors() {
        let job_id = Uuid::new_v4();
        let outcome = JobOutcome::failed(job_id, "worker-1", "boom", 1500);

        assert_eq!(outcome.job_id, job_id);
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!outcome.is_success());
        assert_eq!(outcome.error.as_deref(), Some("boom"));
        assert_eq!(outcome.duration_ms, 1500);
    }

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }
}
