//! Submission orchestration: the public entry point of the platform core.
//!
//! One submission flows validate → acquire-or-provision session → execute →
//! grade → record → touch. Pre-execution failures abort without writing an
//! attempt; execution failures (timeout, runtime error) still record one so
//! the user sees their history.

pub mod rate_limit;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::content::ContentStore;
use crate::error::SubmitError;
use crate::grader::{TestReport, TestRunner};
use crate::sandbox::{topology, PlaybookExecutor, TopologyManager};
use crate::storage::{
    AttemptRecorder, DatabaseError, RecordError, Session, SessionRegistry, SessionState,
};
use crate::validator::PlaybookValidator;

pub use rate_limit::RateLimiter;

/// Composite response to one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResponse {
    /// Whether the playbook ran to completion with exit code 0.
    pub success: bool,
    /// Exit code of the run (or a sentinel, see the executor).
    pub exit_code: i64,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock execution time in seconds.
    pub execution_time: f64,
    /// Failure description for pre-execution errors and timeouts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Grading report; absent for ad-hoc runs without an exercise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_results: Option<TestReport>,
    /// Whether every test case passed.
    pub is_passed: bool,
    /// Advisory validator findings.
    pub warnings: Vec<String>,
    /// Position in the user's attempt sequence, when one was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<i32>,
}

/// Orchestrates validation, session management, execution, grading and
/// attempt recording for playbook submissions.
pub struct SubmissionService {
    config: SandboxConfig,
    registry: SessionRegistry,
    recorder: AttemptRecorder,
    topology: Arc<TopologyManager>,
    executor: PlaybookExecutor,
    content: Arc<dyn ContentStore>,
    limiter: RateLimiter,
}

impl SubmissionService {
    /// Creates a new submission service.
    pub fn new(
        config: SandboxConfig,
        registry: SessionRegistry,
        recorder: AttemptRecorder,
        topology: Arc<TopologyManager>,
        executor: PlaybookExecutor,
        content: Arc<dyn ContentStore>,
    ) -> Self {
        let limiter = RateLimiter::per_minute(config.rate_per_minute);
        Self {
            config,
            registry,
            recorder,
            topology,
            executor,
            content,
            limiter,
        }
    }

    /// Submits a playbook for execution, and grading when an exercise is
    /// named.
    ///
    /// # Errors
    ///
    /// Pre-execution failures (`Validation`, `LimitExceeded`, `RateLimited`,
    /// `ExerciseNotFound`, `Provisioning`) abort without an attempt row.
    /// Execution failures do NOT error: they come back as a response with
    /// `success = false` and are recorded.
    pub async fn submit(
        &self,
        user_id: &str,
        code: &str,
        exercise_id: Option<&str>,
        hints_used: u32,
    ) -> Result<SubmissionResponse, SubmitError> {
        if !self.limiter.allow(user_id) {
            return Err(SubmitError::RateLimited {
                limit: self.limiter.limit(),
            });
        }

        let exercise = match exercise_id {
            Some(id) => Some(
                self.content
                    .get_exercise(id)
                    .await?
                    .ok_or_else(|| SubmitError::ExerciseNotFound(id.to_string()))?,
            ),
            None => None,
        };

        let validation = PlaybookValidator::validate(code);
        if !validation.valid {
            return Err(SubmitError::Validation {
                errors: validation.errors,
                warnings: validation.warnings,
            });
        }

        if let Some(exercise) = &exercise {
            self.recorder
                .check_attempt_cap(user_id, exercise)
                .await
                .map_err(map_record_error)?;
        }

        let session = self.acquire_session(user_id).await?;

        let time_limit = exercise
            .as_ref()
            .map(|e| e.time_limit_seconds)
            .unwrap_or(self.config.default_time_limit_secs);
        let execution = self
            .executor
            .execute(&session.topology_name, code, time_limit)
            .await;

        let (test_results, is_passed, attempt_number) = match &exercise {
            Some(exercise) => {
                let report = TestRunner::run_tests(&exercise.test_cases, &execution);
                let attempt = self
                    .recorder
                    .record(user_id, exercise, code, &execution, &report, hints_used)
                    .await
                    .map_err(map_record_error)?;
                let passed = report.passed;
                (Some(report), passed, Some(attempt.attempt_number))
            }
            None => (None, false, None),
        };

        if let Err(e) = self.registry.touch(session.id).await {
            warn!(session_id = %session.id, error = %e, "Failed to touch session");
        }

        Ok(SubmissionResponse {
            success: execution.success,
            exit_code: execution.exit_code,
            stdout: execution.stdout,
            stderr: execution.stderr,
            execution_time: execution.execution_time,
            error: execution.error,
            test_results,
            is_passed,
            warnings: validation.warnings,
            attempt_number,
        })
    }

    /// Returns the user's running session, provisioning one on a miss.
    ///
    /// # Returns
    ///
    /// The session and whether it was freshly created.
    pub async fn create_session(&self, user_id: &str) -> Result<(Session, bool), SubmitError> {
        if let Some(session) = self.registry.find_active(user_id).await? {
            return Ok((session, false));
        }

        let session = self.provision_session(user_id).await?;
        Ok((session, true))
    }

    /// Destroys the user's running session.
    ///
    /// # Returns
    ///
    /// `false` when the user has no running session.
    pub async fn destroy_session(&self, user_id: &str) -> Result<bool, SubmitError> {
        let Some(session) = self.registry.find_running(user_id).await? else {
            return Ok(false);
        };

        self.topology.destroy(&session.topology_name).await;
        self.registry
            .terminate(session.id, SessionState::Stopped)
            .await?;
        info!(user_id, session_id = %session.id, "Destroyed sandbox session");
        Ok(true)
    }

    /// Lists the user's attempts for an exercise, newest first.
    pub async fn list_attempts(
        &self,
        user_id: &str,
        exercise_id: &str,
        limit: i64,
    ) -> Result<Vec<crate::storage::Attempt>, SubmitError> {
        Ok(self
            .recorder
            .list_for_user(user_id, exercise_id, limit)
            .await?)
    }

    /// Reuses the user's active session or provisions a fresh topology.
    async fn acquire_session(&self, user_id: &str) -> Result<Session, SubmitError> {
        if let Some(session) = self.registry.find_active(user_id).await? {
            return Ok(session);
        }
        self.provision_session(user_id).await
    }

    /// Provisions a new topology and promotes its registry row.
    ///
    /// When two callers race for the same user, the loser's promotion hits
    /// the one-running-session unique index; it then tears its own topology
    /// down and adopts the winner's session.
    async fn provision_session(&self, user_id: &str) -> Result<Session, SubmitError> {
        // An expired session still in `running` holds the unique slot until
        // the next sweep; reclaim it now so promotion can succeed.
        if let Some(stale) = self.registry.find_running(user_id).await? {
            if stale.is_expired() {
                self.topology.destroy(&stale.topology_name).await;
                if let Err(e) = self
                    .registry
                    .terminate(stale.id, SessionState::Expired)
                    .await
                {
                    warn!(session_id = %stale.id, error = %e, "Failed to reclaim expired session");
                }
            }
        }

        let tag = session_tag();
        let name = topology::topology_name(user_id, &tag);

        let session = self
            .registry
            .insert_starting(user_id, &name, self.config.session_ttl())
            .await?;

        let provisioned = match self.topology.create(user_id, &tag).await {
            Ok(provisioned) => provisioned,
            Err(e) => {
                if let Err(term) = self.registry.terminate(session.id, SessionState::Error).await {
                    warn!(session_id = %session.id, error = %term, "Failed to mark session as error");
                }
                return Err(SubmitError::Provisioning(e.to_string()));
            }
        };

        match self
            .registry
            .promote(session.id, &provisioned.controller_id)
            .await
        {
            Ok(()) => {
                info!(user_id, session_id = %session.id, topology = %name, "Session running");
                self.registry
                    .find_active(user_id)
                    .await?
                    .ok_or(SubmitError::NoActiveSession)
            }
            Err(DatabaseError::Conflict(_)) => {
                info!(user_id, topology = %name, "Lost provisioning race, adopting winner");
                self.topology.destroy(&name).await;
                if let Err(e) = self.registry.terminate(session.id, SessionState::Error).await {
                    warn!(session_id = %session.id, error = %e, "Failed to mark loser session");
                }
                self.registry
                    .find_active(user_id)
                    .await?
                    .ok_or(SubmitError::NoActiveSession)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Short random tag making topology names unique per session.
fn session_tag() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn map_record_error(err: RecordError) -> SubmitError {
    match err {
        RecordError::LimitExceeded {
            exercise_id,
            max_attempts,
        } => SubmitError::LimitExceeded {
            exercise_id,
            max_attempts,
        },
        RecordError::Database(e) => SubmitError::Storage(e),
    }
}
