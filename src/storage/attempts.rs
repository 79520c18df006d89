//! Immutable attempt records with dense per-(user, exercise) numbering.
//!
//! Attempt numbers form a contiguous 1..N sequence with no gaps even under
//! concurrent submissions from the same user. That is achieved without
//! advisory locks: the writer computes `1 + MAX(attempt_number)` inside a
//! transaction and relies on the unique `(user, exercise, attempt_number)`
//! constraint to reject the loser of a race, which then retries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::content::{Exercise, UserLedger};
use crate::grader::TestReport;
use crate::sandbox::{ExecutionResult, NOT_EXECUTED_EXIT_CODE};

use super::database::{is_unique_violation, DatabaseError};

/// Bounded retries for the numbering race.
const MAX_RECORD_RETRIES: u32 = 3;

/// Errors from the attempt recorder.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The per-exercise attempt cap is already reached.
    #[error("Attempt limit reached for exercise '{exercise_id}' (max {max_attempts})")]
    LimitExceeded {
        exercise_id: String,
        max_attempts: u32,
    },

    /// Database failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// One recorded submission-execution-grading cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Exercise this attempt was graded against.
    pub exercise_id: String,
    /// Submitted playbook text.
    pub code: String,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// The grader's aggregate report, stored verbatim.
    pub test_results: serde_json::Value,
    /// Whether every test case passed.
    pub is_passed: bool,
    /// Wall-clock execution time; null when nothing executed.
    pub execution_time: Option<f64>,
    /// Hints revealed before this attempt.
    pub hints_used: i32,
    /// Position in the user's dense attempt sequence, starting at 1.
    pub attempt_number: i32,
    /// When the attempt was recorded.
    pub created_at: DateTime<Utc>,
}

fn row_to_attempt(row: &PgRow) -> Attempt {
    Attempt {
        id: row.get("id"),
        user_id: row.get("user_id"),
        exercise_id: row.get("exercise_id"),
        code: row.get("code"),
        stdout: row.get("stdout"),
        stderr: row.get("stderr"),
        test_results: row.get("test_results"),
        is_passed: row.get("is_passed"),
        execution_time: row.get("execution_time"),
        hints_used: row.get("hints_used"),
        attempt_number: row.get("attempt_number"),
        created_at: row.get("created_at"),
    }
}

/// Writes immutable attempt rows and drives the points side effect.
#[derive(Clone)]
pub struct AttemptRecorder {
    pool: PgPool,
    ledger: Arc<dyn UserLedger>,
    hint_penalty_points: u32,
}

impl AttemptRecorder {
    /// Creates a new recorder.
    pub fn new(pool: PgPool, ledger: Arc<dyn UserLedger>, hint_penalty_points: u32) -> Self {
        Self {
            pool,
            ledger,
            hint_penalty_points,
        }
    }

    /// Number of attempts recorded for a (user, exercise) pair.
    pub async fn attempt_count(
        &self,
        user_id: &str,
        exercise_id: &str,
    ) -> Result<i64, DatabaseError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM attempts WHERE user_id = $1 AND exercise_id = $2",
        )
        .bind(user_id)
        .bind(exercise_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("count"))
    }

    /// Enforces the exercise attempt cap before any write.
    ///
    /// A cap of 0 means unlimited attempts.
    pub async fn check_attempt_cap(
        &self,
        user_id: &str,
        exercise: &Exercise,
    ) -> Result<(), RecordError> {
        if exercise.max_attempts == 0 {
            return Ok(());
        }

        let count = self.attempt_count(user_id, &exercise.id).await?;
        if count >= i64::from(exercise.max_attempts) {
            return Err(RecordError::LimitExceeded {
                exercise_id: exercise.id.clone(),
                max_attempts: exercise.max_attempts,
            });
        }

        Ok(())
    }

    /// Records an attempt and, on a pass, awards points.
    ///
    /// The attempt cap is re-checked before the insert. The ledger call
    /// happens after commit and is best-effort: its failure is logged and
    /// never unwinds the attempt row.
    pub async fn record(
        &self,
        user_id: &str,
        exercise: &Exercise,
        code: &str,
        execution: &ExecutionResult,
        report: &TestReport,
        hints_used: u32,
    ) -> Result<Attempt, RecordError> {
        self.check_attempt_cap(user_id, exercise).await?;

        let test_results = serde_json::to_value(report).map_err(DatabaseError::from)?;
        let execution_time =
            (execution.exit_code != NOT_EXECUTED_EXIT_CODE).then_some(execution.execution_time);

        let mut last_conflict = None;
        for _ in 0..MAX_RECORD_RETRIES {
            match self
                .try_insert(
                    user_id,
                    &exercise.id,
                    code,
                    execution,
                    &test_results,
                    report.passed,
                    execution_time,
                    hints_used,
                )
                .await
            {
                Ok(attempt) => {
                    info!(
                        user_id,
                        exercise_id = %exercise.id,
                        attempt_number = attempt.attempt_number,
                        is_passed = attempt.is_passed,
                        "Recorded attempt"
                    );
                    if report.passed {
                        self.award(user_id, exercise, hints_used).await;
                    }
                    return Ok(attempt);
                }
                Err(e) if is_unique_violation(&e) => {
                    last_conflict = Some(e);
                    continue;
                }
                Err(e) => return Err(RecordError::Database(e.into())),
            }
        }

        Err(RecordError::Database(DatabaseError::Conflict(format!(
            "attempt numbering contention for user '{user_id}' on '{}': {}",
            exercise.id,
            last_conflict.map(|e| e.to_string()).unwrap_or_default()
        ))))
    }

    /// One transactional insert with a freshly computed attempt number.
    #[allow(clippy::too_many_arguments)]
    async fn try_insert(
        &self,
        user_id: &str,
        exercise_id: &str,
        code: &str,
        execution: &ExecutionResult,
        test_results: &serde_json::Value,
        is_passed: bool,
        execution_time: Option<f64>,
        hints_used: u32,
    ) -> Result<Attempt, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT COALESCE(MAX(attempt_number), 0) AS current \
             FROM attempts WHERE user_id = $1 AND exercise_id = $2",
        )
        .bind(user_id)
        .bind(exercise_id)
        .fetch_one(&mut *tx)
        .await?;
        let attempt_number: i32 = row.get::<i32, _>("current") + 1;

        let attempt = Attempt {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            exercise_id: exercise_id.to_string(),
            code: code.to_string(),
            stdout: execution.stdout.clone(),
            stderr: execution.stderr.clone(),
            test_results: test_results.clone(),
            is_passed,
            execution_time,
            hints_used: hints_used as i32,
            attempt_number,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO attempts (
                id, user_id, exercise_id, code, stdout, stderr,
                test_results, is_passed, execution_time, hints_used,
                attempt_number, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(attempt.id)
        .bind(&attempt.user_id)
        .bind(&attempt.exercise_id)
        .bind(&attempt.code)
        .bind(&attempt.stdout)
        .bind(&attempt.stderr)
        .bind(&attempt.test_results)
        .bind(attempt.is_passed)
        .bind(attempt.execution_time)
        .bind(attempt.hints_used)
        .bind(attempt.attempt_number)
        .bind(attempt.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(attempt)
    }

    /// Awards points for a passing attempt, clamped at zero after hint
    /// penalties.
    ///
    /// Hints carry their own penalty; the flat configured penalty covers
    /// exercises that define none.
    async fn award(&self, user_id: &str, exercise: &Exercise, hints_used: u32) {
        let penalty: u32 = if exercise.hints.is_empty() {
            hints_used.saturating_mul(self.hint_penalty_points)
        } else {
            exercise
                .hints
                .iter()
                .take(hints_used as usize)
                .map(|hint| hint.penalty_points)
                .sum()
        };
        let points = exercise.points.saturating_sub(penalty);

        if let Err(e) = self.ledger.award_points(user_id, points).await {
            warn!(
                user_id,
                exercise_id = %exercise.id,
                points,
                error = %e,
                "Failed to award points"
            );
        }
    }

    /// Lists a user's attempts for an exercise, newest first.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        exercise_id: &str,
        limit: i64,
    ) -> Result<Vec<Attempt>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT id, user_id, exercise_id, code, stdout, stderr, test_results, \
                    is_passed, execution_time, hints_used, attempt_number, created_at \
             FROM attempts \
             WHERE user_id = $1 AND exercise_id = $2 \
             ORDER BY created_at DESC \
             LIMIT $3",
        )
        .bind(user_id)
        .bind(exercise_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_attempt).collect())
    }

    /// Points deducted per revealed hint.
    pub fn hint_penalty_points(&self) -> u32 {
        self.hint_penalty_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_display() {
        let err = RecordError::LimitExceeded {
            exercise_id: "ex-1".to_string(),
            max_attempts: 3,
        };
        assert!(err.to_string().contains("ex-1"));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_attempt_serialization() {
        let attempt = Attempt {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            exercise_id: "ex-1".to_string(),
            code: "- hosts: all".to_string(),
            stdout: "PLAY RECAP".to_string(),
            stderr: String::new(),
            test_results: serde_json::json!({"passed": true}),
            is_passed: true,
            execution_time: Some(1.25),
            hints_used: 1,
            attempt_number: 2,
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&attempt).expect("serializes");
        assert_eq!(json["attempt_number"], 2);
        assert_eq!(json["is_passed"], true);
        assert_eq!(json["test_results"]["passed"], true);
    }

    #[test]
    fn test_hint_penalty_clamps_at_zero() {
        // The award math mirrors `AttemptRecorder::award`.
        let points: u32 = 10;
        let penalty = 6u32.saturating_mul(2);
        assert_eq!(points.saturating_sub(penalty), 0);

        let penalty = 2u32.saturating_mul(2);
        assert_eq!(points.saturating_sub(penalty), 6);
    }
}
