//! Playbook execution inside a live topology.
//!
//! The executor never returns an error: every failure mode folds into an
//! `ExecutionResult` with `success = false` so graders and attempt records
//! always have a uniform shape to work from.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::sandbox::docker_client::{DockerClient, ExecOutcome};
use crate::sandbox::topology::ANSIBLE_DIR;

/// Exit code recorded when no execution occurred at all.
pub const NOT_EXECUTED_EXIT_CODE: i64 = -1;

/// Exit code recorded when the deadline killed the run.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// File name the submitted playbook is written to inside the controller.
const PLAYBOOK_FILE: &str = "playbook.yml";

/// Outcome of one playbook run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the playbook ran to completion with exit code 0.
    pub success: bool,
    /// Exit code of ansible-playbook, or a sentinel (-1 not executed,
    /// 124 timed out).
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
}

impl ExecutionResult {
    /// Result for a run that completed (with any exit code).
    pub fn completed(exit_code: i64, stdout: String, stderr: String, elapsed: f64) -> Self {
        Self {
            success: exit_code == 0,
            exit_code,
            stdout,
            stderr,
            execution_time: elapsed,
            error: None,
        }
    }

    /// Result for a run killed on deadline; collected output is preserved.
    pub fn timed_out(stdout: String, stderr: String, elapsed: f64, limit_secs: u64) -> Self {
        Self {
            success: false,
            exit_code: TIMEOUT_EXIT_CODE,
            stdout,
            stderr,
            execution_time: elapsed,
            error: Some(format!("Execution timed out after {limit_secs} seconds")),
        }
    }

    /// Result for a failure before any execution happened.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: NOT_EXECUTED_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            execution_time: 0.0,
            error: Some(error.into()),
        }
    }
}

/// Runs submitted playbooks inside the controller of a topology.
pub struct PlaybookExecutor {
    docker: Arc<DockerClient>,
}

impl PlaybookExecutor {
    /// Creates a new executor.
    pub fn new(docker: Arc<DockerClient>) -> Self {
        Self { docker }
    }

    /// Executes a playbook against the inventory of the given topology.
    ///
    /// Writes the playbook into the controller over a tar upload, runs
    /// `ansible-playbook` with demuxed capture under a wall-clock deadline,
    /// and reports wall time, exit code and both output streams.
    pub async fn execute(
        &self,
        topology_name: &str,
        playbook: &str,
        timeout_secs: u64,
    ) -> ExecutionResult {
        let controller_id = match self.docker.container_id_by_name(topology_name).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(topology = %topology_name, "Controller container missing");
                return ExecutionResult::failed("Container not found");
            }
            Err(e) => return ExecutionResult::failed(e.to_string()),
        };

        if let Err(e) = self
            .docker
            .upload_file(
                &controller_id,
                ANSIBLE_DIR,
                PLAYBOOK_FILE,
                playbook.as_bytes(),
            )
            .await
        {
            return ExecutionResult::failed(format!("Failed to write playbook: {e}"));
        }

        let playbook_path = format!("{ANSIBLE_DIR}/{PLAYBOOK_FILE}");
        let inventory_path = format!("{ANSIBLE_DIR}/inventory.ini");
        let cmd = [
            "ansible-playbook",
            "-i",
            inventory_path.as_str(),
            playbook_path.as_str(),
            "-v",
        ];

        let start = Instant::now();
        let outcome = self
            .docker
            .exec_with_deadline(&controller_id, &cmd, Some(Duration::from_secs(timeout_secs)))
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(ExecOutcome::Completed(result)) => {
                debug!(
                    topology = %topology_name,
                    exit_code = result.exit_code,
                    elapsed,
                    "Playbook run completed"
                );
                ExecutionResult::completed(result.exit_code, result.stdout, result.stderr, elapsed)
            }
            Ok(ExecOutcome::TimedOut { stdout, stderr }) => {
                warn!(topology = %topology_name, timeout_secs, "Playbook run timed out");
                // The exec stream is abandoned; kill the process so the
                // controller is usable for the next submission.
                if let Err(e) = self
                    .docker
                    .exec_command(&controller_id, &["pkill", "-f", "ansible-playbook"])
                    .await
                {
                    warn!(topology = %topology_name, error = %e, "Failed to kill timed-out run");
                }
                ExecutionResult::timed_out(stdout, stderr, elapsed, timeout_secs)
            }
            Err(e) => ExecutionResult::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_success() {
        let result =
            ExecutionResult::completed(0, "PLAY RECAP ok=2".to_string(), String::new(), 1.5);
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!((result.execution_time - 1.5).abs() < f64::EPSILON);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_completed_nonzero_exit() {
        let result = ExecutionResult::completed(2, String::new(), "fatal".to_string(), 0.4);
        assert!(!result.success);
        assert_eq!(result.exit_code, 2);
    }

    #[test]
    fn test_timed_out_preserves_output() {
        let result =
            ExecutionResult::timed_out("partial output".to_string(), String::new(), 2.01, 2);
        assert!(!result.success);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(result.stdout, "partial output");
        assert!(result.error.as_deref().unwrap().contains("timed out after 2"));
    }

    #[test]
    fn test_failed_is_not_executed() {
        let result = ExecutionResult::failed("Container not found");
        assert!(!result.success);
        assert_eq!(result.exit_code, NOT_EXECUTED_EXIT_CODE);
        assert_eq!(result.error.as_deref(), Some("Container not found"));
        assert_eq!(result.execution_time, 0.0);
    }

    #[test]
    fn test_serialization_skips_absent_error() {
        let result = ExecutionResult::completed(0, String::new(), String::new(), 0.1);
        let json = serde_json::to_value(&result).expect("serializes");
        assert!(json.get("error").is_none());
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["success"], true);
    }
}
