//! Error types for ansibox operations.
//!
//! Defines error types for the major subsystems:
//! - Docker topology provisioning and playbook execution
//! - Submission orchestration
//! - Runtime configuration loading

use thiserror::Error;

/// Errors that can occur while driving the container runtime.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Network operation failed: {0}")]
    NetworkFailed(String),

    #[error("Container operation failed: {0}")]
    RunFailed(String),

    #[error("Container '{name}' not found")]
    ContainerNotFound { name: String },

    #[error("Failed to copy files into container: {0}")]
    CopyFailed(String),

    #[error("Failed to provision topology '{topology}': {reason}")]
    ProvisionFailed { topology: String, reason: String },

    #[error("Execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the submission orchestrator.
///
/// Execution timeouts and runtime errors are deliberately NOT variants here:
/// they flow back as a normal response with `success = false` so the attempt
/// history still records them.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Exercise '{0}' not found")]
    ExerciseNotFound(String),

    #[error("Playbook validation failed: {}", errors.join("; "))]
    Validation {
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    #[error("Attempt limit reached for exercise '{exercise_id}' (max {max_attempts})")]
    LimitExceeded {
        exercise_id: String,
        max_attempts: u32,
    },

    #[error("Submission rate limit exceeded: {limit} per minute")]
    RateLimited { limit: u32 },

    #[error("No active sandbox session")]
    NoActiveSession,

    #[error("Failed to provision sandbox: {0}")]
    Provisioning(String),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::DatabaseError),

    #[error("Content store error: {0}")]
    Content(#[from] crate::content::ContentError),
}

/// Errors that can occur while loading runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration out of range: {0}")]
    OutOfRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_error_display() {
        let err = SandboxError::ContainerNotFound {
            name: "ansibox_u1_abc".to_string(),
        };
        assert!(err.to_string().contains("ansibox_u1_abc"));

        let err = SandboxError::Timeout { seconds: 300 };
        assert!(err.to_string().contains("300"));
    }

    #[test]
    fn test_submit_error_validation_display() {
        let err = SubmitError::Validation {
            errors: vec!["YAML syntax error".to_string(), "not a list".to_string()],
            warnings: vec![],
        };
        let msg = err.to_string();
        assert!(msg.contains("YAML syntax error"));
        assert!(msg.contains("not a list"));
    }

    #[test]
    fn test_submit_error_limit_display() {
        let err = SubmitError::LimitExceeded {
            exercise_id: "ex-1".to_string(),
            max_attempts: 3,
        };
        assert!(err.to_string().contains("ex-1"));
        assert!(err.to_string().contains('3'));
    }
}
