//! Exercise content and the external collaborator interfaces.
//!
//! The platform core does not own course content or user scoring; it sees
//! them through two narrow traits. `ContentStore` resolves an exercise id
//! to its definition (tests, limits, reference solution), `UserLedger`
//! applies the points side effect after a passing attempt. The shipped
//! implementations load exercises from a directory of YAML documents and
//! keep point totals in memory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::grader::TestCase;

/// Errors that can occur loading or resolving exercise content.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Invalid exercise in '{file}': {reason}")]
    InvalidExercise { file: String, reason: String },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the user ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger rejected award: {0}")]
    Rejected(String),
}

/// A progressive hint attached to an exercise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hint {
    /// Hint text, ordered from general to specific.
    pub content: String,
    /// Points deducted when this hint is revealed.
    #[serde(default = "default_hint_penalty")]
    pub penalty_points: u32,
}

fn default_hint_penalty() -> u32 {
    1
}

/// An exercise definition, read-only input to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exercise {
    /// Stable identifier.
    pub id: String,
    /// Title shown to students.
    pub title: String,
    /// Problem statement.
    #[serde(default)]
    pub description: String,
    /// Initial playbook template for students.
    #[serde(default)]
    pub starter_code: String,
    /// Reference solution. Never serialized: it must not leave the store.
    #[serde(default, skip_serializing)]
    pub solution_code: String,
    /// Points awarded on a passing attempt.
    #[serde(default = "default_points")]
    pub points: u32,
    /// Wall-clock limit for one execution, in seconds.
    #[serde(default = "default_time_limit")]
    pub time_limit_seconds: u64,
    /// Attempt cap; 0 means unlimited.
    #[serde(default)]
    pub max_attempts: u32,
    /// Ordered test cases graded against the execution output.
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    /// Progressive hints.
    #[serde(default)]
    pub hints: Vec<Hint>,
}

fn default_points() -> u32 {
    10
}

fn default_time_limit() -> u64 {
    300
}

impl Exercise {
    /// Validates constraints that must hold at load time.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("exercise id must not be empty".to_string());
        }
        if self.time_limit_seconds == 0 {
            return Err("time_limit_seconds must be positive".to_string());
        }
        Ok(())
    }
}

/// Read-only source of exercise definitions.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Resolves an exercise by id. `None` when the id is unknown.
    async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>, ContentError>;
}

/// Sink for the points side effect after a passing attempt.
#[async_trait]
pub trait UserLedger: Send + Sync {
    /// Credits points to a user. Best-effort from the caller's view.
    async fn award_points(&self, user_id: &str, points: u32) -> Result<(), LedgerError>;
}

/// Content store backed by a directory of YAML exercise documents.
pub struct YamlContentStore {
    exercises: HashMap<String, Exercise>,
}

impl YamlContentStore {
    /// Loads every `.yml`/`.yaml` document under `dir` as one exercise.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` on IO failure, malformed YAML, or an exercise
    /// that fails load-time validation (e.g. a zero time limit).
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ContentError> {
        let mut exercises = HashMap::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yml" || e == "yaml");
            if !is_yaml {
                continue;
            }

            let raw = std::fs::read_to_string(&path)?;
            let exercise: Exercise = serde_yaml::from_str(&raw)?;
            exercise
                .validate()
                .map_err(|reason| ContentError::InvalidExercise {
                    file: path.display().to_string(),
                    reason,
                })?;
            exercises.insert(exercise.id.clone(), exercise);
        }

        info!(count = exercises.len(), "Loaded exercise definitions");
        Ok(Self { exercises })
    }

    /// Builds a store from in-memory exercises.
    pub fn from_exercises(list: Vec<Exercise>) -> Self {
        let exercises = list.into_iter().map(|e| (e.id.clone(), e)).collect();
        Self { exercises }
    }

    /// Empty store.
    pub fn empty() -> Self {
        Self {
            exercises: HashMap::new(),
        }
    }

    /// Number of loaded exercises.
    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    /// Whether no exercises are loaded.
    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty()
    }
}

#[async_trait]
impl ContentStore for YamlContentStore {
    async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>, ContentError> {
        Ok(self.exercises.get(id).cloned())
    }
}

/// Ledger keeping totals in process memory.
///
/// Suitable for tests and single-node deployments; a production setup
/// would put a real progress service behind the trait.
#[derive(Default)]
pub struct InMemoryLedger {
    totals: Mutex<HashMap<String, u64>>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current total for a user.
    pub fn total(&self, user_id: &str) -> u64 {
        self.totals
            .lock()
            .expect("ledger lock poisoned")
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl UserLedger for InMemoryLedger {
    async fn award_points(&self, user_id: &str, points: u32) -> Result<(), LedgerError> {
        let mut totals = self.totals.lock().expect("ledger lock poisoned");
        *totals.entry(user_id.to_string()).or_insert(0) += u64::from(points);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXERCISE_YAML: &str = r#"
id: ping-pong
title: First playbook
description: Make the nodes say hello.
starter_code: |
  - hosts: all
    tasks: []
solution_code: |
  - hosts: all
    tasks:
      - debug:
          msg: "hi"
points: 20
time_limit_seconds: 120
max_attempts: 3
test_cases:
  - type: output_contains
    expected: "hi"
  - type: no_errors
hints:
  - content: Use the debug module.
    penalty_points: 2
"#;

    #[test]
    fn test_exercise_deserialization() {
        let exercise: Exercise = serde_yaml::from_str(EXERCISE_YAML).expect("deserializes");
        assert_eq!(exercise.id, "ping-pong");
        assert_eq!(exercise.points, 20);
        assert_eq!(exercise.time_limit_seconds, 120);
        assert_eq!(exercise.max_attempts, 3);
        assert_eq!(exercise.test_cases.len(), 2);
        assert_eq!(exercise.hints.len(), 1);
        assert_eq!(exercise.hints[0].penalty_points, 2);
        assert!(exercise.validate().is_ok());
    }

    #[test]
    fn test_exercise_defaults() {
        let exercise: Exercise =
            serde_yaml::from_str("id: bare\ntitle: Bare\n").expect("deserializes");
        assert_eq!(exercise.points, 10);
        assert_eq!(exercise.time_limit_seconds, 300);
        assert_eq!(exercise.max_attempts, 0);
        assert!(exercise.test_cases.is_empty());
    }

    #[test]
    fn test_zero_time_limit_rejected_at_load() {
        let exercise: Exercise =
            serde_yaml::from_str("id: bad\ntitle: Bad\ntime_limit_seconds: 0\n")
                .expect("deserializes");
        assert!(exercise.validate().is_err());
    }

    #[test]
    fn test_solution_code_never_serialized() {
        let exercise: Exercise = serde_yaml::from_str(EXERCISE_YAML).expect("deserializes");
        let json = serde_json::to_value(&exercise).expect("serializes");
        assert!(json.get("solution_code").is_none());
        assert!(json.get("starter_code").is_some());
    }

    #[tokio::test]
    async fn test_load_dir_and_lookup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut file = std::fs::File::create(dir.path().join("ping-pong.yml")).expect("create");
        file.write_all(EXERCISE_YAML.as_bytes()).expect("write");
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let store = YamlContentStore::load_dir(dir.path()).expect("loads");
        assert_eq!(store.len(), 1);

        let exercise = store
            .get_exercise("ping-pong")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(exercise.title, "First playbook");

        let missing = store.get_exercise("nope").await.expect("lookup");
        assert!(missing.is_none());
    }

    #[test]
    fn test_load_dir_rejects_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("bad.yml"),
            "id: bad\ntitle: Bad\ntime_limit_seconds: 0\n",
        )
        .expect("write");

        let result = YamlContentStore::load_dir(dir.path());
        assert!(matches!(
            result,
            Err(ContentError::InvalidExercise { .. })
        ));
    }

    #[tokio::test]
    async fn test_in_memory_ledger_accumulates() {
        let ledger = InMemoryLedger::new();
        ledger.award_points("alice", 10).await.expect("award");
        ledger.award_points("alice", 5).await.expect("award");
        ledger.award_points("bob", 3).await.expect("award");

        assert_eq!(ledger.total("alice"), 15);
        assert_eq!(ledger.total("bob"), 3);
        assert_eq!(ledger.total("carol"), 0);
    }
}
