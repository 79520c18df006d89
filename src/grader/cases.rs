//! Declarative test case definitions.
//!
//! Test cases are authored as tagged YAML/JSON records attached to an
//! exercise. The tag set is closed, but unrecognized tags must survive
//! deserialization so the runner can fail them explicitly instead of
//! rejecting the whole exercise; that is why `Deserialize` is hand-rolled
//! around an `Unknown` arm.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// A single declarative assertion against an execution result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestCase {
    /// Passes when stdout contains the expected string.
    OutputContains {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        expected: String,
    },
    /// Passes when the exit code matches (default 0).
    ExitCode {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        expected: i64,
    },
    /// Passes when the Ansible summary reports a non-zero change count.
    TaskChanged {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Passes when the run exited 0 and stderr carries no FAILED marker.
    NoErrors {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Unrecognized tag; always fails at evaluation time.
    Unknown {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        type_name: String,
    },
}

impl TestCase {
    /// Human-readable name for reports, with per-type defaults.
    pub fn display_name(&self) -> String {
        let (name, default) = match self {
            TestCase::OutputContains { name, .. } => (name, "Output contains test"),
            TestCase::ExitCode { name, .. } => (name, "Exit code test"),
            TestCase::TaskChanged { name } => (name, "Task changed test"),
            TestCase::NoErrors { name } => (name, "No errors test"),
            TestCase::Unknown { name, .. } => (name, "Unknown test"),
        };
        name.clone().unwrap_or_else(|| default.to_string())
    }
}

impl<'de> Deserialize<'de> for TestCase {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawCase {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            expected: Option<serde_json::Value>,
        }

        let raw = RawCase::deserialize(deserializer)?;
        Ok(match raw.kind.as_str() {
            "output_contains" => TestCase::OutputContains {
                name: raw.name,
                expected: raw
                    .expected
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            },
            "exit_code" => TestCase::ExitCode {
                name: raw.name,
                expected: raw.expected.as_ref().and_then(|v| v.as_i64()).unwrap_or(0),
            },
            "task_changed" => TestCase::TaskChanged { name: raw.name },
            "no_errors" => TestCase::NoErrors { name: raw.name },
            other => TestCase::Unknown {
                name: raw.name,
                type_name: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_output_contains() {
        let case: TestCase = serde_json::from_value(serde_json::json!({
            "type": "output_contains",
            "name": "Greets",
            "expected": "hello"
        }))
        .expect("deserializes");

        assert_eq!(
            case,
            TestCase::OutputContains {
                name: Some("Greets".to_string()),
                expected: "hello".to_string(),
            }
        );
    }

    #[test]
    fn test_deserialize_exit_code_defaults_to_zero() {
        let case: TestCase =
            serde_json::from_value(serde_json::json!({"type": "exit_code"})).expect("deserializes");

        assert_eq!(
            case,
            TestCase::ExitCode {
                name: None,
                expected: 0,
            }
        );
    }

    #[test]
    fn test_deserialize_unknown_tag_is_captured() {
        let case: TestCase = serde_json::from_value(serde_json::json!({
            "type": "file_exists",
            "name": "Checks nginx.conf"
        }))
        .expect("deserializes");

        assert_eq!(
            case,
            TestCase::Unknown {
                name: Some("Checks nginx.conf".to_string()),
                type_name: "file_exists".to_string(),
            }
        );
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let cases: Vec<TestCase> = serde_yaml::from_str(
            r#"
- type: output_contains
  expected: "hi"
- type: no_errors
  name: Clean run
"#,
        )
        .expect("deserializes");

        assert_eq!(cases.len(), 2);
        assert!(matches!(cases[0], TestCase::OutputContains { .. }));
        assert!(matches!(cases[1], TestCase::NoErrors { .. }));
    }

    #[test]
    fn test_display_name_defaults() {
        let case = TestCase::TaskChanged { name: None };
        assert_eq!(case.display_name(), "Task changed test");

        let case = TestCase::ExitCode {
            name: Some("Custom".to_string()),
            expected: 0,
        };
        assert_eq!(case.display_name(), "Custom");
    }
}
