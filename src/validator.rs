//! Static pre-flight validation of submitted playbooks.
//!
//! Validation is advisory: the container is the real isolation
//! barrier, so dangerous patterns and restricted modules produce warnings
//! rather than hard failures. Only malformed YAML (or a top-level value
//! that is not a list of plays) rejects a submission outright.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Modules whose use is flagged for review.
const RESTRICTED_MODULES: [&str; 4] = ["shell", "command", "raw", "script"];

/// Byte patterns flagged as potentially destructive.
const DANGEROUS_PATTERNS: [&str; 8] = [
    "rm -rf",
    "dd if=",
    "mkfs",
    ":(){ :|:& };:",
    "/dev/sda",
    "shutdown",
    "reboot",
    "halt",
];

/// Result of validating a playbook submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the playbook is structurally valid and may be executed.
    pub valid: bool,
    /// Errors that block execution.
    pub errors: Vec<String>,
    /// Advisory findings that do not block execution.
    pub warnings: Vec<String>,
    /// Whether no dangerous patterns or restricted modules were found.
    pub safe: bool,
    /// The parsed plays, when parsing succeeded.
    #[serde(skip)]
    pub plays: Option<Vec<Value>>,
}

impl ValidationReport {
    fn invalid(error: String) -> Self {
        Self {
            valid: false,
            errors: vec![error],
            warnings: Vec::new(),
            safe: false,
            plays: None,
        }
    }
}

/// Validates Ansible playbooks for syntax and obviously dangerous content.
pub struct PlaybookValidator;

impl PlaybookValidator {
    /// Performs complete validation of a playbook submission.
    ///
    /// Parses the YAML, requires a top-level sequence of plays, then scans
    /// the raw text for dangerous byte patterns and the parsed tree for
    /// restricted modules. Pure: the same input always yields the same
    /// report.
    pub fn validate(playbook: &str) -> ValidationReport {
        let plays = match Self::parse(playbook) {
            Ok(plays) => plays,
            Err(error) => return ValidationReport::invalid(error),
        };

        let mut warnings = Self::scan_patterns(playbook);
        warnings.extend(Self::scan_modules(&plays));

        ValidationReport {
            valid: true,
            errors: Vec::new(),
            safe: warnings.is_empty(),
            warnings,
            plays: Some(plays),
        }
    }

    /// Parses the playbook and requires a top-level sequence.
    fn parse(playbook: &str) -> Result<Vec<Value>, String> {
        let value: Value = serde_yaml::from_str(playbook)
            .map_err(|e| format!("YAML syntax error: {e}"))?;

        match value {
            Value::Sequence(plays) => Ok(plays),
            _ => Err("Playbook must be a list of plays".to_string()),
        }
    }

    /// Scans the raw submission text for dangerous byte patterns.
    fn scan_patterns(playbook: &str) -> Vec<String> {
        DANGEROUS_PATTERNS
            .iter()
            .filter(|pattern| playbook.contains(*pattern))
            .map(|pattern| format!("Dangerous pattern detected: {pattern}"))
            .collect()
    }

    /// Scans each play's task list for restricted modules.
    fn scan_modules(plays: &[Value]) -> Vec<String> {
        let mut warnings = Vec::new();

        for play in plays {
            let Some(tasks) = play.get("tasks").and_then(Value::as_sequence) else {
                continue;
            };

            for task in tasks {
                if !task.is_mapping() {
                    continue;
                }

                for module in RESTRICTED_MODULES {
                    if task.get(module).is_some() {
                        let name = task
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("unnamed");
                        warnings.push(format!(
                            "Restricted module '{module}' used in task: {name}"
                        ));
                    }
                }
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_PLAYBOOK: &str = r#"
- hosts: all
  tasks:
    - name: Say hello
      debug:
        msg: "hi"
"#;

    #[test]
    fn test_valid_playbook() {
        let report = PlaybookValidator::validate(HELLO_PLAYBOOK);
        assert!(report.valid);
        assert!(report.safe);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
        assert_eq!(report.plays.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_broken_yaml() {
        let report = PlaybookValidator::validate("- hosts: all\n  tasks: [unclosed");
        assert!(!report.valid);
        assert!(!report.safe);
        assert!(report.errors[0].contains("YAML syntax error"));
        assert!(report.plays.is_none());
    }

    #[test]
    fn test_top_level_must_be_sequence() {
        let report = PlaybookValidator::validate("hosts: all");
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Playbook must be a list of plays"]);
    }

    #[test]
    fn test_empty_playbook_rejected() {
        let report = PlaybookValidator::validate("");
        assert!(!report.valid);

        let report = PlaybookValidator::validate("   \n");
        assert!(!report.valid);
    }

    #[test]
    fn test_dangerous_pattern_warns_but_validates() {
        let playbook = r#"
- hosts: all
  tasks:
    - name: Nuke it
      debug:
        msg: "rm -rf /"
"#;
        let report = PlaybookValidator::validate(playbook);
        assert!(report.valid);
        assert!(!report.safe);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("rm -rf")));
    }

    #[test]
    fn test_restricted_module_named_task() {
        let playbook = r#"
- hosts: all
  tasks:
    - name: List files
      shell: ls -la
"#;
        let report = PlaybookValidator::validate(playbook);
        assert!(report.valid);
        assert!(!report.safe);
        assert!(report
            .warnings
            .contains(&"Restricted module 'shell' used in task: List files".to_string()));
    }

    #[test]
    fn test_restricted_module_unnamed_task() {
        let playbook = r#"
- hosts: all
  tasks:
    - command: whoami
"#;
        let report = PlaybookValidator::validate(playbook);
        assert!(report
            .warnings
            .contains(&"Restricted module 'command' used in task: unnamed".to_string()));
    }

    #[test]
    fn test_play_without_tasks() {
        let report = PlaybookValidator::validate("- hosts: all\n  roles: []\n");
        assert!(report.valid);
        assert!(report.safe);
    }

    #[test]
    fn test_deterministic() {
        let playbook = r#"
- hosts: all
  tasks:
    - name: Risky
      shell: echo shutdown
"#;
        let first = PlaybookValidator::validate(playbook);
        let second = PlaybookValidator::validate(playbook);
        assert_eq!(first.valid, second.valid);
        assert_eq!(first.safe, second.safe);
        assert_eq!(first.errors, second.errors);
        assert_eq!(first.warnings, second.warnings);
    }

    #[test]
    fn test_all_patterns_detected() {
        for pattern in DANGEROUS_PATTERNS {
            let playbook = format!(
                "- hosts: all\n  tasks:\n    - debug:\n        msg: \"{pattern}\"\n"
            );
            let report = PlaybookValidator::validate(&playbook);
            assert!(!report.safe, "pattern not flagged: {pattern}");
        }
    }
}
