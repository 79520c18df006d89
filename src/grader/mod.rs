//! Declarative grading of playbook runs.
//!
//! Exercises attach an ordered list of tagged test cases; the runner
//! evaluates them against the captured execution output and produces an
//! aggregate report that is stored verbatim on the attempt row.

pub mod cases;
pub mod runner;

pub use cases::TestCase;
pub use runner::{CaseResult, TestReport, TestRunner};
