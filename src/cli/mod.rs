//! Command-line interface for ansibox.
//!
//! Provides the `serve` entry point plus operational commands for
//! migrations, sweeping, label-driven cleanup and offline playbook
//! validation.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
