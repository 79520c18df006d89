//! PostgreSQL persistent storage.
//!
//! This module holds the two durable tables the platform core owns:
//!
//! - **sessions**: the registry of sandbox topologies, keyed by owner, with
//!   the one-running-session-per-user invariant enforced by a partial
//!   unique index
//! - **attempts**: the append-only history of graded submissions with dense
//!   per-(user, exercise) attempt numbering
//!
//! Schema statements live in [`schema`], are applied idempotently by
//! [`MigrationRunner`], and tracked in a `_migrations` table.

pub mod attempts;
pub mod database;
pub mod migrations;
pub mod schema;
pub mod sessions;

pub use attempts::{Attempt, AttemptRecorder, RecordError};
pub use database::{Database, DatabaseError};
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
pub use sessions::{Session, SessionRegistry, SessionState};
