//! Database schema constants.
//!
//! All SQL schema definitions for the PostgreSQL storage backend. The
//! statements are idempotent (IF NOT EXISTS) and applied in order by the
//! migration runner.

/// SQL schema for the sessions table.
///
/// One row per sandbox topology. The partial unique index below enforces
/// the one-running-session-per-user invariant at the data layer.
pub const CREATE_SESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id UUID PRIMARY KEY,
    user_id VARCHAR(255) NOT NULL,
    container_id VARCHAR(255),
    topology_name VARCHAR(255) NOT NULL UNIQUE,
    state VARCHAR(20) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    expires_at TIMESTAMPTZ NOT NULL,
    last_activity TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK (expires_at > created_at)
)
"#;

/// SQL schema for the attempts table.
///
/// Append-only; the unique constraint backs the dense per-(user, exercise)
/// attempt numbering under concurrent writers.
pub const CREATE_ATTEMPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS attempts (
    id UUID PRIMARY KEY,
    user_id VARCHAR(255) NOT NULL,
    exercise_id VARCHAR(255) NOT NULL,
    code TEXT NOT NULL,
    stdout TEXT NOT NULL DEFAULT '',
    stderr TEXT NOT NULL DEFAULT '',
    test_results JSONB NOT NULL,
    is_passed BOOLEAN NOT NULL DEFAULT FALSE,
    execution_time DOUBLE PRECISION,
    hints_used INTEGER NOT NULL DEFAULT 0,
    attempt_number INTEGER NOT NULL CHECK (attempt_number > 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (user_id, exercise_id, attempt_number)
)
"#;

/// SQL for creating all required indexes.
pub const CREATE_INDEXES: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_running
    ON sessions(user_id) WHERE state = 'running';
CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state);
CREATE INDEX IF NOT EXISTS idx_attempts_user_exercise
    ON attempts(user_id, exercise_id, created_at DESC)
"#;

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![CREATE_SESSIONS_TABLE, CREATE_ATTEMPTS_TABLE, CREATE_INDEXES]
}

/// Table names in the schema.
pub mod tables {
    /// Sessions table name.
    pub const SESSIONS: &str = "sessions";
    /// Attempts table name.
    pub const ATTEMPTS: &str = "attempts";
}
