//! Durable registry of sandbox sessions.
//!
//! The registry is the single source of truth for reuse-versus-create
//! decisions and for the sweeper. The one-running-session-per-user
//! invariant is enforced by a partial unique index, so concurrent
//! provisioning races resolve at the data layer: the loser's `promote`
//! fails with a conflict and must adopt the winner's session.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::database::{is_unique_violation, DatabaseError};

/// Lifecycle state of a sandbox session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Row created, topology provisioning in flight.
    Starting,
    /// Topology is live and usable.
    Running,
    /// Explicitly torn down.
    Stopped,
    /// Provisioning failed or the row was stranded.
    Error,
    /// Reclaimed by the sweeper after its TTL.
    Expired,
}

impl SessionState {
    /// Whether this state is terminal (absorbing).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Stopped | SessionState::Error | SessionState::Expired
        )
    }

    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
            SessionState::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(SessionState::Starting),
            "running" => Ok(SessionState::Running),
            "stopped" => Ok(SessionState::Stopped),
            "error" => Ok(SessionState::Error),
            "expired" => Ok(SessionState::Expired),
            other => Err(format!("unknown session state '{other}'")),
        }
    }
}

/// A sandbox session row.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Controller container ID; null until provisioned.
    pub container_id: Option<String>,
    /// Name shared by all topology resources; globally unique.
    pub topology_name: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the sweeper may reclaim the topology.
    pub expires_at: DateTime<Utc>,
    /// Last execution or touch.
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Whether the session has outlived its TTL.
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

fn row_to_session(row: &PgRow) -> Result<Session, DatabaseError> {
    let state_raw: String = row.get("state");
    let state = SessionState::from_str(&state_raw).map_err(DatabaseError::InvalidValue)?;

    Ok(Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        container_id: row.get("container_id"),
        topology_name: row.get("topology_name"),
        state,
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        last_activity: row.get("last_activity"),
    })
}

const SESSION_COLUMNS: &str =
    "id, user_id, container_id, topology_name, state, created_at, expires_at, last_activity";

/// Durable registry of sandbox sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    pool: PgPool,
}

impl SessionRegistry {
    /// Creates a new registry over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the user's running, unexpired session, if any.
    pub async fn find_active(&self, user_id: &str) -> Result<Option<Session>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND state = 'running' AND expires_at > NOW() \
             LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    /// Returns the user's running session regardless of expiry, if any.
    ///
    /// An expired row keeps holding the one-running-per-user slot until it
    /// is terminated; callers use this to reclaim the slot ahead of the
    /// sweeper.
    pub async fn find_running(&self, user_id: &str) -> Result<Option<Session>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND state = 'running' \
             LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    /// Creates a fresh `starting` row for a user.
    pub async fn insert_starting(
        &self,
        user_id: &str,
        topology_name: &str,
        ttl: Duration,
    ) -> Result<Session, DatabaseError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            container_id: None,
            topology_name: topology_name.to_string(),
            state: SessionState::Starting,
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl)
                    .map_err(|e| DatabaseError::InvalidValue(e.to_string()))?,
            last_activity: now,
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, container_id, topology_name, state,
                created_at, expires_at, last_activity
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id)
        .bind(&session.user_id)
        .bind(&session.container_id)
        .bind(&session.topology_name)
        .bind(session.state.as_str())
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.last_activity)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    /// Promotes a `starting` session to `running`, storing the controller ID.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Conflict` when another session for the same
    /// user is already running, and `DatabaseError::NotFound` when the row
    /// is no longer in `starting`.
    pub async fn promote(&self, session_id: Uuid, container_id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET state = 'running', container_id = $2, last_activity = NOW()
            WHERE id = $1 AND state = 'starting'
            "#,
        )
        .bind(session_id)
        .bind(container_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(DatabaseError::NotFound(format!(
                "starting session {session_id}"
            ))),
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(DatabaseError::Conflict(
                "user already has a running session".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Updates `last_activity` to now.
    pub async fn touch(&self, session_id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE sessions SET last_activity = NOW() WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Moves a session to a terminal state.
    ///
    /// Terminal states are absorbing: a row already in `stopped`, `error`
    /// or `expired` is left untouched and `false` is returned.
    pub async fn terminate(
        &self,
        session_id: Uuid,
        state: SessionState,
    ) -> Result<bool, DatabaseError> {
        debug_assert!(state.is_terminal());

        let done = sqlx::query(
            r#"
            UPDATE sessions
            SET state = $2
            WHERE id = $1 AND state IN ('starting', 'running')
            "#,
        )
        .bind(session_id)
        .bind(state.as_str())
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    /// Running sessions whose TTL has elapsed; sweeper input.
    pub async fn expired_running(&self) -> Result<Vec<Session>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE state = 'running' AND expires_at < NOW() \
             ORDER BY expires_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    /// `starting` rows older than the recovery window, stranded by a crash
    /// mid-provisioning.
    pub async fn stale_starting(&self, window: Duration) -> Result<Vec<Session>, DatabaseError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window)
                .map_err(|e| DatabaseError::InvalidValue(e.to_string()))?;

        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE state = 'starting' AND created_at < $1 \
             ORDER BY created_at"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }
}
