//! Migration history tracking and the executor's database session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MigrateResult;
use crate::sql::{qualified, quote_ident};

/// Outcome recorded for a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Applied,
    Failed,
    RolledBack,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Parse the stored column value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applied" => Some(Self::Applied),
            "failed" => Some(Self::Failed),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }
}

/// A record of a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration name.
    pub name: String,
    /// Checksum of the artifact file.
    pub checksum: String,
    pub state: RecordState,
    /// When the state was recorded.
    pub applied_at: DateTime<Utc>,
    /// Duration of the run in milliseconds.
    pub duration_ms: i64,
}

impl MigrationRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        checksum: impl Into<String>,
        state: RecordState,
        duration_ms: i64,
    ) -> Self {
        Self {
            name: name.into(),
            checksum: checksum.into(),
            state,
            applied_at: Utc::now(),
            duration_ms,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.state == RecordState::Applied
    }
}

/// A single database session driven by the executor.
///
/// The advisory lock is session scoped, so one session must serve the whole
/// run. `begin`/`commit`/`rollback` bracket transactional migrations;
/// statements executed outside them run in autocommit mode.
#[async_trait::async_trait]
pub trait MigrationSession: Send {
    /// Block until the advisory lock `key` is held by this session.
    async fn acquire_lock(&mut self, key: i64) -> MigrateResult<()>;

    /// Release the advisory lock `key`.
    async fn release_lock(&mut self, key: i64) -> MigrateResult<()>;

    /// Create the history table if needed.
    async fn ensure_history(&mut self) -> MigrateResult<()>;

    /// All history records, one per migration.
    async fn records(&mut self) -> MigrateResult<Vec<MigrationRecord>>;

    /// Insert or replace the record for `record.name`.
    async fn record(&mut self, record: &MigrationRecord) -> MigrateResult<()>;

    async fn begin(&mut self) -> MigrateResult<()>;

    async fn commit(&mut self) -> MigrateResult<()>;

    async fn rollback(&mut self) -> MigrateResult<()>;

    /// Execute one SQL statement.
    async fn execute(&mut self, sql: &str) -> StatementResult;
}

/// Result of a single statement; the error is the database's message.
pub type StatementResult = Result<(), String>;

/// SQL creating the history table.
pub fn init_sql(schema: &str, table: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {} (
    name VARCHAR(255) PRIMARY KEY,
    checksum VARCHAR(64) NOT NULL,
    state VARCHAR(16) NOT NULL,
    applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    duration_ms BIGINT NOT NULL DEFAULT 0
)"#,
        qualified(schema, table)
    )
}

/// SQL listing history records.
pub fn select_sql(schema: &str, table: &str) -> String {
    format!(
        "SELECT name, checksum, state, applied_at, duration_ms FROM {} ORDER BY applied_at, name",
        qualified(schema, table)
    )
}

/// SQL upserting a history record; parameters follow [`MigrationRecord`]'s field order.
pub fn upsert_sql(schema: &str, table: &str) -> String {
    format!(
        "INSERT INTO {} (name, checksum, state, applied_at, duration_ms) VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT ({}) DO UPDATE SET checksum = EXCLUDED.checksum, state = EXCLUDED.state, \
         applied_at = EXCLUDED.applied_at, duration_ms = EXCLUDED.duration_ms",
        qualified(schema, table),
        quote_ident("name")
    )
}

/// SQL for the session-scoped advisory lock.
pub const POSTGRES_LOCK_SQL: &str = "SELECT pg_advisory_lock($1)";
pub const POSTGRES_UNLOCK_SQL: &str = "SELECT pg_advisory_unlock($1)";
