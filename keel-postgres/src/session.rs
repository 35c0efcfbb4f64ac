//! Migration session over a single PostgreSQL connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_migrate::history::{
    POSTGRES_LOCK_SQL, POSTGRES_UNLOCK_SQL, init_sql, select_sql, upsert_sql,
};
use keel_migrate::sql::quote_ident;
use keel_migrate::{
    MigrateResult, MigrationConfig, MigrationError, MigrationRecord, MigrationSession,
    RecordState, StatementResult,
};
use tracing::{debug, info, warn};

use crate::connection::PgConnection;
use crate::error::PgError;

/// Executor session bound to one connection for its whole lifetime.
///
/// If the advisory lock cannot be released, the connection is closed rather
/// than returned to the pool, and the session is unusable afterwards.
pub struct PgMigrationSession {
    conn: Option<PgConnection>,
    history_schema: String,
    history_table: String,
}

impl PgMigrationSession {
    pub fn new(conn: PgConnection, config: &MigrationConfig) -> Self {
        Self {
            conn: Some(conn),
            history_schema: config.history_schema.clone(),
            history_table: config.history_table.clone(),
        }
    }

    fn conn(&self) -> MigrateResult<&PgConnection> {
        self.conn
            .as_ref()
            .ok_or_else(|| MigrationError::database("session connection was discarded"))
    }

    fn decode_record(row: &tokio_postgres::Row) -> Result<MigrationRecord, PgError> {
        let state: String = row.try_get("state")?;
        let state = RecordState::parse(&state)
            .ok_or_else(|| PgError::decode(format!("unknown migration state '{state}'")))?;
        let applied_at: DateTime<Utc> = row.try_get("applied_at")?;
        Ok(MigrationRecord {
            name: row.try_get("name")?,
            checksum: row.try_get("checksum")?,
            state,
            applied_at,
            duration_ms: row.try_get("duration_ms")?,
        })
    }
}

#[async_trait]
impl MigrationSession for PgMigrationSession {
    async fn acquire_lock(&mut self, key: i64) -> MigrateResult<()> {
        debug!(key, "Waiting for advisory lock");
        self.conn()?
            .execute(POSTGRES_LOCK_SQL, &[&key])
            .await
            .map_err(|e| MigrationError::lock_failed(e.database_message()))?;
        info!(key, "Advisory lock acquired");
        Ok(())
    }

    async fn release_lock(&mut self, key: i64) -> MigrateResult<()> {
        let released = self.conn()?.execute(POSTGRES_UNLOCK_SQL, &[&key]).await;
        match released {
            Ok(_) => {
                debug!(key, "Advisory lock released");
                Ok(())
            }
            Err(e) => {
                warn!(key, error = %e, "Closing connection that still holds the advisory lock");
                if let Some(conn) = self.conn.take() {
                    conn.discard();
                }
                Err(MigrationError::lock_failed(e.database_message()))
            }
        }
    }

    async fn ensure_history(&mut self) -> MigrateResult<()> {
        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS {};\n{}",
            quote_ident(&self.history_schema),
            init_sql(&self.history_schema, &self.history_table)
        );
        self.conn()?.batch_execute(&sql).await?;
        Ok(())
    }

    async fn records(&mut self) -> MigrateResult<Vec<MigrationRecord>> {
        let rows = self
            .conn()?
            .query(&select_sql(&self.history_schema, &self.history_table), &[])
            .await?;
        Ok(rows
            .iter()
            .map(Self::decode_record)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn record(&mut self, record: &MigrationRecord) -> MigrateResult<()> {
        let state = record.state.as_str();
        self.conn()?
            .execute(
                &upsert_sql(&self.history_schema, &self.history_table),
                &[
                    &record.name,
                    &record.checksum,
                    &state,
                    &record.applied_at,
                    &record.duration_ms,
                ],
            )
            .await?;
        Ok(())
    }

    async fn begin(&mut self) -> MigrateResult<()> {
        self.conn()?.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> MigrateResult<()> {
        self.conn()?.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> MigrateResult<()> {
        self.conn()?.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> StatementResult {
        let conn = self.conn().map_err(|e| e.to_string())?;
        conn.batch_execute(sql).await.map_err(|e| match e.sqlstate() {
            Some(code) => format!("{} (SQLSTATE {code})", e.database_message()),
            None => e.database_message(),
        })
    }
}
