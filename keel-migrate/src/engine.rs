//! Phased migration executor.
//!
//! A run moves through [`RunState`]s:
//!
//! ```text
//! Idle -> LockAcquired -> Running -> Success | Failed -> LockReleased
//! ```
//!
//! The advisory lock is released on every path out of `LockAcquired`,
//! including errors raised before any statement runs.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MigrationConfig;
use crate::ddl::Statement;
use crate::error::{MigrateResult, MigrationError};
use crate::file::{MigrationFile, MigrationFileManager};
use crate::history::{MigrationRecord, MigrationSession, RecordState};
use crate::sql::PostgresSqlGenerator;

/// Executor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    LockAcquired,
    Running,
    Success,
    Failed,
    LockReleased,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::LockAcquired => "lock_acquired",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::LockReleased => "lock_released",
        };
        f.write_str(name)
    }
}

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// The migration that stopped a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedMigration {
    pub name: String,
    /// Statements that completed before the failure. For a transactional
    /// migration they were rolled back.
    pub executed: usize,
    /// Database error message.
    pub message: String,
    pub transactional: bool,
}

/// Result of an apply or rollback run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Migrations applied, in order.
    pub applied: Vec<String>,
    /// Migrations reverted, in order.
    pub reverted: Vec<String>,
    /// The failed migration, if the run stopped early.
    pub failed: Option<FailedMigration>,
    /// States the run went through.
    pub states: Vec<RunState>,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }

    /// Turn a failed run into a [`MigrationError::StatementExecution`].
    pub fn ensure_success(&self) -> MigrateResult<()> {
        match &self.failed {
            None => Ok(()),
            Some(failed) => Err(MigrationError::StatementExecution {
                migration: failed.name.clone(),
                executed: failed.executed,
                message: failed.message.clone(),
                transactional: failed.transactional,
            }),
        }
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.applied.is_empty() {
            parts.push(format!("{} applied", self.applied.len()));
        }
        if !self.reverted.is_empty() {
            parts.push(format!("{} reverted", self.reverted.len()));
        }
        if let Some(failed) = &self.failed {
            parts.push(format!("'{}' failed", failed.name));
        }

        if parts.is_empty() {
            "No migrations applied".to_string()
        } else {
            format!("{} in {}ms", parts.join(", "), self.duration_ms)
        }
    }

    fn transition(&mut self, state: RunState) {
        info!(state = %state, "Migration run state");
        self.states.push(state);
    }
}

/// Migration status information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Applied migrations, in chain order.
    pub applied: Vec<String>,
    /// Migrations whose last run failed.
    pub failed: Vec<String>,
    /// Migrations not yet applied, in chain order. Includes failed ones.
    pub pending: Vec<String>,
}

/// Applies and reverts on-disk migrations through a [`MigrationSession`].
pub struct MigrationEngine<S: MigrationSession> {
    config: MigrationConfig,
    session: S,
    file_manager: MigrationFileManager,
    sql_generator: PostgresSqlGenerator,
}

impl<S: MigrationSession> MigrationEngine<S> {
    /// Create a new migration engine.
    pub fn new(config: MigrationConfig, session: S) -> Self {
        let file_manager = MigrationFileManager::new(&config.migrations_dir);
        Self {
            config,
            session,
            file_manager,
            sql_generator: PostgresSqlGenerator,
        }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn file_manager(&self) -> &MigrationFileManager {
        &self.file_manager
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    /// Migrations not yet applied, in chain order.
    pub async fn pending(&mut self) -> MigrateResult<Vec<MigrationFile>> {
        let chain = self.file_manager.load_chain().await?;
        self.session.ensure_history().await?;
        let records = self.session.records().await?;
        pending_migrations(chain, &records)
    }

    /// Applied, failed and pending migrations.
    pub async fn status(&mut self) -> MigrateResult<MigrationStatus> {
        let chain = self.file_manager.load_chain().await?;
        self.session.ensure_history().await?;
        let records = index_records(self.session.records().await?);

        let mut status = MigrationStatus::default();
        for file in &chain {
            let name = file.name().to_string();
            match records.get(file.name()).map(|r| r.state) {
                Some(RecordState::Applied) => status.applied.push(name),
                Some(RecordState::Failed) => {
                    status.failed.push(name.clone());
                    status.pending.push(name);
                }
                Some(RecordState::RolledBack) | None => status.pending.push(name),
            }
        }
        Ok(status)
    }

    /// Apply every pending migration.
    ///
    /// A statement failure stops the run and is reported in
    /// [`RunReport::failed`]; earlier migrations stay applied. Errors that
    /// prevent the run from starting are returned as `Err`.
    pub async fn apply(&mut self) -> MigrateResult<RunReport> {
        let start = Instant::now();
        let mut report = RunReport::default();
        report.transition(RunState::Idle);

        self.session.acquire_lock(self.config.lock_key).await?;
        report.transition(RunState::LockAcquired);

        let outcome = self.run_apply(&mut report).await;
        self.finish(&mut report, outcome, start).await
    }

    /// Revert applied migrations newest first, down to and including `target`.
    pub async fn rollback_to(&mut self, target: &str) -> MigrateResult<RunReport> {
        let start = Instant::now();
        let mut report = RunReport::default();
        report.transition(RunState::Idle);

        self.session.acquire_lock(self.config.lock_key).await?;
        report.transition(RunState::LockAcquired);

        let outcome = self.run_rollback(target, &mut report).await;
        self.finish(&mut report, outcome, start).await
    }

    async fn finish(
        &mut self,
        report: &mut RunReport,
        outcome: MigrateResult<()>,
        start: Instant,
    ) -> MigrateResult<RunReport> {
        if outcome.is_err() || report.failed.is_some() {
            report.transition(RunState::Failed);
        } else {
            report.transition(RunState::Success);
        }

        let released = self.session.release_lock(self.config.lock_key).await;
        report.transition(RunState::LockReleased);
        report.duration_ms = start.elapsed().as_millis() as i64;

        match (outcome, released) {
            (Err(err), Err(release_err)) => {
                warn!(error = %release_err, "Failed to release migration lock");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), Err(release_err)) => Err(release_err),
            (Ok(()), Ok(())) => {
                info!(summary = %report.summary(), "Migration run finished");
                Ok(std::mem::take(report))
            }
        }
    }

    async fn run_apply(&mut self, report: &mut RunReport) -> MigrateResult<()> {
        let chain = self.file_manager.load_chain().await?;
        self.session.ensure_history().await?;
        let records = self.session.records().await?;
        let pending = pending_migrations(chain, &records)?;
        report.transition(RunState::Running);

        for file in pending {
            match self.run_migration(&file, Direction::Up).await? {
                None => report.applied.push(file.name().to_string()),
                Some(failed) => {
                    report.failed = Some(failed);
                    break;
                }
            }
        }
        Ok(())
    }

    async fn run_rollback(&mut self, target: &str, report: &mut RunReport) -> MigrateResult<()> {
        let chain = self.file_manager.load_chain().await?;
        self.session.ensure_history().await?;
        let records = index_records(self.session.records().await?);

        let position = chain
            .iter()
            .position(|f| f.name() == target)
            .ok_or_else(|| MigrationError::NotFound(target.to_string()))?;
        if !records.get(target).is_some_and(MigrationRecord::is_applied) {
            return Err(MigrationError::InvalidMigration(format!(
                "migration '{target}' is not applied"
            )));
        }

        let to_revert: Vec<&MigrationFile> = chain[position..]
            .iter()
            .filter(|f| records.get(f.name()).is_some_and(MigrationRecord::is_applied))
            .rev()
            .collect();
        for file in &to_revert {
            verify_checksum(file, &records)?;
            if !file.migration.is_reversible() {
                return Err(MigrationError::InvalidMigration(format!(
                    "migration '{}' has no down steps",
                    file.name()
                )));
            }
        }
        report.transition(RunState::Running);

        for file in to_revert {
            match self.run_migration(file, Direction::Down).await? {
                None => report.reverted.push(file.name().to_string()),
                Some(failed) => {
                    report.failed = Some(failed);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Run one migration. Statement failures are returned as `Ok(Some(..))`.
    async fn run_migration(
        &mut self,
        file: &MigrationFile,
        direction: Direction,
    ) -> MigrateResult<Option<FailedMigration>> {
        let migration = &file.migration;
        let statements = match direction {
            Direction::Up => &migration.up,
            Direction::Down => &migration.down,
        };
        let transactional = migration.transaction;
        let start = Instant::now();
        info!(
            migration = %migration.name,
            phase = %migration.phase,
            transactional,
            direction = ?direction,
            "Running migration"
        );

        let mut open = false;
        if transactional {
            self.session.begin().await?;
            open = true;
        }

        let result = self
            .execute_migration(file, statements, direction, &mut open, start)
            .await;
        if open && result.is_err() {
            if let Err(err) = self.session.rollback().await {
                warn!(migration = %migration.name, error = %err, "Failed to roll back after error");
            }
        }
        result
    }

    /// Execute `statements` and record the outcome. `open` tracks whether the
    /// migration's transaction is still in progress.
    async fn execute_migration(
        &mut self,
        file: &MigrationFile,
        statements: &[Statement],
        direction: Direction,
        open: &mut bool,
        start: Instant,
    ) -> MigrateResult<Option<FailedMigration>> {
        let migration = &file.migration;
        let transactional = migration.transaction;

        for (executed, statement) in statements.iter().enumerate() {
            let sql = self.sql_generator.render(statement);
            debug!(migration = %migration.name, op = statement.op_name(), sql = %sql, "Executing statement");

            if let Err(message) = self.session.execute(&sql).await {
                warn!(migration = %migration.name, executed, transactional, error = %message, "Statement failed");
                if *open {
                    *open = false;
                    self.session.rollback().await?;
                }
                let elapsed = start.elapsed().as_millis() as i64;
                if direction == Direction::Up {
                    let record =
                        MigrationRecord::new(&migration.name, &file.checksum, RecordState::Failed, elapsed);
                    self.session.record(&record).await?;
                }
                return Ok(Some(FailedMigration {
                    name: migration.name.clone(),
                    executed,
                    message,
                    transactional,
                }));
            }
        }

        let state = match direction {
            Direction::Up => RecordState::Applied,
            Direction::Down => RecordState::RolledBack,
        };
        let elapsed = start.elapsed().as_millis() as i64;
        let record = MigrationRecord::new(&migration.name, &file.checksum, state, elapsed);
        self.session.record(&record).await?;

        if *open {
            *open = false;
            self.session.commit().await?;
        }
        info!(migration = %migration.name, duration_ms = elapsed, "Migration finished");
        Ok(None)
    }
}

fn index_records(records: Vec<MigrationRecord>) -> HashMap<String, MigrationRecord> {
    records.into_iter().map(|r| (r.name.clone(), r)).collect()
}

fn verify_checksum(
    file: &MigrationFile,
    records: &HashMap<String, MigrationRecord>,
) -> MigrateResult<()> {
    match records.get(file.name()) {
        Some(record) if record.is_applied() && record.checksum != file.checksum => {
            Err(MigrationError::ChecksumMismatch {
                id: file.name().to_string(),
                expected: record.checksum.clone(),
                actual: file.checksum.clone(),
            })
        }
        _ => Ok(()),
    }
}

/// Pending migrations of an ordered chain.
///
/// Applied migrations must form a prefix of the chain and must not have been
/// edited since they were applied.
pub fn pending_migrations(
    chain: Vec<MigrationFile>,
    records: &[MigrationRecord],
) -> MigrateResult<Vec<MigrationFile>> {
    let records = index_records(records.to_vec());
    let mut pending: Vec<MigrationFile> = Vec::new();

    for file in chain {
        verify_checksum(&file, &records)?;
        match records.get(file.name()) {
            Some(record) if record.is_applied() => {
                if let Some(first) = pending.first() {
                    return Err(MigrationError::chain(format!(
                        "migration '{}' is applied but its ancestor '{}' is not",
                        file.name(),
                        first.name()
                    )));
                }
            }
            Some(record) => {
                if record.state == RecordState::Failed && !file.migration.transaction {
                    warn!(
                        migration = %file.name(),
                        "Retrying a failed non-transactional migration; its earlier statements may have taken effect"
                    );
                }
                pending.push(file);
            }
            None => pending.push(file),
        }
    }
    Ok(pending)
}
