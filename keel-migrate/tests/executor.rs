//! Executor scenarios against an in-memory database session.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use keel_migrate::changeset::priority;
use keel_migrate::{
    Changeset, MigrateResult, Migration, MigrationConfig, MigrationEngine, MigrationError,
    MigrationFileManager, MigrationRecord, MigrationRenderer, MigrationSession, OperationKind,
    Phase, PhasePlan, RecordState, RunState, Statement, StatementResult,
};
use keel_schema::{ColumnInfo, IndexInfo};

/// Marker that makes a statement fail.
const INVALID: &str = "INVALID";

/// State shared by every session of one in-memory database.
#[derive(Default)]
struct Database {
    /// Committed statements, in commit order.
    committed: Vec<String>,
    history: BTreeMap<String, MigrationRecord>,
    /// `(session, event)` in the order they happened.
    events: Vec<(usize, String)>,
}

#[derive(Clone, Default)]
struct SharedDatabase {
    state: Arc<StdMutex<Database>>,
    lock: Arc<Mutex<()>>,
}

impl SharedDatabase {
    fn session(&self, id: usize) -> MemorySession {
        MemorySession {
            id,
            db: self.clone(),
            guard: None,
            transaction: None,
            failing_history: false,
        }
    }

    fn committed(&self) -> Vec<String> {
        self.state.lock().unwrap().committed.clone()
    }

    fn record(&self, name: &str) -> Option<RecordState> {
        self.state.lock().unwrap().history.get(name).map(|r| r.state)
    }

    fn events(&self) -> Vec<(usize, String)> {
        self.state.lock().unwrap().events.clone()
    }
}

#[derive(Default)]
struct Transaction {
    statements: Vec<String>,
    records: Vec<MigrationRecord>,
}

struct MemorySession {
    id: usize,
    db: SharedDatabase,
    guard: Option<OwnedMutexGuard<()>>,
    transaction: Option<Transaction>,
    /// Fail every history write.
    failing_history: bool,
}

impl MemorySession {
    fn failing_history(mut self) -> Self {
        self.failing_history = true;
        self
    }

    fn log(&self, event: impl Into<String>) {
        self.db.state.lock().unwrap().events.push((self.id, event.into()));
    }
}

#[async_trait::async_trait]
impl MigrationSession for MemorySession {
    async fn acquire_lock(&mut self, _key: i64) -> MigrateResult<()> {
        let guard = self.db.lock.clone().lock_owned().await;
        self.guard = Some(guard);
        self.log("lock");
        Ok(())
    }

    async fn release_lock(&mut self, _key: i64) -> MigrateResult<()> {
        if self.transaction.is_some() {
            self.log("unlock failed");
            return Err(MigrationError::database("current transaction is aborted"));
        }
        self.log("unlock");
        self.guard = None;
        Ok(())
    }

    async fn ensure_history(&mut self) -> MigrateResult<()> {
        Ok(())
    }

    async fn records(&mut self) -> MigrateResult<Vec<MigrationRecord>> {
        Ok(self.db.state.lock().unwrap().history.values().cloned().collect())
    }

    async fn record(&mut self, record: &MigrationRecord) -> MigrateResult<()> {
        if self.failing_history {
            self.log("record failed");
            return Err(MigrationError::database("history insert failed"));
        }
        match &mut self.transaction {
            Some(tx) => tx.records.push(record.clone()),
            None => {
                self.db
                    .state
                    .lock()
                    .unwrap()
                    .history
                    .insert(record.name.clone(), record.clone());
            }
        }
        Ok(())
    }

    async fn begin(&mut self) -> MigrateResult<()> {
        if self.transaction.is_some() {
            return Err(MigrationError::database("transaction already open"));
        }
        self.transaction = Some(Transaction::default());
        self.log("begin");
        Ok(())
    }

    async fn commit(&mut self) -> MigrateResult<()> {
        let tx = self
            .transaction
            .take()
            .ok_or_else(|| MigrationError::database("no transaction open"))?;
        self.log("commit");
        let mut state = self.db.state.lock().unwrap();
        state.committed.extend(tx.statements);
        for record in tx.records {
            state.history.insert(record.name.clone(), record);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> MigrateResult<()> {
        self.transaction = None;
        self.log("rollback");
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> StatementResult {
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.log(format!("execute {sql}"));
        if sql.contains(INVALID) {
            return Err(format!("syntax error at or near \"{INVALID}\""));
        }
        match &mut self.transaction {
            Some(tx) => {
                if sql.contains("CONCURRENTLY") {
                    return Err("CREATE INDEX CONCURRENTLY cannot run inside a transaction block".into());
                }
                tx.statements.push(sql.to_string());
            }
            None => self.db.state.lock().unwrap().committed.push(sql.to_string()),
        }
        Ok(())
    }
}

fn config(dir: &Path) -> MigrationConfig {
    MigrationConfig::default().migrations_dir(dir)
}

fn create_users() -> Changeset {
    Changeset::new("public", OperationKind::CreateTable, Phase::Expand, priority::CREATE_TABLE)
        .table("users")
        .up(Statement::CreateTable {
            schema: "public".into(),
            table: "users".into(),
            columns: vec![
                ColumnInfo::parse("id", "integer").not_null(),
                ColumnInfo::parse("email", "text"),
            ],
        })
        .down(Statement::DropTable {
            schema: "public".into(),
            table: "users".into(),
        })
}

fn index_users_email() -> Changeset {
    let index = IndexInfo::new("users_email_idx", vec!["email".into()]);
    Changeset::new("public", OperationKind::CreateIndex, Phase::Expand, priority::CREATE_INDEX)
        .table("users")
        .up(Statement::CreateIndex {
            schema: "public".into(),
            table: "users".into(),
            index: index.clone(),
            concurrently: true,
        })
        .down(Statement::DropIndex {
            schema: "public".into(),
            name: index.name,
            concurrently: true,
        })
}

fn raw(sql: &str) -> Statement {
    Statement::Raw {
        sql: sql.to_string(),
        transactional: true,
    }
}

fn migration(name: &str, depends_on: Option<&str>, up: Vec<Statement>, down: Vec<Statement>) -> Migration {
    Migration {
        name: name.to_string(),
        depends_on: depends_on.map(str::to_string),
        transaction: true,
        phase: Phase::Expand,
        up,
        down,
    }
}

async fn write_rendered(dir: &Path) -> Vec<Migration> {
    let plan = PhasePlan {
        expand: vec![create_users(), index_users_email()],
        ..Default::default()
    };
    let migrations = MigrationRenderer::new().render(&plan, "users", None).unwrap();
    MigrationFileManager::new(dir).write_all(&migrations).await.unwrap();
    migrations
}

#[tokio::test]
async fn test_multiple_transactions() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = write_rendered(dir.path()).await;
    assert_eq!(migrations.len(), 2);
    assert!(migrations[0].transaction);
    assert!(!migrations[1].transaction);

    let db = SharedDatabase::default();
    let mut engine = MigrationEngine::new(config(dir.path()), db.session(1));
    let report = engine.apply().await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.applied.len(), 2);
    let committed = db.committed();
    assert!(committed[0].starts_with("CREATE TABLE \"public\".\"users\""));
    assert!(committed[1].starts_with("CREATE INDEX CONCURRENTLY"));
    for migration in &migrations {
        assert_eq!(db.record(&migration.name), Some(RecordState::Applied));
    }
    assert_eq!(
        report.states,
        vec![
            RunState::Idle,
            RunState::LockAcquired,
            RunState::Running,
            RunState::Success,
            RunState::LockReleased,
        ]
    );

    let status = engine.status().await.unwrap();
    assert!(status.pending.is_empty());
    assert_eq!(status.applied.len(), 2);
}

#[tokio::test]
async fn test_error_in_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let files = MigrationFileManager::new(dir.path());
    files
        .write_all(&[
            migration(
                "20240301120000001-a",
                None,
                vec![raw("CREATE TABLE a (id integer)")],
                vec![raw("DROP TABLE a")],
            ),
            migration(
                "20240301120000002-b",
                Some("20240301120000001-a"),
                vec![raw("CREATE TABLE b (id integer)"), raw("SELECT INVALID")],
                vec![raw("DROP TABLE b")],
            ),
        ])
        .await
        .unwrap();

    let db = SharedDatabase::default();
    let mut engine = MigrationEngine::new(config(dir.path()), db.session(1));
    let report = engine.apply().await.unwrap();

    assert_eq!(db.committed(), vec!["CREATE TABLE a (id integer);".to_string()]);
    assert_eq!(report.applied, vec!["20240301120000001-a".to_string()]);
    let failed = report.failed.as_ref().unwrap();
    assert_eq!(failed.name, "20240301120000002-b");
    assert_eq!(failed.executed, 1);
    assert!(failed.transactional);
    assert_eq!(db.record("20240301120000001-a"), Some(RecordState::Applied));
    assert_eq!(db.record("20240301120000002-b"), Some(RecordState::Failed));
    assert_eq!(
        &report.states[report.states.len() - 2..],
        &[RunState::Failed, RunState::LockReleased]
    );
    assert!(matches!(
        report.ensure_success(),
        Err(MigrationError::StatementExecution { .. })
    ));

    // The failed migration is retried on the next run.
    let pending = engine.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name(), "20240301120000002-b");
}

#[tokio::test]
async fn test_error_outside_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let mut backfill = migration(
        "20240301120000002-backfill",
        Some("20240301120000001-a"),
        vec![
            raw("UPDATE a SET id = 1"),
            raw("SELECT INVALID"),
            raw("UPDATE a SET id = 2"),
        ],
        Vec::new(),
    );
    backfill.transaction = false;
    MigrationFileManager::new(dir.path())
        .write_all(&[
            migration(
                "20240301120000001-a",
                None,
                vec![raw("CREATE TABLE a (id integer)")],
                vec![raw("DROP TABLE a")],
            ),
            backfill,
            migration(
                "20240301120000003-c",
                Some("20240301120000002-backfill"),
                vec![raw("CREATE TABLE c (id integer)")],
                vec![raw("DROP TABLE c")],
            ),
        ])
        .await
        .unwrap();

    let db = SharedDatabase::default();
    let mut engine = MigrationEngine::new(config(dir.path()), db.session(1));
    let report = engine.apply().await.unwrap();

    let failed = report.failed.as_ref().unwrap();
    assert_eq!(failed.name, "20240301120000002-backfill");
    assert_eq!(failed.executed, 1);
    assert!(!failed.transactional);
    assert!(failed.message.contains(INVALID));
    assert_eq!(report.applied, vec!["20240301120000001-a".to_string()]);

    // Statements before the failure stay applied; the run stops there.
    assert_eq!(
        db.committed(),
        vec![
            "CREATE TABLE a (id integer);".to_string(),
            "UPDATE a SET id = 1;".to_string(),
        ]
    );
    assert_eq!(db.record("20240301120000002-backfill"), Some(RecordState::Failed));
    assert_eq!(db.record("20240301120000003-c"), None);
    assert!(!db.events().iter().any(|(_, e)| e == "rollback"));

    match report.ensure_success() {
        Err(MigrationError::StatementExecution { migration, executed, .. }) => {
            assert_eq!(migration, "20240301120000002-backfill");
            assert_eq!(executed, 1);
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let pending: Vec<String> = engine
        .pending()
        .await
        .unwrap()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    assert_eq!(
        pending,
        vec!["20240301120000002-backfill", "20240301120000003-c"]
    );
}

#[tokio::test]
async fn test_history_failure_rolls_back_before_unlock() {
    let dir = tempfile::tempdir().unwrap();
    write_rendered(dir.path()).await;

    let db = SharedDatabase::default();
    let mut engine = MigrationEngine::new(config(dir.path()), db.session(1).failing_history());
    let err = engine.apply().await.unwrap_err();
    assert!(matches!(err, MigrationError::Database(ref m) if m.contains("history insert failed")));
    assert!(db.committed().is_empty());

    let events: Vec<String> = db
        .events()
        .into_iter()
        .map(|(_, e)| e)
        .filter(|e| !e.starts_with("execute"))
        .collect();
    assert_eq!(events, vec!["lock", "begin", "record failed", "rollback", "unlock"]);

    // The lock is free for the next run.
    let mut next = MigrationEngine::new(config(dir.path()), db.session(2));
    let report = tokio::time::timeout(Duration::from_secs(5), next.apply())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.applied.len(), 2);
    drop(engine);
}

#[tokio::test]
async fn test_rollback_to() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = write_rendered(dir.path()).await;

    let db = SharedDatabase::default();
    let mut engine = MigrationEngine::new(config(dir.path()), db.session(1));
    engine.apply().await.unwrap().ensure_success().unwrap();

    let report = engine.rollback_to(&migrations[0].name).await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        report.reverted,
        vec![migrations[1].name.clone(), migrations[0].name.clone()]
    );
    let committed = db.committed();
    assert!(committed[2].starts_with("DROP INDEX CONCURRENTLY"));
    assert!(committed[3].starts_with("DROP TABLE"));
    assert_eq!(db.record(&migrations[0].name), Some(RecordState::RolledBack));
    assert_eq!(engine.pending().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rollback_to_unknown_migration() {
    let dir = tempfile::tempdir().unwrap();
    write_rendered(dir.path()).await;

    let db = SharedDatabase::default();
    let mut engine = MigrationEngine::new(config(dir.path()), db.session(1));
    let err = engine.rollback_to("20200101000000001-missing").await.unwrap_err();
    assert!(matches!(err, MigrationError::NotFound(_)));

    // The lock was released despite the error.
    let events = db.events();
    assert_eq!(events.last().map(|(_, e)| e.as_str()), Some("unlock"));
}

#[tokio::test]
async fn test_edited_migration_is_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = write_rendered(dir.path()).await;

    let db = SharedDatabase::default();
    let mut engine = MigrationEngine::new(config(dir.path()), db.session(1));
    engine.apply().await.unwrap();

    let path = dir.path().join("expand").join(format!("{}.toml", migrations[0].name));
    let content = tokio::fs::read_to_string(&path).await.unwrap();
    tokio::fs::write(&path, content.replace("email", "mail")).await.unwrap();

    let err = engine.apply().await.unwrap_err();
    assert!(matches!(err, MigrationError::ChecksumMismatch { .. }));
    assert_eq!(db.committed().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_mutual_exclusion() {
    let dir = tempfile::tempdir().unwrap();
    write_rendered(dir.path()).await;

    let db = SharedDatabase::default();
    let mut first = MigrationEngine::new(config(dir.path()), db.session(1));
    let mut second = MigrationEngine::new(config(dir.path()), db.session(2));

    let a = tokio::spawn(async move { first.apply().await });
    let b = tokio::spawn(async move { second.apply().await });
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    // Each migration runs exactly once across both runs.
    assert_eq!(a.applied.len() + b.applied.len(), 2);
    assert_eq!(db.committed().len(), 2);

    // Between a session's lock and unlock, no other session does anything.
    let mut holder: Option<usize> = None;
    for (session, event) in db.events() {
        match event.as_str() {
            "lock" => {
                assert_eq!(holder, None, "session {session} locked while {holder:?} held the lock");
                holder = Some(session);
            }
            "unlock" => {
                assert_eq!(holder, Some(session));
                holder = None;
            }
            _ => assert_eq!(holder, Some(session), "session {session} ran without the lock"),
        }
    }
    assert_eq!(holder, None);
}
