//! Error types for the migration engine.

use miette::Diagnostic;
use thiserror::Error;

use keel_schema::SchemaError;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur while planning or applying migrations.
#[derive(Debug, Error, Diagnostic)]
pub enum MigrationError {
    /// Invalid declarative schema or configuration.
    #[error("Configuration error: {0}")]
    #[diagnostic(code(keel::migrate::configuration))]
    Configuration(String),

    /// The local schema failed to compile.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    /// Reading the live catalog failed.
    #[error("Introspection failed: {0}")]
    #[diagnostic(code(keel::migrate::introspection))]
    Introspection(String),

    /// Two candidates match a rename equally well.
    #[error(
        "Ambiguous rename in `{namespace}`: `{from}` matches {} equally (score {score:.2})",
        .candidates.join(", ")
    )]
    #[diagnostic(
        code(keel::migrate::rename_ambiguity),
        help("pass an explicit rename mapping to resolve the ambiguity")
    )]
    RenameAmbiguity {
        /// Namespace of the entity.
        namespace: String,
        /// Table (or `table.column`) that disappeared.
        from: String,
        /// Equally scored replacements.
        candidates: Vec<String>,
        /// Shared similarity score.
        score: f64,
    },

    /// The on-disk `depends_on` chain is broken or branches.
    #[error("Migration history is inconsistent: {0}")]
    #[diagnostic(code(keel::migrate::chain_integrity))]
    ChainIntegrity(String),

    /// Lock acquisition failed.
    #[error("Failed to acquire migration lock: {0}")]
    #[diagnostic(code(keel::migrate::lock))]
    LockFailed(String),

    /// A statement failed while applying or reverting a migration.
    #[error("Migration '{migration}' failed after {executed} statement(s): {message}")]
    #[diagnostic(code(keel::migrate::statement_execution))]
    StatementExecution {
        /// Migration name.
        migration: String,
        /// Statements that completed before the failure.
        executed: usize,
        /// Database error message.
        message: String,
        /// Whether the migration ran inside a transaction.
        transactional: bool,
    },

    /// A warning the caller asked to treat as fatal.
    #[error("Strict mode rejected warning {code}: {message}")]
    #[diagnostic(code(keel::migrate::strict_warning))]
    StrictWarning {
        /// Warning code, e.g. `D002`.
        code: String,
        /// Description of the offending change.
        message: String,
    },

    /// File system error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(keel::migrate::io))]
    Io(#[from] std::io::Error),

    /// Database operation error.
    #[error("Database error: {0}")]
    #[diagnostic(code(keel::migrate::database))]
    Database(String),

    /// Invalid migration file or format.
    #[error("Invalid migration: {0}")]
    #[diagnostic(code(keel::migrate::invalid_migration))]
    InvalidMigration(String),

    /// Migration checksum mismatch.
    #[error("Checksum mismatch for migration '{id}': expected {expected}, got {actual}")]
    #[diagnostic(
        code(keel::migrate::checksum_mismatch),
        help("applied migrations must not be edited; create a new migration instead")
    )]
    ChecksumMismatch {
        /// Migration name.
        id: String,
        /// Checksum recorded when it was applied.
        expected: String,
        /// Checksum of the file on disk.
        actual: String,
    },

    /// Migration not found.
    #[error("Migration '{0}' not found")]
    #[diagnostic(code(keel::migrate::not_found))]
    NotFound(String),

    /// No changes to migrate.
    #[error("No schema changes detected")]
    #[diagnostic(code(keel::migrate::no_changes))]
    NoChanges,

    /// Serialization of an artifact or snapshot failed.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(keel::migrate::serialization))]
    Serialization(String),
}

impl MigrationError {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an introspection error.
    pub fn introspection(msg: impl Into<String>) -> Self {
        Self::Introspection(msg.into())
    }

    /// Create a chain integrity error.
    pub fn chain(msg: impl Into<String>) -> Self {
        Self::ChainIntegrity(msg.into())
    }

    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a lock failed error.
    pub fn lock_failed(msg: impl Into<String>) -> Self {
        Self::LockFailed(msg.into())
    }

    /// Create a migration file error.
    pub fn migration_file(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether the error was raised before touching the database.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::Schema(_)
                | Self::RenameAmbiguity { .. }
                | Self::ChainIntegrity(_)
                | Self::StrictWarning { .. }
                | Self::ChecksumMismatch { .. }
        )
    }
}

impl From<toml::de::Error> for MigrationError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for MigrationError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
