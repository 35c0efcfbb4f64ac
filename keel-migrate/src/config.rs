//! Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// Default name of the history table.
pub const DEFAULT_HISTORY_TABLE: &str = "keel_migrations";

/// Default advisory lock key.
pub const DEFAULT_LOCK_KEY: i64 = 72_707_369;

/// Default minimum similarity for a table or column rename.
pub const DEFAULT_RENAME_THRESHOLD: f64 = 0.5;

/// Configuration for planning and applying migrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Root directory holding the `expand/`, `alter/` and `contract/` folders.
    pub migrations_dir: PathBuf,
    /// Name of the history table.
    pub history_table: String,
    /// Namespace holding the history table.
    pub history_schema: String,
    /// Advisory lock key shared by every process migrating the database.
    pub lock_key: i64,
    /// Minimum structural similarity for a rename, in `0.0..=1.0`.
    pub rename_threshold: f64,
    /// Build indexes on existing tables with `CONCURRENTLY`.
    pub concurrent_indexes: bool,
    /// Drop namespaces that exist in the database but are not declared.
    pub drop_undeclared_namespaces: bool,
    /// Namespaces never touched by the engine.
    pub ignored_namespaces: Vec<String>,
    /// Warning codes that abort planning.
    pub strict_warnings: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("./migrations"),
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            history_schema: "public".to_string(),
            lock_key: DEFAULT_LOCK_KEY,
            rename_threshold: DEFAULT_RENAME_THRESHOLD,
            concurrent_indexes: true,
            drop_undeclared_namespaces: false,
            ignored_namespaces: Vec::new(),
            strict_warnings: Vec::new(),
        }
    }
}

/// Layout of `keel.toml`: the engine settings live under `[migrations]`.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    migrations: MigrationConfig,
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a `keel.toml` file.
    pub fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> MigrateResult<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| MigrationError::configuration(format!("invalid keel.toml: {e}")))?;
        file.migrations.validate()?;
        Ok(file.migrations)
    }

    /// Check value ranges.
    pub fn validate(&self) -> MigrateResult<()> {
        if !(0.0..=1.0).contains(&self.rename_threshold) {
            return Err(MigrationError::configuration(format!(
                "rename_threshold must be between 0 and 1, got {}",
                self.rename_threshold
            )));
        }
        if self.history_table.is_empty() {
            return Err(MigrationError::configuration("history_table cannot be empty"));
        }
        Ok(())
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the history table name.
    pub fn history_table(mut self, table: impl Into<String>) -> Self {
        self.history_table = table.into();
        self
    }

    /// Set the advisory lock key.
    pub fn lock_key(mut self, key: i64) -> Self {
        self.lock_key = key;
        self
    }

    /// Set the rename similarity threshold.
    pub fn rename_threshold(mut self, threshold: f64) -> Self {
        self.rename_threshold = threshold;
        self
    }

    /// Toggle concurrent index builds.
    pub fn concurrent_indexes(mut self, enabled: bool) -> Self {
        self.concurrent_indexes = enabled;
        self
    }

    /// Toggle dropping of undeclared namespaces.
    pub fn drop_undeclared_namespaces(mut self, enabled: bool) -> Self {
        self.drop_undeclared_namespaces = enabled;
        self
    }

    /// Never touch this namespace.
    pub fn ignore_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.ignored_namespaces.push(namespace.into());
        self
    }

    /// Treat a warning code as fatal.
    pub fn strict_warning(mut self, code: impl Into<String>) -> Self {
        self.strict_warnings.push(code.into());
        self
    }
}
