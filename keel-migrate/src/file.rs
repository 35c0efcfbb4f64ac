//! Migration file management.
//!
//! Artifacts live under the migrations root in one directory per phase:
//!
//! ```text
//! migrations/
//!   expand/20240301123000001-add-users.toml
//!   alter/...
//!   contract/...
//! ```
//!
//! Each file carries a `[migration]` header and ordered `[[up]]`/`[[down]]`
//! statement lists.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::changeset::Phase;
use crate::ddl::Statement;
use crate::error::{MigrateResult, MigrationError};
use crate::render::Migration;

/// A migration file on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationFile {
    /// Path to the migration file.
    pub path: PathBuf,
    pub migration: Migration,
    /// SHA-256 of the file content.
    pub checksum: String,
}

impl MigrationFile {
    /// Name of the migration.
    pub fn name(&self) -> &str {
        &self.migration.name
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactHeader {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    depends_on: Option<String>,
    #[serde(default = "default_transaction")]
    transaction: bool,
}

fn default_transaction() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct Artifact {
    migration: ArtifactHeader,
    #[serde(default)]
    up: Vec<Statement>,
    #[serde(default)]
    down: Vec<Statement>,
}

/// Serialize a migration to its on-disk text.
pub fn to_artifact(migration: &Migration) -> MigrateResult<String> {
    let artifact = Artifact {
        migration: ArtifactHeader {
            name: migration.name.clone(),
            depends_on: migration.depends_on.clone(),
            transaction: migration.transaction,
        },
        up: migration.up.clone(),
        down: migration.down.clone(),
    };
    Ok(toml::to_string(&artifact)?)
}

/// Parse on-disk text into a migration of the given phase.
pub fn from_artifact(content: &str, phase: Phase) -> MigrateResult<Migration> {
    let artifact: Artifact = toml::from_str(content)?;
    Ok(Migration {
        name: artifact.migration.name,
        depends_on: artifact.migration.depends_on,
        transaction: artifact.migration.transaction,
        phase,
        up: artifact.up,
        down: artifact.down,
    })
}

/// Compute the checksum of artifact content.
pub fn compute_checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Migration file reader/writer.
#[derive(Debug, Clone)]
pub struct MigrationFileManager {
    /// Root directory holding the phase directories.
    migrations_dir: PathBuf,
}

impl MigrationFileManager {
    /// Create a new file manager.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Get the migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Directory of one phase.
    pub fn phase_dir(&self, phase: Phase) -> PathBuf {
        self.migrations_dir.join(phase.as_str())
    }

    /// Ensure the phase directories exist.
    pub async fn ensure_dirs(&self) -> MigrateResult<()> {
        for phase in Phase::ALL {
            tokio::fs::create_dir_all(self.phase_dir(phase)).await?;
        }
        Ok(())
    }

    /// Write a migration to disk.
    pub async fn write_migration(&self, migration: &Migration) -> MigrateResult<PathBuf> {
        let dir = self.phase_dir(migration.phase);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.toml", migration.name));
        if tokio::fs::try_exists(&path).await? {
            return Err(MigrationError::migration_file(format!(
                "{} already exists",
                path.display()
            )));
        }
        tokio::fs::write(&path, to_artifact(migration)?).await?;
        debug!(path = %path.display(), "Wrote migration");
        Ok(path)
    }

    /// Write rendered migrations in order.
    pub async fn write_all(&self, migrations: &[Migration]) -> MigrateResult<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(migrations.len());
        for migration in migrations {
            paths.push(self.write_migration(migration).await?);
        }
        Ok(paths)
    }

    /// List all migration files, unordered.
    pub async fn list_migrations(&self) -> MigrateResult<Vec<MigrationFile>> {
        let mut migrations = Vec::new();

        for phase in Phase::ALL {
            let dir = self.phase_dir(phase);
            if !tokio::fs::try_exists(&dir).await? {
                continue;
            }

            let mut paths = Vec::new();
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    paths.push(path);
                }
            }
            paths.sort();

            for path in paths {
                migrations.push(self.read_migration(&path, phase).await?);
            }
        }
        Ok(migrations)
    }

    async fn read_migration(&self, path: &Path, phase: Phase) -> MigrateResult<MigrationFile> {
        let content = tokio::fs::read_to_string(path).await?;
        let migration = from_artifact(&content, phase).map_err(|e| {
            MigrationError::migration_file(format!("{}: {e}", path.display()))
        })?;

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem != migration.name {
            return Err(MigrationError::migration_file(format!(
                "{} declares name '{}'",
                path.display(),
                migration.name
            )));
        }

        Ok(MigrationFile {
            path: path.to_path_buf(),
            migration,
            checksum: compute_checksum(&content),
        })
    }

    /// All migrations in `depends_on` order.
    pub async fn load_chain(&self) -> MigrateResult<Vec<MigrationFile>> {
        order_chain(self.list_migrations().await?)
    }

    /// Name of the newest migration, the parent of the next rendered one.
    pub async fn latest(&self) -> MigrateResult<Option<String>> {
        Ok(self
            .load_chain()
            .await?
            .last()
            .map(|f| f.migration.name.clone()))
    }
}

/// Order migrations along their `depends_on` links.
///
/// The history must form a single linear sequence: exactly one root, no
/// dangling parents, no parent shared by two children and no cycles.
pub fn order_chain(files: Vec<MigrationFile>) -> MigrateResult<Vec<MigrationFile>> {
    if files.is_empty() {
        return Ok(files);
    }

    let mut by_name: HashMap<String, MigrationFile> = HashMap::new();
    for file in files {
        let name = file.migration.name.clone();
        if let Some(existing) = by_name.insert(name.clone(), file) {
            return Err(MigrationError::chain(format!(
                "migration '{name}' is defined twice ({})",
                existing.path.display()
            )));
        }
    }

    let mut roots = Vec::new();
    let mut children: HashMap<&str, &str> = HashMap::new();
    let mut names: Vec<&String> = by_name.keys().collect();
    names.sort();
    for name in names {
        match by_name[name].migration.depends_on.as_deref() {
            None => roots.push(name.as_str()),
            Some(parent) => {
                if !by_name.contains_key(parent) {
                    return Err(MigrationError::chain(format!(
                        "migration '{name}' depends on missing migration '{parent}'"
                    )));
                }
                if let Some(sibling) = children.insert(parent, name.as_str()) {
                    return Err(MigrationError::chain(format!(
                        "migrations '{sibling}' and '{name}' both depend on '{parent}'"
                    )));
                }
            }
        }
    }

    let root = match roots.as_slice() {
        [root] => root.to_string(),
        [] => return Err(MigrationError::chain("no root migration; the history has a cycle")),
        many => {
            return Err(MigrationError::chain(format!(
                "multiple root migrations: {}",
                many.join(", ")
            )));
        }
    };

    let mut order = vec![root.clone()];
    let mut seen: HashSet<String> = HashSet::from([root.clone()]);
    let mut current = root;
    while let Some(next) = children.get(current.as_str()) {
        if !seen.insert(next.to_string()) {
            break;
        }
        order.push(next.to_string());
        current = next.to_string();
    }
    if order.len() != by_name.len() {
        return Err(MigrationError::chain(
            "some migrations are unreachable from the root; the history has a cycle",
        ));
    }

    Ok(order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect())
}
