//! Migration rendering.
//!
//! Turns an assembled [`PhasePlan`] into [`Migration`] artifacts: one per
//! phase, plus one isolated artifact per changeset that cannot run inside a
//! transaction block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::changeset::{Changeset, Phase};
use crate::ddl::Statement;
use crate::error::{MigrateResult, MigrationError};
use crate::phase::PhasePlan;

/// Largest sequence number that fits the three-digit name field.
pub const MAX_MIGRATIONS_PER_RENDER: usize = 999;

/// A migration artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    /// Sortable unique name: `<timestamp><sequence>-<slug>`.
    pub name: String,
    /// Previous migration in the chain.
    pub depends_on: Option<String>,
    /// Whether the migration runs inside a transaction.
    pub transaction: bool,
    pub phase: Phase,
    pub up: Vec<Statement>,
    pub down: Vec<Statement>,
}

impl Migration {
    /// Whether the migration can be rolled back.
    pub fn is_reversible(&self) -> bool {
        !self.down.is_empty() || self.up.is_empty()
    }
}

/// Renders plans into migration artifacts.
#[derive(Debug, Clone)]
pub struct MigrationRenderer {
    timestamp: DateTime<Utc>,
}

impl Default for MigrationRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationRenderer {
    /// Renderer stamping names with the current time.
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
        }
    }

    /// Renderer with a fixed timestamp.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self { timestamp }
    }

    /// Render `plan` under the human-supplied `name`.
    ///
    /// The first artifact depends on `previous`, the latest migration already
    /// on disk; every following artifact depends on the one before it.
    pub fn render(
        &self,
        plan: &PhasePlan,
        name: &str,
        previous: Option<&str>,
    ) -> MigrateResult<Vec<Migration>> {
        if plan.is_empty() {
            return Err(MigrationError::NoChanges);
        }
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(MigrationError::configuration(format!(
                "migration name '{name}' contains no letters or digits"
            )));
        }

        let stamp = self.timestamp.format("%Y%m%d%H%M%S");
        let mut depends_on = previous.map(str::to_string);
        let mut migrations = Vec::new();

        let count: usize = plan
            .phases()
            .map(|(_, changesets)| split_transactional(changesets).len())
            .sum();
        if count > MAX_MIGRATIONS_PER_RENDER {
            return Err(MigrationError::configuration(format!(
                "plan needs {count} migrations; at most {MAX_MIGRATIONS_PER_RENDER} fit in one render"
            )));
        }

        for (phase, changesets) in plan.phases() {
            for group in split_transactional(changesets) {
                let name = format!("{stamp}{:03}-{slug}", migrations.len() + 1);
                let migration = Migration {
                    name: name.clone(),
                    depends_on: depends_on.replace(name),
                    transaction: group.iter().all(|c| !c.requires_no_transaction()),
                    phase,
                    up: group.iter().flat_map(|c| c.up.iter().cloned()).collect(),
                    down: group
                        .iter()
                        .rev()
                        .flat_map(|c| c.down.iter().cloned())
                        .collect(),
                };
                migrations.push(migration);
            }
        }
        Ok(migrations)
    }
}

/// Consecutive transactional changesets share a group; every changeset that
/// must run outside a transaction gets a group of its own.
fn split_transactional(changesets: &[Changeset]) -> Vec<&[Changeset]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for (i, changeset) in changesets.iter().enumerate() {
        if changeset.requires_no_transaction() {
            if start < i {
                groups.push(&changesets[start..i]);
            }
            groups.push(&changesets[i..=i]);
            start = i + 1;
        }
    }
    if start < changesets.len() {
        groups.push(&changesets[start..]);
    }
    groups
}

/// Lower-case, dash-separated form of a migration name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{OperationKind, priority};
    use chrono::TimeZone;
    use keel_schema::{ColumnInfo, IndexInfo};

    fn renderer() -> MigrationRenderer {
        MigrationRenderer::at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
    }

    fn create_table() -> Changeset {
        Changeset::new("public", OperationKind::CreateTable, Phase::Expand, priority::CREATE_TABLE)
            .table("users")
            .up(Statement::CreateTable {
                schema: "public".into(),
                table: "users".into(),
                columns: vec![ColumnInfo::parse("email", "text")],
            })
            .down(Statement::DropTable {
                schema: "public".into(),
                table: "users".into(),
            })
    }

    fn concurrent_index() -> Changeset {
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

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add users table!"), "add-users-table");
        assert_eq!(slugify("  --  "), "");
    }

    #[test]
    fn test_non_transactional_changeset_is_isolated() {
        let plan = PhasePlan {
            expand: vec![create_table(), concurrent_index()],
            ..Default::default()
        };
        let migrations = renderer()
            .render(&plan, "users", Some("20240101000000001-init"))
            .unwrap();

        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].name, "20240301123000001-users");
        assert_eq!(migrations[0].depends_on.as_deref(), Some("20240101000000001-init"));
        assert!(migrations[0].transaction);
        assert_eq!(migrations[1].depends_on.as_deref(), Some("20240301123000001-users"));
        assert!(!migrations[1].transaction);
        assert_eq!(migrations[1].up.len(), 1);
    }

    #[test]
    fn test_down_reverses_changesets() {
        let add_column = Changeset::new("public", OperationKind::CreateColumn, Phase::Expand, priority::CREATE_COLUMN)
            .table("users")
            .up(Statement::AddColumn {
                schema: "public".into(),
                table: "users".into(),
                column: ColumnInfo::parse("name", "text"),
            })
            .down(Statement::DropColumn {
                schema: "public".into(),
                table: "users".into(),
                column: "name".into(),
            });
        let plan = PhasePlan {
            expand: vec![create_table(), add_column],
            ..Default::default()
        };
        let migrations = renderer().render(&plan, "users", None).unwrap();
        assert_eq!(migrations.len(), 1);
        assert!(matches!(migrations[0].down[0], Statement::DropColumn { .. }));
        assert!(matches!(migrations[0].down[1], Statement::DropTable { .. }));
    }

    #[test]
    fn test_one_migration_per_phase() {
        let drop = Changeset::new("public", OperationKind::DropTable, Phase::Contract, priority::DROP_TABLE)
            .table("legacy")
            .up(Statement::DropTable {
                schema: "public".into(),
                table: "legacy".into(),
            });
        let plan = PhasePlan {
            expand: vec![create_table()],
            contract: vec![drop],
            ..Default::default()
        };
        let migrations = renderer().render(&plan, "swap", None).unwrap();
        let phases: Vec<Phase> = migrations.iter().map(|m| m.phase).collect();
        assert_eq!(phases, vec![Phase::Expand, Phase::Contract]);
    }

    #[test]
    fn test_sequence_overflow_is_rejected() {
        let plan = PhasePlan {
            expand: vec![concurrent_index(); MAX_MIGRATIONS_PER_RENDER],
            ..Default::default()
        };
        let migrations = renderer().render(&plan, "indexes", None).unwrap();
        assert_eq!(migrations.last().unwrap().name, "20240301123000999-indexes");

        let plan = PhasePlan {
            expand: vec![concurrent_index(); MAX_MIGRATIONS_PER_RENDER + 1],
            ..Default::default()
        };
        let err = renderer().render(&plan, "indexes", None).unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
    }

    #[test]
    fn test_empty_plan_has_no_changes() {
        let err = renderer().render(&PhasePlan::default(), "noop", None).unwrap_err();
        assert!(matches!(err, MigrationError::NoChanges));
    }
}
