//! Changeset generators.
//!
//! Each entity kind has one generator that recognizes its own difference
//! paths and turns them into [`Changeset`]s: reversible DDL operations with a
//! priority and optional warnings. A generator returns `None` for paths it
//! does not own, so the dispatcher can offer the difference to the next one.

mod column;
mod constraint;
mod enums;
mod extension;
mod index;
mod primary_key;
pub mod priority;
mod rename;
mod schema;
mod table;
mod trigger;
mod warning;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use keel_schema::SchemaSnapshot;

use crate::config::MigrationConfig;
use crate::ddl::Statement;
use crate::diff::Difference;

pub use rename::rename_changesets;
pub use warning::{Warning, WarningCode, WarningType};

/// Rollout phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Purely additive changes.
    Expand,
    /// In-place mutations and renames.
    Alter,
    /// Removals.
    Contract,
}

impl Phase {
    /// Phases in application order.
    pub const ALL: [Phase; 3] = [Phase::Expand, Phase::Alter, Phase::Contract];

    /// Directory name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expand => "expand",
            Self::Alter => "alter",
            Self::Contract => "contract",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateSchema,
    DropSchema,
    CreateExtension,
    DropExtension,
    CreateEnum,
    DropEnum,
    ChangeEnum,
    CreateTable,
    DropTable,
    RenameTable,
    CreateColumn,
    DropColumn,
    ChangeColumn,
    RenameColumn,
    CreateIndex,
    DropIndex,
    ChangeIndex,
    CreatePrimaryKey,
    DropPrimaryKey,
    UpdatePrimaryKey,
    CreateUniqueConstraint,
    DropUniqueConstraint,
    ChangeUniqueConstraint,
    CreateForeignKey,
    DropForeignKey,
    ChangeForeignKey,
    CreateCheckConstraint,
    DropCheckConstraint,
    ChangeCheckConstraint,
    CreateTrigger,
    DropTrigger,
    ReplaceTrigger,
}

/// One reversible DDL operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    /// Namespace.
    pub schema: String,
    /// Table addressed, under its local name.
    pub table_name: Option<String>,
    pub kind: OperationKind,
    pub phase: Phase,
    /// Ordering key within a phase; see [`priority`].
    pub priority: i32,
    pub up: Vec<Statement>,
    /// Exact inverse of `up`, in application order.
    pub down: Vec<Statement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl Changeset {
    /// Create an empty changeset.
    pub fn new(schema: impl Into<String>, kind: OperationKind, phase: Phase, priority: i32) -> Self {
        Self {
            schema: schema.into(),
            table_name: None,
            kind,
            phase,
            priority,
            up: Vec::new(),
            down: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    pub fn up(mut self, statement: Statement) -> Self {
        self.up.push(statement);
        self
    }

    pub fn down(mut self, statement: Statement) -> Self {
        self.down.push(statement);
        self
    }

    pub fn warn(mut self, warning: Warning) -> Self {
        self.warnings.push(warning);
        self
    }

    /// Whether any `up` statement must run outside a transaction.
    pub fn requires_no_transaction(&self) -> bool {
        self.up.iter().any(Statement::requires_no_transaction)
    }

    /// Whether the changeset touches `table`, directly or as a foreign key target.
    pub fn addresses_table(&self, table: &str) -> bool {
        if self.table_name.as_deref() == Some(table) {
            return true;
        }
        self.up.iter().chain(&self.down).any(|s| match s {
            Statement::AddForeignKey { constraint, .. } => constraint.referenced_table == table,
            other => other.table() == Some(table),
        })
    }
}

/// Everything a generator may consult.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorContext<'a> {
    /// Desired state.
    pub local: &'a SchemaSnapshot,
    /// Current state, rewritten under rename mappings.
    pub remote: &'a SchemaSnapshot,
    pub config: &'a MigrationConfig,
}

impl GeneratorContext<'_> {
    /// Namespace being diffed.
    pub fn namespace(&self) -> &str {
        &self.local.namespace
    }

    /// Whether a table exists on both sides, i.e. already holds rows.
    pub fn is_existing_table(&self, table: &str) -> bool {
        self.remote.tables.contains_key(table) && self.local.tables.contains_key(table)
    }

    /// Whether the table is being dropped as a whole.
    pub fn is_dropped_table(&self, table: &str) -> bool {
        self.remote.tables.contains_key(table) && !self.local.tables.contains_key(table)
    }

    /// Whether the table is being created.
    pub fn is_new_table(&self, table: &str) -> bool {
        self.local.tables.contains_key(table) && !self.remote.tables.contains_key(table)
    }
}

/// Per-table named entries addressed by a difference under `root`.
///
/// Handles both `root/<table>/<name>` and whole-table containers
/// `root/<table>` that appear or disappear with all their entries.
pub(super) fn named_entries(diff: &Difference, root: &str) -> Option<Vec<(String, String)>> {
    if diff.segment(0) != Some(root) {
        return None;
    }
    let table = diff.segment(1)?.to_string();
    match diff.path.len() {
        3 => Some(vec![(table, diff.path[2].clone())]),
        2 => {
            let container = diff.new_value.as_ref().or(diff.old_value.as_ref())?;
            let names = container.as_object()?.keys();
            Some(names.map(|name| (table.clone(), name.clone())).collect())
        }
        _ => None,
    }
}

/// A changeset generator.
pub type Generator = fn(&Difference, &GeneratorContext<'_>) -> Option<Vec<Changeset>>;

/// Generators in dispatch order.
pub const GENERATORS: &[Generator] = &[
    schema::generate,
    extension::generate,
    enums::generate,
    table::generate,
    column::generate,
    primary_key::generate,
    index::generate,
    constraint::generate,
    trigger::generate,
];

/// Turn differences into changesets.
pub fn generate_changesets(
    differences: &[Difference],
    ctx: &GeneratorContext<'_>,
) -> Vec<Changeset> {
    let mut changesets = Vec::new();
    for difference in differences {
        match GENERATORS.iter().find_map(|generate| generate(difference, ctx)) {
            Some(generated) => changesets.extend(generated),
            None => debug!(difference = %difference, "No generator for difference"),
        }
    }
    changesets
}
