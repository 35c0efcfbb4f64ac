//! Canonical schema model.
//!
//! A [`SchemaSnapshot`] describes one database namespace. It is produced both
//! by catalog introspection and by compiling declarative definitions, and the
//! two are compared structurally. Every map is keyed by a stable name;
//! ordering is always derived (sorted maps, [`SchemaSnapshot::table_priorities`])
//! and never depends on insertion order.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::default::DefaultValue;
use crate::types::SqlType;

/// Snapshot of a single namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Namespace (PostgreSQL schema) name.
    pub namespace: String,
    /// Tables keyed by name.
    pub tables: BTreeMap<String, TableInfo>,
    /// Indexes keyed by table, then index name.
    pub indexes: BTreeMap<String, BTreeMap<String, IndexInfo>>,
    /// Primary keys keyed by table.
    pub primary_keys: BTreeMap<String, PrimaryKeyInfo>,
    /// Unique constraints keyed by table, then constraint name.
    pub unique_constraints: BTreeMap<String, BTreeMap<String, UniqueConstraintInfo>>,
    /// Foreign keys keyed by table, then constraint name.
    pub foreign_keys: BTreeMap<String, BTreeMap<String, ForeignKeyInfo>>,
    /// Check constraints keyed by table, then constraint name.
    pub check_constraints: BTreeMap<String, BTreeMap<String, CheckConstraintInfo>>,
    /// Triggers keyed by table, then trigger name.
    pub triggers: BTreeMap<String, BTreeMap<String, TriggerInfo>>,
    /// Enum types keyed by name.
    pub enums: BTreeMap<String, EnumInfo>,
    /// Installed extensions.
    pub extensions: BTreeSet<String>,
    /// Namespaces that exist. Contains `namespace` itself once created.
    pub schemas: BTreeSet<String>,
}

impl SchemaSnapshot {
    /// Create an empty snapshot for a namespace that does not exist yet.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Create an empty snapshot for an existing namespace.
    pub fn existing(namespace: impl Into<String>) -> Self {
        let mut snapshot = Self::new(namespace);
        snapshot.schemas.insert(snapshot.namespace.clone());
        snapshot
    }

    /// Whether the snapshot holds no objects at all.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.enums.is_empty()
            && self.extensions.is_empty()
            && self.schemas.is_empty()
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    /// Get a column by table and column name.
    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnInfo> {
        self.tables.get(table).and_then(|t| t.columns.get(column))
    }

    /// Insert a table, replacing any table with the same name.
    pub fn add_table(&mut self, table: TableInfo) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Whether the column belongs to any constraint or index of its table.
    pub fn column_is_constrained(&self, table: &str, column: &str) -> bool {
        let has = |cols: &[String]| cols.iter().any(|c| c == column);
        self.primary_keys.get(table).is_some_and(|pk| has(&pk.columns))
            || self
                .unique_constraints
                .get(table)
                .is_some_and(|m| m.values().any(|u| has(&u.columns)))
    }

    /// Tables ordered so that every referenced table precedes the tables
    /// holding foreign keys to it.
    ///
    /// Ties are broken lexicographically. Tables caught in a reference cycle
    /// are appended in lexicographic order after everything else.
    pub fn table_priorities(&self) -> Vec<String> {
        let mut in_degree: BTreeMap<&str, usize> =
            self.tables.keys().map(|t| (t.as_str(), 0)).collect();
        let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for (table, fks) in &self.foreign_keys {
            if !self.tables.contains_key(table) {
                continue;
            }
            let targets: BTreeSet<&str> = fks
                .values()
                .filter(|fk| fk.references_namespace(&self.namespace))
                .map(|fk| fk.referenced_table.as_str())
                .filter(|t| *t != table.as_str() && self.tables.contains_key(*t))
                .collect();
            for target in targets {
                if dependents.entry(target).or_default().insert(table.as_str()) {
                    *in_degree.entry(table.as_str()).or_default() += 1;
                }
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(t, _)| *t)
            .collect();
        let mut order = Vec::with_capacity(self.tables.len());

        while let Some(table) = ready.pop_first() {
            order.push(table.to_string());
            if let Some(children) = dependents.get(table) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(child);
                        }
                    }
                }
            }
        }

        if order.len() < self.tables.len() {
            let placed: BTreeSet<String> = order.iter().cloned().collect();
            order.extend(self.tables.keys().filter(|t| !placed.contains(*t)).cloned());
        }
        order
    }
}

/// A table and its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name.
    pub name: String,
    /// Columns in declaration order. Equality ignores order.
    pub columns: IndexMap<String, ColumnInfo>,
}

impl TableInfo {
    /// Create a table without columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
        }
    }

    /// Add a column.
    pub fn column(mut self, column: ColumnInfo) -> Self {
        self.add_column(column);
        self
    }

    /// Insert a column, replacing any column with the same name.
    pub fn add_column(&mut self, column: ColumnInfo) {
        self.columns.insert(column.name.clone(), column);
    }
}

/// Identity column generation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityGeneration {
    /// `GENERATED ALWAYS AS IDENTITY`
    Always,
    /// `GENERATED BY DEFAULT AS IDENTITY`
    ByDefault,
}

impl IdentityGeneration {
    /// SQL keyword for this mode.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Always => "ALWAYS",
            Self::ByDefault => "BY DEFAULT",
        }
    }
}

/// A column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Base data type, canonical spelling, without modifiers.
    pub data_type: String,
    /// Whether the column accepts NULL.
    pub is_nullable: bool,
    /// Default expression.
    pub default: Option<DefaultValue>,
    /// Precision for numeric types.
    pub numeric_precision: Option<i32>,
    /// Scale for numeric types.
    pub numeric_scale: Option<i32>,
    /// Maximum length for character types.
    pub character_maximum_length: Option<i32>,
    /// Fractional seconds precision for time types.
    pub datetime_precision: Option<i32>,
    /// Identity generation, if this is an identity column.
    pub identity: Option<IdentityGeneration>,
    /// Whether `data_type` names a user-defined type (enum) of the namespace.
    #[serde(default)]
    pub user_defined: bool,
}

impl ColumnInfo {
    /// Create a nullable column of the given type.
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            data_type: ty.base,
            is_nullable: true,
            default: None,
            numeric_precision: ty.numeric_precision,
            numeric_scale: ty.numeric_scale,
            character_maximum_length: ty.character_maximum_length,
            datetime_precision: ty.datetime_precision,
            identity: None,
            user_defined: false,
        }
    }

    /// Create a nullable column from a type spelling.
    pub fn parse(name: impl Into<String>, ty: &str) -> Self {
        Self::new(name, SqlType::parse(ty))
    }

    /// Mark the column `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Set the default expression.
    pub fn default_expr(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(DefaultValue::new(expression));
        self
    }

    /// Make this an identity column.
    pub fn identity(mut self, generation: IdentityGeneration) -> Self {
        self.identity = Some(generation);
        self.is_nullable = false;
        self
    }

    /// The type with its modifiers.
    pub fn sql_type(&self) -> SqlType {
        SqlType {
            base: self.data_type.clone(),
            character_maximum_length: self.character_maximum_length,
            numeric_precision: self.numeric_precision,
            numeric_scale: self.numeric_scale,
            datetime_precision: self.datetime_precision,
        }
    }

    /// Full type spelling such as `character varying(255)`.
    pub fn full_data_type(&self) -> String {
        self.sql_type().render()
    }

    /// Whether this column uses a serial pseudo-type.
    pub fn is_serial(&self) -> bool {
        self.sql_type().is_serial()
    }
}

/// An index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Indexed columns or expressions.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    pub unique: bool,
    /// Access method, e.g. `btree`.
    pub method: String,
    /// Partial index predicate.
    pub predicate: Option<String>,
}

impl IndexInfo {
    /// Create a non-unique btree index.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
            method: "btree".to_string(),
            predicate: None,
        }
    }
}

/// A primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyInfo {
    /// Constraint name.
    pub name: String,
    /// Key columns in order.
    pub columns: Vec<String>,
}

/// A unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraintInfo {
    /// Constraint name.
    pub name: String,
    /// Constrained columns in order.
    pub columns: Vec<String>,
    /// `NULLS DISTINCT` (the PostgreSQL default) or `NULLS NOT DISTINCT`.
    pub nulls_distinct: bool,
}

/// Foreign key `ON DELETE` / `ON UPDATE` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    /// `NO ACTION`
    #[default]
    NoAction,
    /// `RESTRICT`
    Restrict,
    /// `CASCADE`
    Cascade,
    /// `SET NULL`
    SetNull,
    /// `SET DEFAULT`
    SetDefault,
}

impl ReferentialAction {
    /// SQL spelling.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// Decode the `confdeltype`/`confupdtype` catalog character.
    pub fn from_catalog(code: &str) -> Self {
        match code {
            "r" => Self::Restrict,
            "c" => Self::Cascade,
            "n" => Self::SetNull,
            "d" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }
}

/// A foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    /// Constraint name.
    pub name: String,
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Namespace of the referenced table, when it differs from the owner's.
    pub referenced_schema: Option<String>,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced columns.
    pub referenced_columns: Vec<String>,
    /// `ON DELETE` action.
    pub on_delete: ReferentialAction,
    /// `ON UPDATE` action.
    pub on_update: ReferentialAction,
}

impl ForeignKeyInfo {
    /// Whether the referenced table lives in `namespace`.
    pub fn references_namespace(&self, namespace: &str) -> bool {
        self.referenced_schema.as_deref().is_none_or(|s| s == namespace)
    }
}

/// A check constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConstraintInfo {
    /// Constraint name.
    pub name: String,
    /// Normalized boolean expression, without the `CHECK` keyword.
    pub expression: String,
}

/// A trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    /// Trigger name.
    pub name: String,
    /// Full `CREATE TRIGGER` statement as `pg_get_triggerdef` prints it.
    pub definition: String,
}

/// An enum type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumInfo {
    /// Type name.
    pub name: String,
    /// Labels in sort order.
    pub values: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fk(name: &str, column: &str, target: &str) -> ForeignKeyInfo {
        ForeignKeyInfo {
            name: name.to_string(),
            columns: vec![column.to_string()],
            referenced_schema: None,
            referenced_table: target.to_string(),
            referenced_columns: vec!["id".to_string()],
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }
    }

    fn with_fk(snapshot: &mut SchemaSnapshot, table: &str, column: &str, target: &str) {
        let name = format!("{table}_{column}_fkey");
        snapshot
            .foreign_keys
            .entry(table.to_string())
            .or_default()
            .insert(name.clone(), fk(&name, column, target));
    }

    #[test]
    fn test_table_priorities_referenced_first() {
        let mut snapshot = SchemaSnapshot::existing("public");
        for name in ["videos", "users", "posters"] {
            snapshot.add_table(TableInfo::new(name));
        }
        with_fk(&mut snapshot, "videos", "user_id", "users");
        with_fk(&mut snapshot, "posters", "video_id", "videos");

        assert_eq!(snapshot.table_priorities(), vec!["users", "videos", "posters"]);
    }

    #[test]
    fn test_table_priorities_ignores_self_reference_and_keeps_cycles() {
        let mut snapshot = SchemaSnapshot::existing("public");
        for name in ["a", "b", "c", "tree"] {
            snapshot.add_table(TableInfo::new(name));
        }
        with_fk(&mut snapshot, "tree", "parent_id", "tree");
        with_fk(&mut snapshot, "a", "b_id", "b");
        with_fk(&mut snapshot, "b", "a_id", "a");

        assert_eq!(snapshot.table_priorities(), vec!["c", "tree", "a", "b"]);
    }

    #[test]
    fn test_column_equality_ignores_order() {
        let a = TableInfo::new("t")
            .column(ColumnInfo::parse("id", "integer"))
            .column(ColumnInfo::parse("name", "text"));
        let b = TableInfo::new("t")
            .column(ColumnInfo::parse("name", "text"))
            .column(ColumnInfo::parse("id", "integer"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_full_data_type() {
        let column = ColumnInfo::parse("email", "varchar(255)").not_null();
        assert_eq!(column.data_type, "character varying");
        assert_eq!(column.full_data_type(), "character varying(255)");
        assert!(!column.is_nullable);
    }

    #[test]
    fn test_column_is_constrained() {
        let mut snapshot = SchemaSnapshot::existing("public");
        snapshot.add_table(TableInfo::new("users").column(ColumnInfo::parse("id", "int")));
        snapshot.primary_keys.insert(
            "users".to_string(),
            PrimaryKeyInfo {
                name: "users_pkey".to_string(),
                columns: vec!["id".to_string()],
            },
        );
        assert!(snapshot.column_is_constrained("users", "id"));
        assert!(!snapshot.column_is_constrained("users", "email"));
    }
}
