//! Catalog introspection.
//!
//! A [`CatalogSource`] returns raw catalog rows for one namespace; the
//! [`SnapshotBuilder`] normalizes them into a [`SchemaSnapshot`] that compares
//! equal to what the local compiler produces for the same schema. Keeping the
//! normalization out of the driver makes it testable without a database.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use keel_schema::compiler::{normalize_index_element, normalize_whitespace};
use keel_schema::default::normalize_expression;
use keel_schema::{
    CheckConstraintInfo, ColumnInfo, EnumInfo, ForeignKeyInfo, IdentityGeneration, IndexInfo,
    PrimaryKeyInfo, ReferentialAction, SchemaSnapshot, SqlType, TableInfo, TriggerInfo,
    UniqueConstraintInfo,
};

use crate::config::{DEFAULT_HISTORY_TABLE, MigrationConfig};
use crate::error::{MigrateResult, MigrationError};

/// Configuration for introspection.
#[derive(Debug, Clone)]
pub struct IntrospectionConfig {
    /// Tables to exclude. The history table is always excluded.
    pub exclude_tables: Vec<String>,
    /// Whether to include enums.
    pub include_enums: bool,
    /// Whether to include triggers.
    pub include_triggers: bool,
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self {
            exclude_tables: vec![DEFAULT_HISTORY_TABLE.to_string()],
            include_enums: true,
            include_triggers: true,
        }
    }
}

impl IntrospectionConfig {
    /// Create a new introspection config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration excluding the history table named in `config`.
    pub fn for_migrations(config: &MigrationConfig) -> Self {
        Self::default().exclude_table(config.history_table.clone())
    }

    /// Exclude a table.
    pub fn exclude_table(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        if !self.exclude_tables.contains(&table) {
            self.exclude_tables.push(table);
        }
        self
    }

    /// Whether to include enums.
    pub fn include_enums(mut self, include: bool) -> Self {
        self.include_enums = include;
        self
    }

    /// Whether to include triggers.
    pub fn include_triggers(mut self, include: bool) -> Self {
        self.include_triggers = include;
        self
    }

    /// Check if a table should be included.
    pub fn should_include_table(&self, name: &str) -> bool {
        !self.exclude_tables.iter().any(|t| t == name)
    }
}

/// Raw column row.
#[derive(Debug, Clone)]
pub struct RawColumn {
    pub table: String,
    pub name: String,
    /// Type as printed by `format_type()`, modifiers included.
    pub data_type: String,
    pub is_nullable: bool,
    /// Default as printed by `pg_get_expr()`.
    pub default: Option<String>,
    /// `pg_attribute.attidentity`: `a`, `d` or empty.
    pub identity: Option<String>,
    /// Whether the type is an enum.
    pub is_enum: bool,
    pub ordinal_position: i32,
}

/// Raw constraint row.
#[derive(Debug, Clone)]
pub struct RawConstraint {
    pub table: String,
    pub name: String,
    /// `pg_constraint.contype`: `p`, `u`, `f` or `c`.
    pub kind: String,
    pub columns: Vec<String>,
    pub referenced_schema: Option<String>,
    pub referenced_table: Option<String>,
    pub referenced_columns: Vec<String>,
    /// `confdeltype`
    pub on_delete: Option<String>,
    /// `confupdtype`
    pub on_update: Option<String>,
    /// `pg_get_constraintdef()`
    pub definition: String,
}

/// Raw index row.
#[derive(Debug, Clone)]
pub struct RawIndex {
    pub table: String,
    pub name: String,
    /// Key elements as printed by `pg_get_indexdef(oid, n, true)`.
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub method: String,
    /// `pg_get_expr(indpred)`
    pub predicate: Option<String>,
    /// Whether the index backs a constraint.
    pub is_constraint: bool,
}

/// Raw trigger row.
#[derive(Debug, Clone)]
pub struct RawTrigger {
    pub table: String,
    pub name: String,
    /// `pg_get_triggerdef()`
    pub definition: String,
}

/// Raw enum row.
#[derive(Debug, Clone)]
pub struct RawEnum {
    pub name: String,
    pub values: Vec<String>,
}

/// Source of raw catalog rows.
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    /// All non-system namespaces of the database.
    async fn namespaces(&self) -> MigrateResult<Vec<String>>;

    /// Ordinary tables of a namespace.
    async fn tables(&self, namespace: &str) -> MigrateResult<Vec<String>>;

    async fn columns(&self, namespace: &str) -> MigrateResult<Vec<RawColumn>>;

    async fn constraints(&self, namespace: &str) -> MigrateResult<Vec<RawConstraint>>;

    async fn indexes(&self, namespace: &str) -> MigrateResult<Vec<RawIndex>>;

    async fn triggers(&self, namespace: &str) -> MigrateResult<Vec<RawTrigger>>;

    async fn enums(&self, namespace: &str) -> MigrateResult<Vec<RawEnum>>;

    /// Extensions installed into the namespace.
    async fn extensions(&self, namespace: &str) -> MigrateResult<Vec<String>>;
}

/// Introspect one namespace.
pub async fn introspect<C: CatalogSource + ?Sized>(
    source: &C,
    namespace: &str,
    config: &IntrospectionConfig,
) -> MigrateResult<SchemaSnapshot> {
    let namespaces = source.namespaces().await?;
    let mut builder = SnapshotBuilder::new(namespace, config.clone())
        .with_namespaces(namespaces.clone());
    if !namespaces.iter().any(|n| n == namespace) {
        return builder.build();
    }

    builder = builder
        .with_tables(source.tables(namespace).await?)
        .with_columns(source.columns(namespace).await?)
        .with_constraints(source.constraints(namespace).await?)
        .with_indexes(source.indexes(namespace).await?)
        .with_extensions(source.extensions(namespace).await?);
    if config.include_triggers {
        builder = builder.with_triggers(source.triggers(namespace).await?);
    }
    if config.include_enums {
        builder = builder.with_enums(source.enums(namespace).await?);
    }
    builder.build()
}

/// Build a snapshot from raw catalog rows.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    namespace: String,
    config: IntrospectionConfig,
    namespaces: Vec<String>,
    tables: Vec<String>,
    columns: Vec<RawColumn>,
    constraints: Vec<RawConstraint>,
    indexes: Vec<RawIndex>,
    triggers: Vec<RawTrigger>,
    enums: Vec<RawEnum>,
    extensions: Vec<String>,
}

impl SnapshotBuilder {
    /// Create a new snapshot builder.
    pub fn new(namespace: impl Into<String>, config: IntrospectionConfig) -> Self {
        Self {
            namespace: namespace.into(),
            config,
            namespaces: Vec::new(),
            tables: Vec::new(),
            columns: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
            triggers: Vec::new(),
            enums: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_columns(mut self, columns: Vec<RawColumn>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<RawConstraint>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_indexes(mut self, indexes: Vec<RawIndex>) -> Self {
        self.indexes = indexes;
        self
    }

    pub fn with_triggers(mut self, triggers: Vec<RawTrigger>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn with_enums(mut self, enums: Vec<RawEnum>) -> Self {
        self.enums = enums;
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Build the snapshot from the collected rows.
    pub fn build(self) -> MigrateResult<SchemaSnapshot> {
        let exists = self.namespaces.iter().any(|n| *n == self.namespace);
        let mut snapshot = if exists {
            SchemaSnapshot::existing(&self.namespace)
        } else {
            SchemaSnapshot::new(&self.namespace)
        };

        for raw in &self.enums {
            snapshot.enums.insert(
                raw.name.clone(),
                EnumInfo {
                    name: raw.name.clone(),
                    values: raw.values.clone(),
                },
            );
        }
        snapshot.extensions = self.extensions.iter().cloned().collect();

        let included: BTreeSet<&str> = self
            .tables
            .iter()
            .map(String::as_str)
            .filter(|t| self.config.should_include_table(t))
            .collect();
        for table in &included {
            snapshot.add_table(TableInfo::new(*table));
        }

        let mut columns: Vec<&RawColumn> = self
            .columns
            .iter()
            .filter(|c| included.contains(c.table.as_str()))
            .collect();
        columns.sort_by_key(|c| c.ordinal_position);
        for raw in columns {
            let column = self.column(raw)?;
            if let Some(table) = snapshot.tables.get_mut(&raw.table) {
                table.add_column(column);
            }
        }

        for raw in self
            .constraints
            .iter()
            .filter(|c| included.contains(c.table.as_str()))
        {
            self.constraint(&mut snapshot, raw)?;
        }

        for raw in self
            .indexes
            .iter()
            .filter(|i| included.contains(i.table.as_str()) && !i.is_constraint)
        {
            let index = IndexInfo {
                name: raw.name.clone(),
                columns: raw.columns.iter().map(|c| normalize_index_element(c)).collect(),
                unique: raw.is_unique,
                method: raw.method.to_lowercase(),
                predicate: raw.predicate.as_deref().map(normalize_expression),
            };
            snapshot
                .indexes
                .entry(raw.table.clone())
                .or_default()
                .insert(raw.name.clone(), index);
        }

        for raw in self
            .triggers
            .iter()
            .filter(|t| included.contains(t.table.as_str()))
        {
            snapshot.triggers.entry(raw.table.clone()).or_default().insert(
                raw.name.clone(),
                TriggerInfo {
                    name: raw.name.clone(),
                    definition: normalize_whitespace(&raw.definition),
                },
            );
        }

        debug!(
            namespace = %snapshot.namespace,
            tables = snapshot.tables.len(),
            enums = snapshot.enums.len(),
            "Introspected namespace"
        );
        Ok(snapshot)
    }

    fn column(&self, raw: &RawColumn) -> MigrateResult<ColumnInfo> {
        let prefix = format!("{}.", self.namespace);
        let spelled = raw.data_type.strip_prefix(&prefix).unwrap_or(&raw.data_type);
        let mut ty = SqlType::parse(spelled);

        let mut default = raw.default.clone();
        if let Some(serial) = serial_type(&ty.base, default.as_deref()) {
            ty = SqlType::new(serial);
            default = None;
        }

        let mut column = ColumnInfo::new(&raw.name, ty);
        column.is_nullable = raw.is_nullable;
        column.user_defined = raw.is_enum;
        column.identity = match raw.identity.as_deref() {
            Some("a") => Some(IdentityGeneration::Always),
            Some("d") => Some(IdentityGeneration::ByDefault),
            Some("") | None => None,
            Some(other) => {
                return Err(MigrationError::introspection(format!(
                    "unknown identity kind '{other}' on {}.{}",
                    raw.table, raw.name
                )));
            }
        };
        if let Some(expression) = default {
            column = column.default_expr(expression);
        }
        Ok(column)
    }

    fn constraint(&self, snapshot: &mut SchemaSnapshot, raw: &RawConstraint) -> MigrateResult<()> {
        let table = raw.table.clone();
        match raw.kind.as_str() {
            "p" => {
                snapshot.primary_keys.insert(
                    table,
                    PrimaryKeyInfo {
                        name: raw.name.clone(),
                        columns: raw.columns.clone(),
                    },
                );
            }
            "u" => {
                snapshot.unique_constraints.entry(table).or_default().insert(
                    raw.name.clone(),
                    UniqueConstraintInfo {
                        name: raw.name.clone(),
                        columns: raw.columns.clone(),
                        nulls_distinct: !raw.definition.contains("NULLS NOT DISTINCT"),
                    },
                );
            }
            "f" => {
                let referenced_table = raw.referenced_table.clone().ok_or_else(|| {
                    MigrationError::introspection(format!(
                        "foreign key {} has no referenced table",
                        raw.name
                    ))
                })?;
                let action = |code: &Option<String>| {
                    code.as_deref()
                        .map(ReferentialAction::from_catalog)
                        .unwrap_or_default()
                };
                snapshot.foreign_keys.entry(table).or_default().insert(
                    raw.name.clone(),
                    ForeignKeyInfo {
                        name: raw.name.clone(),
                        columns: raw.columns.clone(),
                        referenced_schema: raw
                            .referenced_schema
                            .clone()
                            .filter(|s| *s != self.namespace),
                        referenced_table,
                        referenced_columns: raw.referenced_columns.clone(),
                        on_delete: action(&raw.on_delete),
                        on_update: action(&raw.on_update),
                    },
                );
            }
            "c" => {
                snapshot.check_constraints.entry(table).or_default().insert(
                    raw.name.clone(),
                    CheckConstraintInfo {
                        name: raw.name.clone(),
                        expression: normalize_expression(check_expression(&raw.definition)),
                    },
                );
            }
            other => {
                debug!(constraint = %raw.name, kind = other, "Skipping constraint kind");
            }
        }
        Ok(())
    }
}

/// The serial pseudo-type matching an integer column fed by its own sequence.
fn serial_type(base: &str, default: Option<&str>) -> Option<&'static str> {
    let default = default?;
    if !default.starts_with("nextval(") {
        return None;
    }
    match base {
        "integer" => Some("serial"),
        "bigint" => Some("bigserial"),
        "smallint" => Some("smallserial"),
        _ => None,
    }
}

/// Strip `CHECK (...)` and an optional `NOT VALID` from a constraint definition.
fn check_expression(definition: &str) -> &str {
    let body = definition.trim();
    let body = body.strip_suffix("NOT VALID").map(str::trim_end).unwrap_or(body);
    body.strip_prefix("CHECK").map(str::trim_start).unwrap_or(body)
}

/// Group flat rows by table, keeping row order.
pub fn group_by_table<T, F>(rows: Vec<T>, table: F) -> BTreeMap<String, Vec<T>>
where
    F: Fn(&T) -> &str,
{
    let mut grouped: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for row in rows {
        grouped.entry(table(&row).to_string()).or_default().push(row);
    }
    grouped
}

/// PostgreSQL catalog queries. Each takes the namespace as `$1`.
pub mod postgres_queries {
    /// Namespaces other than the system ones.
    pub const NAMESPACES: &str = r#"
        SELECT nspname
        FROM pg_namespace
        WHERE nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
          AND nspname NOT LIKE 'pg_temp_%'
          AND nspname NOT LIKE 'pg_toast_temp_%'
        ORDER BY nspname
    "#;

    /// Ordinary and partitioned tables.
    pub const TABLES: &str = r#"
        SELECT c.relname
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relkind IN ('r', 'p')
        ORDER BY c.relname
    "#;

    /// Columns with their full type spelling.
    pub const COLUMNS: &str = r#"
        SELECT
            c.relname AS table_name,
            a.attname AS column_name,
            format_type(a.atttypid, a.atttypmod) AS data_type,
            NOT a.attnotnull AS is_nullable,
            pg_get_expr(d.adbin, d.adrelid) AS column_default,
            a.attidentity::text AS identity,
            t.typtype = 'e' AS is_enum,
            a.attnum::int4 AS ordinal_position
        FROM pg_attribute a
        JOIN pg_class c ON c.oid = a.attrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_type t ON t.oid = a.atttypid
        LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
        WHERE n.nspname = $1
          AND c.relkind IN ('r', 'p')
          AND a.attnum > 0
          AND NOT a.attisdropped
        ORDER BY c.relname, a.attnum
    "#;

    /// Primary key, unique, foreign key and check constraints.
    pub const CONSTRAINTS: &str = r#"
        SELECT
            c.relname AS table_name,
            con.conname AS constraint_name,
            con.contype::text AS kind,
            ARRAY(
                SELECT a.attname
                FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                ORDER BY k.ord
            ) AS columns,
            fn.nspname AS referenced_schema,
            fc.relname AS referenced_table,
            ARRAY(
                SELECT a.attname
                FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
                ORDER BY k.ord
            ) AS referenced_columns,
            NULLIF(con.confdeltype::text, ' ') AS on_delete,
            NULLIF(con.confupdtype::text, ' ') AS on_update,
            pg_get_constraintdef(con.oid, true) AS definition
        FROM pg_constraint con
        JOIN pg_class c ON c.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_class fc ON fc.oid = con.confrelid
        LEFT JOIN pg_namespace fn ON fn.oid = fc.relnamespace
        WHERE n.nspname = $1 AND con.contype IN ('p', 'u', 'f', 'c')
        ORDER BY c.relname, con.conname
    "#;

    /// Indexes with their key elements.
    pub const INDEXES: &str = r#"
        SELECT
            t.relname AS table_name,
            i.relname AS index_name,
            ARRAY(
                SELECT pg_get_indexdef(ix.indexrelid, k, true)
                FROM generate_series(1, ix.indnkeyatts) AS k
                ORDER BY k
            ) AS columns,
            ix.indisunique AS is_unique,
            am.amname AS index_method,
            pg_get_expr(ix.indpred, ix.indrelid) AS predicate,
            EXISTS (
                SELECT 1 FROM pg_constraint con WHERE con.conindid = ix.indexrelid
            ) AS is_constraint
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_am am ON am.oid = i.relam
        WHERE n.nspname = $1
        ORDER BY t.relname, i.relname
    "#;

    /// User-defined triggers.
    pub const TRIGGERS: &str = r#"
        SELECT
            c.relname AS table_name,
            tg.tgname AS trigger_name,
            pg_get_triggerdef(tg.oid, true) AS definition
        FROM pg_trigger tg
        JOIN pg_class c ON c.oid = tg.tgrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND NOT tg.tgisinternal
        ORDER BY c.relname, tg.tgname
    "#;

    /// Enum types and their labels in sort order.
    pub const ENUMS: &str = r#"
        SELECT
            t.typname AS enum_name,
            array_agg(e.enumlabel ORDER BY e.enumsortorder) AS enum_values
        FROM pg_type t
        JOIN pg_namespace n ON t.typnamespace = n.oid
        JOIN pg_enum e ON t.oid = e.enumtypid
        WHERE n.nspname = $1
        GROUP BY t.typname
        ORDER BY t.typname
    "#;

    /// Extensions installed into the namespace.
    pub const EXTENSIONS: &str = r#"
        SELECT e.extname
        FROM pg_extension e
        JOIN pg_namespace n ON n.oid = e.extnamespace
        WHERE n.nspname = $1 AND e.extname <> 'plpgsql'
        ORDER BY e.extname
    "#;
}
