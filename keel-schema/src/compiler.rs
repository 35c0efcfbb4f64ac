//! Local schema compiler.
//!
//! Turns declarative [`NamespaceDef`]s into [`SchemaSnapshot`]s spelled
//! exactly the way catalog introspection spells them, so that the two can be
//! compared by plain value equality.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::ast::{ColumnDef, ColumnKind, NamespaceDef, TableDef};
use crate::default::{DefaultValue, normalize_expression};
use crate::error::{SchemaError, SchemaResult};
use crate::snapshot::{
    CheckConstraintInfo, ColumnInfo, ForeignKeyInfo, IndexInfo, PrimaryKeyInfo, SchemaSnapshot,
    TableInfo, TriggerInfo, UniqueConstraintInfo,
};

/// PostgreSQL's `NAMEDATALEN - 1`.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Compiles the application's namespace definitions.
#[derive(Debug, Clone, Default)]
pub struct LocalCompiler {
    namespaces: BTreeMap<String, NamespaceDef>,
}

impl LocalCompiler {
    /// Register namespace definitions.
    ///
    /// Fails if two definitions share a name.
    pub fn new(definitions: impl IntoIterator<Item = NamespaceDef>) -> SchemaResult<Self> {
        let mut namespaces = BTreeMap::new();
        for def in definitions {
            if namespaces.contains_key(&def.name) {
                return Err(SchemaError::DuplicateNamespace(def.name));
            }
            namespaces.insert(def.name.clone(), def);
        }
        Ok(Self { namespaces })
    }

    /// Names of the declared namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.keys().cloned().collect()
    }

    /// Get a namespace definition.
    pub fn definition(&self, namespace: &str) -> Option<&NamespaceDef> {
        self.namespaces.get(namespace)
    }

    /// Compile one namespace.
    ///
    /// An undeclared namespace compiles to an empty snapshot that does not
    /// contain the namespace itself.
    pub fn compile(&self, namespace: &str) -> SchemaResult<SchemaSnapshot> {
        match self.namespaces.get(namespace) {
            Some(def) => compile_namespace(def),
            None => Ok(SchemaSnapshot::new(namespace)),
        }
    }
}

/// Compile a single namespace definition.
pub fn compile_namespace(def: &NamespaceDef) -> SchemaResult<SchemaSnapshot> {
    check_identifier(&def.name)?;
    let mut snapshot = SchemaSnapshot::existing(&def.name);

    for ext in &def.extensions {
        snapshot.extensions.insert(ext.clone());
    }

    for enum_def in &def.enums {
        check_identifier(&enum_def.name)?;
        if snapshot.enums.contains_key(&enum_def.name) {
            return Err(SchemaError::duplicate("enum", &enum_def.name));
        }
        let mut seen = BTreeSet::new();
        for value in &enum_def.values {
            if !seen.insert(value) {
                return Err(SchemaError::duplicate(
                    "enum value",
                    format!("{}.{}", enum_def.name, value),
                ));
            }
        }
        snapshot.enums.insert(
            enum_def.name.clone(),
            crate::snapshot::EnumInfo {
                name: enum_def.name.clone(),
                values: enum_def.values.clone(),
            },
        );
    }

    let table_names: BTreeSet<&str> = def.tables.iter().map(|t| t.name.as_str()).collect();
    for table in &def.tables {
        if snapshot.tables.contains_key(&table.name) {
            return Err(SchemaError::duplicate("table", &table.name));
        }
        compile_table(&mut snapshot, table, &table_names)?;
    }

    debug!(
        namespace = %def.name,
        tables = snapshot.tables.len(),
        enums = snapshot.enums.len(),
        "Compiled local schema"
    );
    Ok(snapshot)
}

fn compile_table(
    snapshot: &mut SchemaSnapshot,
    table: &TableDef,
    table_names: &BTreeSet<&str>,
) -> SchemaResult<()> {
    check_identifier(&table.name)?;
    let name = table.name.as_str();

    let mut primary_key: Vec<String> = table
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.clone())
        .collect();
    if !table.primary_key.is_empty() {
        if !primary_key.is_empty() && primary_key != table.primary_key {
            return Err(SchemaError::invalid_table(
                name,
                "primary key declared both on columns and on the table",
            ));
        }
        primary_key = table.primary_key.clone();
    }

    let mut info = TableInfo::new(name);
    for column in &table.columns {
        if info.columns.contains_key(&column.name) {
            return Err(SchemaError::duplicate("column", format!("{name}.{}", column.name)));
        }
        let in_pk = primary_key.contains(&column.name);
        info.add_column(compile_column(snapshot, name, column, in_pk)?);
    }

    let known = |object: &str, columns: &[String]| -> SchemaResult<()> {
        for column in columns {
            if !info.columns.contains_key(column) {
                return Err(SchemaError::UnknownColumn {
                    table: name.to_string(),
                    object: object.to_string(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    };

    let mut constraint_names = BTreeSet::new();
    let mut claim = |constraint: &str| -> SchemaResult<()> {
        check_identifier(constraint)?;
        if constraint_names.insert(constraint.to_string()) {
            Ok(())
        } else {
            Err(SchemaError::duplicate("constraint", format!("{name}.{constraint}")))
        }
    };

    if !primary_key.is_empty() {
        let pk_name = format!("{name}_pkey");
        known(&pk_name, &primary_key)?;
        claim(&pk_name)?;
        snapshot.primary_keys.insert(
            name.to_string(),
            PrimaryKeyInfo {
                name: pk_name,
                columns: primary_key,
            },
        );
    }

    let mut uniques = BTreeMap::new();
    let column_uniques = table
        .columns
        .iter()
        .filter(|c| c.unique)
        .map(|c| (None, vec![c.name.clone()], true));
    let table_uniques = table
        .uniques
        .iter()
        .map(|u| (u.name.clone(), u.columns.clone(), u.nulls_distinct));
    for (explicit, columns, nulls_distinct) in column_uniques.chain(table_uniques) {
        let unique_name = explicit.unwrap_or_else(|| default_name(name, &columns, "key"));
        known(&unique_name, &columns)?;
        claim(&unique_name)?;
        uniques.insert(
            unique_name.clone(),
            UniqueConstraintInfo {
                name: unique_name,
                columns,
                nulls_distinct,
            },
        );
    }
    if !uniques.is_empty() {
        snapshot.unique_constraints.insert(name.to_string(), uniques);
    }

    let mut foreign_keys = BTreeMap::new();
    let column_fks = table.columns.iter().filter_map(|c| {
        c.references.as_ref().map(|r| {
            crate::ast::ForeignKeyDef::new([c.name.clone()], r.table.clone(), [r.column.clone()])
                .on_delete(r.on_delete)
                .on_update(r.on_update)
        })
    });
    for fk in column_fks.chain(table.foreign_keys.iter().cloned()) {
        let fk_name = fk
            .name
            .clone()
            .unwrap_or_else(|| default_name(name, &fk.columns, "fkey"));
        known(&fk_name, &fk.columns)?;
        claim(&fk_name)?;
        if fk.columns.len() != fk.references_columns.len() {
            return Err(SchemaError::invalid_table(
                name,
                format!("foreign key `{fk_name}` column count does not match its reference"),
            ));
        }
        let same_namespace = fk
            .references_schema
            .as_deref()
            .is_none_or(|s| s == snapshot.namespace);
        if same_namespace && !table_names.contains(fk.references_table.as_str()) {
            return Err(SchemaError::invalid_table(
                name,
                format!(
                    "foreign key `{fk_name}` references unknown table `{}`",
                    fk.references_table
                ),
            ));
        }
        foreign_keys.insert(
            fk_name.clone(),
            ForeignKeyInfo {
                name: fk_name,
                columns: fk.columns,
                referenced_schema: fk.references_schema.filter(|s| *s != snapshot.namespace),
                referenced_table: fk.references_table,
                referenced_columns: fk.references_columns,
                on_delete: fk.on_delete,
                on_update: fk.on_update,
            },
        );
    }
    if !foreign_keys.is_empty() {
        snapshot.foreign_keys.insert(name.to_string(), foreign_keys);
    }

    let mut checks = BTreeMap::new();
    let column_checks = table.columns.iter().filter_map(|c| {
        c.check
            .as_ref()
            .map(|expr| (format!("{name}_{}_check", c.name), expr.clone()))
    });
    let table_checks = table
        .checks
        .iter()
        .map(|c| (c.name.clone(), c.expression.clone()));
    for (check_name, expression) in column_checks.chain(table_checks) {
        claim(&check_name)?;
        checks.insert(
            check_name.clone(),
            CheckConstraintInfo {
                name: check_name,
                expression: normalize_expression(&expression),
            },
        );
    }
    if !checks.is_empty() {
        snapshot.check_constraints.insert(name.to_string(), checks);
    }

    let mut indexes = BTreeMap::new();
    for index in &table.indexes {
        let index_name = index
            .name
            .clone()
            .unwrap_or_else(|| default_name(name, &index.columns, "idx"));
        check_identifier(&index_name)?;
        if indexes.contains_key(&index_name) || constraint_names.contains(&index_name) {
            return Err(SchemaError::duplicate("index", format!("{name}.{index_name}")));
        }
        let plain: Vec<String> = index
            .columns
            .iter()
            .filter(|c| !is_expression(c))
            .cloned()
            .collect();
        known(&index_name, &plain)?;
        indexes.insert(
            index_name.clone(),
            IndexInfo {
                name: index_name,
                columns: index.columns.iter().map(|c| normalize_index_element(c)).collect(),
                unique: index.unique,
                method: index
                    .method
                    .as_deref()
                    .unwrap_or("btree")
                    .to_lowercase(),
                predicate: index.predicate.as_deref().map(normalize_expression),
            },
        );
    }
    if !indexes.is_empty() {
        snapshot.indexes.insert(name.to_string(), indexes);
    }

    let mut triggers = BTreeMap::new();
    for trigger in &table.triggers {
        check_identifier(&trigger.name)?;
        if triggers.contains_key(&trigger.name) {
            return Err(SchemaError::duplicate("trigger", format!("{name}.{}", trigger.name)));
        }
        if trigger.events.is_empty() {
            return Err(SchemaError::invalid_table(
                name,
                format!("trigger `{}` has no events", trigger.name),
            ));
        }
        triggers.insert(
            trigger.name.clone(),
            TriggerInfo {
                name: trigger.name.clone(),
                definition: normalize_whitespace(
                    &trigger.definition(&snapshot.namespace, name),
                ),
            },
        );
    }
    if !triggers.is_empty() {
        snapshot.triggers.insert(name.to_string(), triggers);
    }

    snapshot.add_table(info);
    Ok(())
}

fn compile_column(
    snapshot: &SchemaSnapshot,
    table: &str,
    column: &ColumnDef,
    in_primary_key: bool,
) -> SchemaResult<ColumnInfo> {
    check_identifier(&column.name)?;

    let ty = column.kind.sql_type();
    if ty.base.is_empty() {
        return Err(SchemaError::invalid_column(table, &column.name, "empty data type"));
    }

    let user_defined = match &column.kind {
        ColumnKind::Enum(enum_name) => {
            if !snapshot.enums.contains_key(enum_name) {
                return Err(SchemaError::UnknownEnum {
                    table: table.to_string(),
                    column: column.name.clone(),
                    enum_name: enum_name.clone(),
                });
            }
            true
        }
        ColumnKind::Raw(_) => snapshot
            .enums
            .contains_key(ty.base.trim_end_matches("[]")),
        _ => false,
    };

    if ty.is_serial() && column.default.is_some() {
        return Err(SchemaError::invalid_column(
            table,
            &column.name,
            "serial columns cannot declare a default",
        ));
    }
    if column.identity.is_some() {
        if column.default.is_some() {
            return Err(SchemaError::invalid_column(
                table,
                &column.name,
                "identity columns cannot declare a default",
            ));
        }
        if !matches!(ty.base.as_str(), "smallint" | "integer" | "bigint") {
            return Err(SchemaError::invalid_column(
                table,
                &column.name,
                "identity columns must be smallint, integer or bigint",
            ));
        }
    }

    let mut info = ColumnInfo::new(&column.name, ty);
    info.is_nullable =
        column.nullable && !in_primary_key && column.identity.is_none() && !info.is_serial();
    info.default = column.default.as_deref().map(DefaultValue::new);
    info.identity = column.identity;
    info.user_defined = user_defined;
    Ok(info)
}

/// PostgreSQL's naming convention for implicit object names.
fn default_name(table: &str, columns: &[String], suffix: &str) -> String {
    let columns: Vec<String> = columns
        .iter()
        .map(|c| {
            c.chars()
                .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
                .collect::<String>()
                .trim_matches('_')
                .to_string()
        })
        .collect();
    format!("{table}_{}_{suffix}", columns.join("_"))
}

fn is_expression(element: &str) -> bool {
    element.contains('(') || element.contains(' ')
}

/// Normalize one index element: expressions are normalized, plain column
/// names are kept verbatim.
pub fn normalize_index_element(element: &str) -> String {
    if is_expression(element) {
        normalize_expression(element)
    } else {
        element.trim().to_string()
    }
}

/// Collapse runs of whitespace into single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn check_identifier(name: &str) -> SchemaResult<()> {
    if name.is_empty() {
        return Err(SchemaError::InvalidIdentifier(
            name.to_string(),
            "identifiers cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(SchemaError::InvalidIdentifier(
            name.to_string(),
            format!("longer than {MAX_IDENTIFIER_LENGTH} bytes"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ColumnDef, EnumDef, ForeignKeyDef, IndexDef, TableDef, UniqueDef};
    use crate::snapshot::IdentityGeneration;
    use pretty_assertions::assert_eq;

    fn users() -> TableDef {
        TableDef::new("users")
            .column(ColumnDef::new("id", ColumnKind::Serial).primary_key())
            .column(
                ColumnDef::new("email", ColumnKind::Varchar { length: Some(255) })
                    .not_null()
                    .unique(),
            )
            .column(ColumnDef::new("status", ColumnKind::Enum("user_status".into())))
            .column(
                ColumnDef::new("created_at", ColumnKind::TimestampTz)
                    .not_null()
                    .default_expr("CURRENT_TIMESTAMP"),
            )
    }

    fn namespace() -> NamespaceDef {
        NamespaceDef::new("public")
            .enum_type(EnumDef::new("user_status", ["active", "banned"]))
            .table(users())
            .table(
                TableDef::new("posts")
                    .column(ColumnDef::new("id", ColumnKind::BigInt).identity(IdentityGeneration::Always))
                    .column(ColumnDef::new("author_id", ColumnKind::Integer).references("users", "id"))
                    .column(ColumnDef::new("title", ColumnKind::Text).not_null())
                    .primary_key(["id"])
                    .index(IndexDef::new(["author_id"]))
                    .index(IndexDef::new(["lower(title)"]).named("posts_title_lower_idx")),
            )
    }

    #[test]
    fn test_duplicate_namespace_rejected() {
        let err = LocalCompiler::new([NamespaceDef::new("app"), NamespaceDef::new("app")])
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateNamespace(ref n) if n == "app"));
    }

    #[test]
    fn test_compile_resolves_types() {
        let snapshot = compile_namespace(&namespace()).unwrap();
        let email = snapshot.column("users", "email").unwrap();
        assert_eq!(email.data_type, "character varying");
        assert_eq!(email.character_maximum_length, Some(255));

        let status = snapshot.column("users", "status").unwrap();
        assert_eq!(status.data_type, "user_status");
        assert!(status.user_defined);

        let id = snapshot.column("users", "id").unwrap();
        assert_eq!(id.data_type, "serial");
        assert!(!id.is_nullable);
        assert!(id.default.is_none());

        let created = snapshot.column("users", "created_at").unwrap();
        assert!(created.default.as_ref().unwrap().volatile);
    }

    #[test]
    fn test_compile_constraint_names() {
        let snapshot = compile_namespace(&namespace()).unwrap();
        assert_eq!(snapshot.primary_keys["users"].name, "users_pkey");
        assert!(snapshot.unique_constraints["users"].contains_key("users_email_key"));
        assert!(snapshot.foreign_keys["posts"].contains_key("posts_author_id_fkey"));
        assert!(snapshot.indexes["posts"].contains_key("posts_author_id_idx"));
        assert_eq!(
            snapshot.indexes["posts"]["posts_title_lower_idx"].columns,
            vec!["lower(title)".to_string()]
        );
        assert!(snapshot.schemas.contains("public"));
    }

    #[test]
    fn test_unknown_enum() {
        let def = NamespaceDef::new("public").table(
            TableDef::new("t").column(ColumnDef::new("mood", ColumnKind::Enum("mood".into()))),
        );
        assert!(matches!(
            compile_namespace(&def),
            Err(SchemaError::UnknownEnum { .. })
        ));
    }

    #[test]
    fn test_unknown_column_in_unique() {
        let def = NamespaceDef::new("public").table(
            TableDef::new("t")
                .column(ColumnDef::new("a", ColumnKind::Integer))
                .unique(UniqueDef::new(["b"])),
        );
        assert!(matches!(
            compile_namespace(&def),
            Err(SchemaError::UnknownColumn { ref column, .. }) if column == "b"
        ));
    }

    #[test]
    fn test_foreign_key_to_unknown_table() {
        let def = NamespaceDef::new("public").table(
            TableDef::new("t")
                .column(ColumnDef::new("a", ColumnKind::Integer))
                .foreign_key(ForeignKeyDef::new(["a"], "missing", ["id"])),
        );
        assert!(matches!(
            compile_namespace(&def),
            Err(SchemaError::InvalidTable { .. })
        ));
    }

    #[test]
    fn test_identity_rejects_default() {
        let def = NamespaceDef::new("public").table(
            TableDef::new("t").column(
                ColumnDef::new("id", ColumnKind::Integer)
                    .identity(IdentityGeneration::ByDefault)
                    .default_expr("1"),
            ),
        );
        assert!(compile_namespace(&def).is_err());
    }

    #[test]
    fn test_undeclared_namespace_is_empty() {
        let compiler = LocalCompiler::new([namespace()]).unwrap();
        let snapshot = compiler.compile("audit").unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(compiler.namespaces(), vec!["public".to_string()]);
    }
}
