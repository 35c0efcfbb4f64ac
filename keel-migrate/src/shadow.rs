//! In-memory shadow of a namespace.
//!
//! A [`ShadowSnapshot`] applies [`Statement`]s to a [`SchemaSnapshot`] the way
//! PostgreSQL would apply them to the catalog. Replaying a rendered plan on the
//! remote snapshot must yield the local snapshot, and replaying the down
//! statements must yield the remote one again; both properties can be checked
//! without a database.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut shadow = ShadowSnapshot::new(remote.clone());
//! for migration in &migrations {
//!     shadow.apply_migration(migration)?;
//! }
//! assert!(diff_snapshots(shadow.snapshot(), &local).is_empty());
//! ```

use std::collections::BTreeMap;

use tracing::warn;

use keel_schema::{ColumnInfo, DefaultValue, SchemaSnapshot, SqlType, TableInfo, TriggerInfo};

use crate::ddl::Statement;
use crate::error::{MigrateResult, MigrationError};
use crate::render::Migration;

/// A snapshot that statements can be replayed against.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowSnapshot {
    snapshot: SchemaSnapshot,
}

impl ShadowSnapshot {
    /// Start from an existing state.
    pub fn new(snapshot: SchemaSnapshot) -> Self {
        Self { snapshot }
    }

    /// Current state.
    pub fn snapshot(&self) -> &SchemaSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> SchemaSnapshot {
        self.snapshot
    }

    /// Replay the `up` statements of a migration.
    pub fn apply_migration(&mut self, migration: &Migration) -> MigrateResult<()> {
        self.apply_all(&migration.up)
    }

    /// Replay the `down` statements of a migration.
    pub fn revert_migration(&mut self, migration: &Migration) -> MigrateResult<()> {
        self.apply_all(&migration.down)
    }

    pub fn apply_all(&mut self, statements: &[Statement]) -> MigrateResult<()> {
        for statement in statements {
            self.apply(statement)?;
        }
        Ok(())
    }

    /// Apply one statement.
    pub fn apply(&mut self, statement: &Statement) -> MigrateResult<()> {
        let s = &mut self.snapshot;
        match statement {
            Statement::CreateSchema { schema } => {
                if !s.schemas.insert(schema.clone()) {
                    return Err(invalid(format!("schema '{schema}' already exists")));
                }
            }
            Statement::DropSchema { schema } => {
                if *schema == s.namespace && !s.tables.is_empty() {
                    return Err(invalid(format!("schema '{schema}' is not empty")));
                }
                s.schemas.remove(schema);
            }
            Statement::CreateExtension { name, .. } => {
                s.extensions.insert(name.clone());
            }
            Statement::DropExtension { name } => {
                if !s.extensions.remove(name) {
                    return Err(invalid(format!("extension '{name}' does not exist")));
                }
            }
            Statement::CreateEnum { name, values, .. } => {
                if s.enums.contains_key(name) {
                    return Err(invalid(format!("type '{name}' already exists")));
                }
                s.enums.insert(
                    name.clone(),
                    keel_schema::EnumInfo {
                        name: name.clone(),
                        values: values.clone(),
                    },
                );
            }
            Statement::DropEnum { name, .. } => {
                if s.tables
                    .values()
                    .flat_map(|t| t.columns.values())
                    .any(|c| c.user_defined && c.data_type == *name)
                {
                    return Err(invalid(format!("type '{name}' is still in use")));
                }
                s.enums
                    .remove(name)
                    .ok_or_else(|| invalid(format!("type '{name}' does not exist")))?;
            }
            Statement::AddEnumValue {
                name,
                value,
                before,
                ..
            } => {
                let info = s
                    .enums
                    .get_mut(name)
                    .ok_or_else(|| invalid(format!("type '{name}' does not exist")))?;
                let position = before
                    .as_ref()
                    .and_then(|b| info.values.iter().position(|v| v == b))
                    .unwrap_or(info.values.len());
                info.values.insert(position, value.clone());
            }
            Statement::CreateTable { table, columns, .. } => {
                if s.tables.contains_key(table) {
                    return Err(invalid(format!("table '{table}' already exists")));
                }
                let mut info = TableInfo::new(table);
                for column in columns {
                    info.add_column(column.clone());
                }
                s.add_table(info);
            }
            Statement::DropTable { table, .. } => {
                let referenced = s.foreign_keys.iter().any(|(owner, fks)| {
                    owner != table && fks.values().any(|fk| fk.referenced_table == *table)
                });
                if referenced {
                    return Err(invalid(format!(
                        "table '{table}' is referenced by a foreign key"
                    )));
                }
                s.tables
                    .remove(table)
                    .ok_or_else(|| invalid(format!("table '{table}' does not exist")))?;
                s.primary_keys.remove(table);
                s.indexes.remove(table);
                s.unique_constraints.remove(table);
                s.foreign_keys.remove(table);
                s.check_constraints.remove(table);
                s.triggers.remove(table);
            }
            Statement::RenameTable { from, to, .. } => {
                if s.tables.contains_key(to) {
                    return Err(invalid(format!("table '{to}' already exists")));
                }
                let mut info = s
                    .tables
                    .remove(from)
                    .ok_or_else(|| invalid(format!("table '{from}' does not exist")))?;
                info.name = to.clone();
                s.add_table(info);
                move_key(&mut s.primary_keys, from, to);
                move_key(&mut s.indexes, from, to);
                move_key(&mut s.unique_constraints, from, to);
                move_key(&mut s.foreign_keys, from, to);
                move_key(&mut s.check_constraints, from, to);
                move_key(&mut s.triggers, from, to);
                for fk in s.foreign_keys.values_mut().flat_map(|m| m.values_mut()) {
                    if fk.referenced_table == *from {
                        fk.referenced_table = to.clone();
                    }
                }
            }
            Statement::AddColumn { table, column, .. } => {
                let info = table_mut(s, table)?;
                if info.columns.contains_key(&column.name) {
                    return Err(invalid(format!(
                        "column '{table}.{}' already exists",
                        column.name
                    )));
                }
                info.add_column(column.clone());
            }
            Statement::DropColumn { table, column, .. } => {
                if s.column_is_constrained(table, column) {
                    return Err(invalid(format!(
                        "column '{table}.{column}' is part of a key"
                    )));
                }
                table_mut(s, table)?
                    .columns
                    .shift_remove(column)
                    .ok_or_else(|| invalid(format!("column '{table}.{column}' does not exist")))?;
            }
            Statement::RenameColumn {
                table, from, to, ..
            } => rename_column(s, table, from, to)?,
            Statement::AlterColumnType {
                table,
                column,
                data_type,
                user_defined,
                ..
            } => {
                let info = column_mut(s, table, column)?;
                let ty = SqlType::parse(data_type);
                info.data_type = ty.base;
                info.character_maximum_length = ty.character_maximum_length;
                info.numeric_precision = ty.numeric_precision;
                info.numeric_scale = ty.numeric_scale;
                info.datetime_precision = ty.datetime_precision;
                info.user_defined = *user_defined;
            }
            Statement::SetColumnDefault {
                table,
                column,
                expression,
                ..
            } => {
                column_mut(s, table, column)?.default = Some(DefaultValue::new(expression.clone()));
            }
            Statement::DropColumnDefault { table, column, .. } => {
                column_mut(s, table, column)?.default = None;
            }
            Statement::SetNotNull { table, column, .. } => {
                column_mut(s, table, column)?.is_nullable = false;
            }
            Statement::DropNotNull { table, column, .. } => {
                let in_key = s
                    .primary_keys
                    .get(table)
                    .is_some_and(|pk| pk.columns.contains(column));
                let info = column_mut(s, table, column)?;
                if in_key || info.identity.is_some() {
                    return Err(invalid(format!(
                        "column '{table}.{column}' must stay NOT NULL"
                    )));
                }
                info.is_nullable = true;
            }
            Statement::AddIdentity {
                table,
                column,
                generation,
                ..
            } => {
                let info = column_mut(s, table, column)?;
                if info.identity.is_some() {
                    return Err(invalid(format!(
                        "column '{table}.{column}' is already an identity column"
                    )));
                }
                info.identity = Some(*generation);
                info.is_nullable = false;
            }
            Statement::DropIdentity { table, column, .. } => {
                column_mut(s, table, column)?
                    .identity
                    .take()
                    .ok_or_else(|| {
                        invalid(format!("column '{table}.{column}' is not an identity column"))
                    })?;
            }
            Statement::SetIdentityGeneration {
                table,
                column,
                generation,
                ..
            } => {
                let info = column_mut(s, table, column)?;
                if info.identity.is_none() {
                    return Err(invalid(format!(
                        "column '{table}.{column}' is not an identity column"
                    )));
                }
                info.identity = Some(*generation);
            }
            Statement::CreateIndex { table, index, .. } => {
                table_mut(s, table)?;
                if index_table(s, &index.name).is_some() {
                    return Err(invalid(format!("relation '{}' already exists", index.name)));
                }
                s.indexes
                    .entry(table.clone())
                    .or_default()
                    .insert(index.name.clone(), index.clone());
            }
            Statement::DropIndex { name, .. } => {
                let table = index_table(s, name)
                    .ok_or_else(|| invalid(format!("index '{name}' does not exist")))?;
                remove_nested(&mut s.indexes, &table, name);
            }
            Statement::AddPrimaryKey { table, key, .. } => {
                if s.primary_keys.contains_key(table) {
                    return Err(invalid(format!("table '{table}' already has a primary key")));
                }
                for column in &key.columns {
                    column_mut(s, table, column)?.is_nullable = false;
                }
                s.primary_keys.insert(table.clone(), key.clone());
            }
            Statement::AddUniqueConstraint {
                table, constraint, ..
            } => {
                ensure_columns(s, table, &constraint.columns)?;
                s.unique_constraints
                    .entry(table.clone())
                    .or_default()
                    .insert(constraint.name.clone(), constraint.clone());
            }
            Statement::AddForeignKey {
                table, constraint, ..
            } => {
                ensure_columns(s, table, &constraint.columns)?;
                if constraint.references_namespace(&s.namespace) {
                    ensure_columns(s, &constraint.referenced_table, &constraint.referenced_columns)?;
                }
                s.foreign_keys
                    .entry(table.clone())
                    .or_default()
                    .insert(constraint.name.clone(), constraint.clone());
            }
            Statement::AddCheckConstraint {
                table,
                name,
                expression,
                ..
            } => {
                table_mut(s, table)?;
                s.check_constraints.entry(table.clone()).or_default().insert(
                    name.clone(),
                    keel_schema::CheckConstraintInfo {
                        name: name.clone(),
                        expression: expression.clone(),
                    },
                );
            }
            Statement::DropConstraint { table, name, .. } => drop_constraint(s, table, name)?,
            Statement::RenameIndex { from, to, .. } => {
                if index_table(s, to).is_some() {
                    return Err(invalid(format!("relation '{to}' already exists")));
                }
                let table = index_table(s, from)
                    .ok_or_else(|| invalid(format!("index '{from}' does not exist")))?;
                rename_nested(&mut s.indexes, &table, from, to, |i, n| i.name = n.to_string());
            }
            Statement::RenameConstraint {
                table, from, to, ..
            } => rename_constraint(s, table, from, to)?,
            Statement::CreateTrigger {
                table,
                name,
                definition,
                ..
            } => {
                table_mut(s, table)?;
                let triggers = s.triggers.entry(table.clone()).or_default();
                if triggers.contains_key(name) {
                    return Err(invalid(format!("trigger '{name}' already exists on '{table}'")));
                }
                triggers.insert(
                    name.clone(),
                    TriggerInfo {
                        name: name.clone(),
                        definition: definition.clone(),
                    },
                );
            }
            Statement::DropTrigger { table, name, .. } => {
                if !remove_nested(&mut s.triggers, table, name) {
                    return Err(invalid(format!("trigger '{name}' does not exist on '{table}'")));
                }
            }
            Statement::Raw { sql, .. } => {
                warn!(sql = %sql, "Raw SQL is not replayed on the shadow snapshot");
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> MigrationError {
    MigrationError::InvalidMigration(message)
}

fn table_mut<'a>(s: &'a mut SchemaSnapshot, table: &str) -> MigrateResult<&'a mut TableInfo> {
    s.tables
        .get_mut(table)
        .ok_or_else(|| invalid(format!("table '{table}' does not exist")))
}

fn column_mut<'a>(
    s: &'a mut SchemaSnapshot,
    table: &str,
    column: &str,
) -> MigrateResult<&'a mut ColumnInfo> {
    table_mut(s, table)?
        .columns
        .get_mut(column)
        .ok_or_else(|| invalid(format!("column '{table}.{column}' does not exist")))
}

fn ensure_columns(s: &SchemaSnapshot, table: &str, columns: &[String]) -> MigrateResult<()> {
    for column in columns {
        if s.column(table, column).is_none() {
            return Err(invalid(format!("column '{table}.{column}' does not exist")));
        }
    }
    Ok(())
}

fn index_table(s: &SchemaSnapshot, name: &str) -> Option<String> {
    s.indexes
        .iter()
        .find(|(_, indexes)| indexes.contains_key(name))
        .map(|(table, _)| table.clone())
}

fn move_key<T>(map: &mut BTreeMap<String, T>, from: &str, to: &str) {
    if let Some(value) = map.remove(from) {
        map.insert(to.to_string(), value);
    }
}

/// Remove `table/name` and drop the table entry once empty.
fn remove_nested<T>(map: &mut BTreeMap<String, BTreeMap<String, T>>, table: &str, name: &str) -> bool {
    let Some(entries) = map.get_mut(table) else {
        return false;
    };
    let removed = entries.remove(name).is_some();
    if entries.is_empty() {
        map.remove(table);
    }
    removed
}

fn drop_constraint(s: &mut SchemaSnapshot, table: &str, name: &str) -> MigrateResult<()> {
    if s.primary_keys.get(table).is_some_and(|pk| pk.name == name) {
        s.primary_keys.remove(table);
        return Ok(());
    }
    if remove_nested(&mut s.unique_constraints, table, name)
        || remove_nested(&mut s.foreign_keys, table, name)
        || remove_nested(&mut s.check_constraints, table, name)
    {
        return Ok(());
    }
    Err(invalid(format!("constraint '{name}' does not exist on '{table}'")))
}

/// Re-key `table/from` as `table/to`, renaming the entry itself with `set_name`.
fn rename_nested<T>(
    map: &mut BTreeMap<String, BTreeMap<String, T>>,
    table: &str,
    from: &str,
    to: &str,
    set_name: impl Fn(&mut T, &str),
) -> bool {
    let Some(entries) = map.get_mut(table) else {
        return false;
    };
    let Some(mut entry) = entries.remove(from) else {
        return false;
    };
    set_name(&mut entry, to);
    entries.insert(to.to_string(), entry);
    true
}

fn rename_constraint(s: &mut SchemaSnapshot, table: &str, from: &str, to: &str) -> MigrateResult<()> {
    table_mut(s, table)?;
    let taken = s.primary_keys.get(table).is_some_and(|pk| pk.name == to)
        || s.unique_constraints.get(table).is_some_and(|m| m.contains_key(to))
        || s.foreign_keys.get(table).is_some_and(|m| m.contains_key(to))
        || s.check_constraints.get(table).is_some_and(|m| m.contains_key(to));
    if taken {
        return Err(invalid(format!("constraint '{to}' already exists on '{table}'")));
    }
    if let Some(pk) = s.primary_keys.get_mut(table).filter(|pk| pk.name == from) {
        pk.name = to.to_string();
        return Ok(());
    }
    if rename_nested(&mut s.unique_constraints, table, from, to, |u, n| u.name = n.to_string())
        || rename_nested(&mut s.foreign_keys, table, from, to, |fk, n| fk.name = n.to_string())
        || rename_nested(&mut s.check_constraints, table, from, to, |c, n| c.name = n.to_string())
    {
        return Ok(());
    }
    Err(invalid(format!("constraint '{from}' does not exist on '{table}'")))
}

fn rename_column(s: &mut SchemaSnapshot, table: &str, from: &str, to: &str) -> MigrateResult<()> {
    let info = table_mut(s, table)?;
    if info.columns.contains_key(to) {
        return Err(invalid(format!("column '{table}.{to}' already exists")));
    }
    let index = info
        .columns
        .get_index_of(from)
        .ok_or_else(|| invalid(format!("column '{table}.{from}' does not exist")))?;
    let (_, mut column) = info
        .columns
        .shift_remove_index(index)
        .ok_or_else(|| invalid(format!("column '{table}.{from}' does not exist")))?;
    column.name = to.to_string();
    info.columns.shift_insert(index, to.to_string(), column);

    let rename = |columns: &mut Vec<String>| {
        for c in columns.iter_mut().filter(|c| c.as_str() == from) {
            *c = to.to_string();
        }
    };
    if let Some(pk) = s.primary_keys.get_mut(table) {
        rename(&mut pk.columns);
    }
    for unique in s.unique_constraints.get_mut(table).into_iter().flat_map(|m| m.values_mut()) {
        rename(&mut unique.columns);
    }
    for index in s.indexes.get_mut(table).into_iter().flat_map(|m| m.values_mut()) {
        rename(&mut index.columns);
    }
    for (owner, fks) in s.foreign_keys.iter_mut() {
        for fk in fks.values_mut() {
            if owner == table {
                rename(&mut fk.columns);
            }
            if fk.referenced_table == table {
                rename(&mut fk.referenced_columns);
            }
        }
    }
    Ok(())
}
