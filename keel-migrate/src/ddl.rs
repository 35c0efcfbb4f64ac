//! Intermediate representation of DDL operations.
//!
//! Changesets and migration artifacts carry [`Statement`]s rather than SQL
//! text; [`crate::sql::PostgresSqlGenerator`] renders them.

use serde::{Deserialize, Serialize};

use keel_schema::{
    ColumnInfo, ForeignKeyInfo, IdentityGeneration, IndexInfo, PrimaryKeyInfo,
    UniqueConstraintInfo,
};

/// A single DDL operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Statement {
    CreateSchema {
        schema: String,
    },
    DropSchema {
        schema: String,
    },
    CreateExtension {
        schema: String,
        name: String,
    },
    DropExtension {
        name: String,
    },
    CreateEnum {
        schema: String,
        name: String,
        values: Vec<String>,
    },
    DropEnum {
        schema: String,
        name: String,
    },
    /// `ALTER TYPE ... ADD VALUE`, optionally positioned before an existing label.
    AddEnumValue {
        schema: String,
        name: String,
        value: String,
        before: Option<String>,
    },
    CreateTable {
        schema: String,
        table: String,
        columns: Vec<ColumnInfo>,
    },
    DropTable {
        schema: String,
        table: String,
    },
    RenameTable {
        schema: String,
        from: String,
        to: String,
    },
    AddColumn {
        schema: String,
        table: String,
        column: ColumnInfo,
    },
    DropColumn {
        schema: String,
        table: String,
        column: String,
    },
    RenameColumn {
        schema: String,
        table: String,
        from: String,
        to: String,
    },
    /// Change type; `data_type` is the full type spelling.
    AlterColumnType {
        schema: String,
        table: String,
        column: String,
        data_type: String,
        user_defined: bool,
    },
    SetColumnDefault {
        schema: String,
        table: String,
        column: String,
        expression: String,
    },
    DropColumnDefault {
        schema: String,
        table: String,
        column: String,
    },
    SetNotNull {
        schema: String,
        table: String,
        column: String,
    },
    DropNotNull {
        schema: String,
        table: String,
        column: String,
    },
    AddIdentity {
        schema: String,
        table: String,
        column: String,
        generation: IdentityGeneration,
    },
    DropIdentity {
        schema: String,
        table: String,
        column: String,
    },
    SetIdentityGeneration {
        schema: String,
        table: String,
        column: String,
        generation: IdentityGeneration,
    },
    CreateIndex {
        schema: String,
        table: String,
        index: IndexInfo,
        concurrently: bool,
    },
    DropIndex {
        schema: String,
        name: String,
        concurrently: bool,
    },
    AddPrimaryKey {
        schema: String,
        table: String,
        key: PrimaryKeyInfo,
    },
    AddUniqueConstraint {
        schema: String,
        table: String,
        constraint: UniqueConstraintInfo,
    },
    AddForeignKey {
        schema: String,
        table: String,
        constraint: ForeignKeyInfo,
    },
    AddCheckConstraint {
        schema: String,
        table: String,
        name: String,
        expression: String,
    },
    /// `ALTER INDEX ... RENAME TO`; `table` holds the index.
    RenameIndex {
        schema: String,
        table: String,
        from: String,
        to: String,
    },
    /// `ALTER TABLE ... RENAME CONSTRAINT`, which also renames a backing index.
    RenameConstraint {
        schema: String,
        table: String,
        from: String,
        to: String,
    },
    /// Drops any named table constraint (primary key, unique, foreign key, check).
    DropConstraint {
        schema: String,
        table: String,
        name: String,
    },
    /// `definition` is a complete `CREATE TRIGGER` statement.
    CreateTrigger {
        schema: String,
        table: String,
        name: String,
        definition: String,
    },
    DropTrigger {
        schema: String,
        table: String,
        name: String,
    },
    /// Hand-written SQL.
    Raw {
        sql: String,
        #[serde(default = "default_true")]
        transactional: bool,
    },
}

fn default_true() -> bool {
    true
}

impl Statement {
    /// Whether PostgreSQL refuses to run this inside a transaction block.
    pub fn requires_no_transaction(&self) -> bool {
        match self {
            Self::CreateIndex { concurrently, .. } | Self::DropIndex { concurrently, .. } => {
                *concurrently
            }
            Self::Raw { transactional, .. } => !*transactional,
            _ => false,
        }
    }

    /// Table the statement operates on, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::CreateTable { table, .. }
            | Self::DropTable { table, .. }
            | Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::AlterColumnType { table, .. }
            | Self::SetColumnDefault { table, .. }
            | Self::DropColumnDefault { table, .. }
            | Self::SetNotNull { table, .. }
            | Self::DropNotNull { table, .. }
            | Self::AddIdentity { table, .. }
            | Self::DropIdentity { table, .. }
            | Self::SetIdentityGeneration { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::AddPrimaryKey { table, .. }
            | Self::AddUniqueConstraint { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::AddCheckConstraint { table, .. }
            | Self::DropConstraint { table, .. }
            | Self::RenameIndex { table, .. }
            | Self::RenameConstraint { table, .. }
            | Self::CreateTrigger { table, .. }
            | Self::DropTrigger { table, .. } => Some(table),
            Self::RenameTable { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Short operation name used in logs.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::CreateSchema { .. } => "create_schema",
            Self::DropSchema { .. } => "drop_schema",
            Self::CreateExtension { .. } => "create_extension",
            Self::DropExtension { .. } => "drop_extension",
            Self::CreateEnum { .. } => "create_enum",
            Self::DropEnum { .. } => "drop_enum",
            Self::AddEnumValue { .. } => "add_enum_value",
            Self::CreateTable { .. } => "create_table",
            Self::DropTable { .. } => "drop_table",
            Self::RenameTable { .. } => "rename_table",
            Self::AddColumn { .. } => "add_column",
            Self::DropColumn { .. } => "drop_column",
            Self::RenameColumn { .. } => "rename_column",
            Self::AlterColumnType { .. } => "alter_column_type",
            Self::SetColumnDefault { .. } => "set_column_default",
            Self::DropColumnDefault { .. } => "drop_column_default",
            Self::SetNotNull { .. } => "set_not_null",
            Self::DropNotNull { .. } => "drop_not_null",
            Self::AddIdentity { .. } => "add_identity",
            Self::DropIdentity { .. } => "drop_identity",
            Self::SetIdentityGeneration { .. } => "set_identity_generation",
            Self::CreateIndex { .. } => "create_index",
            Self::DropIndex { .. } => "drop_index",
            Self::AddPrimaryKey { .. } => "add_primary_key",
            Self::AddUniqueConstraint { .. } => "add_unique_constraint",
            Self::AddForeignKey { .. } => "add_foreign_key",
            Self::AddCheckConstraint { .. } => "add_check_constraint",
            Self::DropConstraint { .. } => "drop_constraint",
            Self::RenameIndex { .. } => "rename_index",
            Self::RenameConstraint { .. } => "rename_constraint",
            Self::CreateTrigger { .. } => "create_trigger",
            Self::DropTrigger { .. } => "drop_trigger",
            Self::Raw { .. } => "raw",
        }
    }
}
