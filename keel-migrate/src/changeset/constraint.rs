//! Unique, foreign key and check constraints.

use crate::ddl::Statement;
use crate::diff::{Difference, DifferenceKind};

use super::priority::{
    CHANGE_CHECK, CHANGE_FOREIGN_KEY, CHANGE_UNIQUE, CREATE_CONSTRAINT, DROP_CONSTRAINT,
};
use super::{Changeset, GeneratorContext, OperationKind, Phase, Warning, WarningCode, named_entries};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstraintKind {
    Unique,
    ForeignKey,
    Check,
}

impl ConstraintKind {
    fn from_root(root: &str) -> Option<Self> {
        match root {
            "unique" => Some(Self::Unique),
            "foreignKey" => Some(Self::ForeignKey),
            "check" => Some(Self::Check),
            _ => None,
        }
    }

    fn root(self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::ForeignKey => "foreignKey",
            Self::Check => "check",
        }
    }

    fn operation(self, kind: DifferenceKind) -> OperationKind {
        use DifferenceKind::*;
        match (self, kind) {
            (Self::Unique, Create) => OperationKind::CreateUniqueConstraint,
            (Self::Unique, Remove) => OperationKind::DropUniqueConstraint,
            (Self::Unique, Change) => OperationKind::ChangeUniqueConstraint,
            (Self::ForeignKey, Create) => OperationKind::CreateForeignKey,
            (Self::ForeignKey, Remove) => OperationKind::DropForeignKey,
            (Self::ForeignKey, Change) => OperationKind::ChangeForeignKey,
            (Self::Check, Create) => OperationKind::CreateCheckConstraint,
            (Self::Check, Remove) => OperationKind::DropCheckConstraint,
            (Self::Check, Change) => OperationKind::ChangeCheckConstraint,
        }
    }

    fn change_priority(self) -> i32 {
        match self {
            Self::Unique => CHANGE_UNIQUE,
            Self::ForeignKey => CHANGE_FOREIGN_KEY,
            Self::Check => CHANGE_CHECK,
        }
    }
}

/// `unique|foreignKey|check/<table>[/<name>]`
pub(super) fn generate(diff: &Difference, ctx: &GeneratorContext<'_>) -> Option<Vec<Changeset>> {
    let kind = ConstraintKind::from_root(diff.segment(0)?)?;
    let entries = named_entries(diff, kind.root())?;
    let schema = ctx.namespace();
    let mut changesets = Vec::new();

    for (table, name) in entries {
        let operation = kind.operation(diff.kind);
        let drop = Statement::DropConstraint {
            schema: schema.to_string(),
            table: table.clone(),
            name: name.clone(),
        };

        let changeset = match diff.kind {
            DifferenceKind::Create => {
                let add = add_statement(kind, ctx, Side::Local, &table, &name)?;
                let mut changeset =
                    Changeset::new(schema, operation, Phase::Expand, CREATE_CONSTRAINT)
                        .table(&table)
                        .up(add)
                        .down(drop);
                if kind == ConstraintKind::Unique && ctx.is_existing_table(&table) {
                    let constraint = ctx.local.unique_constraints.get(&table)?.get(&name)?;
                    if constraint
                        .columns
                        .iter()
                        .any(|c| ctx.remote.column(&table, c).is_some())
                    {
                        changeset =
                            changeset.warn(Warning::new(WarningCode::MF003, schema).table(&table));
                    }
                }
                changeset
            }
            DifferenceKind::Remove => {
                if ctx.is_dropped_table(&table) {
                    continue;
                }
                let add = add_statement(kind, ctx, Side::Remote, &table, &name)?;
                Changeset::new(schema, operation, Phase::Contract, DROP_CONSTRAINT)
                    .table(&table)
                    .up(drop)
                    .down(add)
            }
            DifferenceKind::Change => {
                let old = add_statement(kind, ctx, Side::Remote, &table, &name)?;
                let new = add_statement(kind, ctx, Side::Local, &table, &name)?;
                Changeset::new(schema, operation, Phase::Alter, kind.change_priority())
                    .table(&table)
                    .up(drop.clone())
                    .up(new)
                    .down(drop)
                    .down(old)
            }
        };
        changesets.push(changeset);
    }
    Some(changesets)
}

#[derive(Clone, Copy)]
enum Side {
    Local,
    Remote,
}

fn add_statement(
    kind: ConstraintKind,
    ctx: &GeneratorContext<'_>,
    side: Side,
    table: &str,
    name: &str,
) -> Option<Statement> {
    let snapshot = match side {
        Side::Local => ctx.local,
        Side::Remote => ctx.remote,
    };
    let schema = ctx.namespace().to_string();
    let table_name = table.to_string();
    let statement = match kind {
        ConstraintKind::Unique => Statement::AddUniqueConstraint {
            schema,
            table: table_name,
            constraint: snapshot.unique_constraints.get(table)?.get(name)?.clone(),
        },
        ConstraintKind::ForeignKey => Statement::AddForeignKey {
            schema,
            table: table_name,
            constraint: snapshot.foreign_keys.get(table)?.get(name)?.clone(),
        },
        ConstraintKind::Check => {
            let check = snapshot.check_constraints.get(table)?.get(name)?;
            Statement::AddCheckConstraint {
                schema,
                table: table_name,
                name: check.name.clone(),
                expression: check.expression.clone(),
            }
        }
    };
    Some(statement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::generate_changesets;
    use crate::changeset::tests::users;
    use crate::config::MigrationConfig;
    use crate::diff::diff_snapshots;
    use keel_schema::{
        CheckConstraintInfo, ColumnInfo, ForeignKeyInfo, ReferentialAction, SchemaSnapshot,
        TableInfo, UniqueConstraintInfo,
    };

    fn run(remote: &SchemaSnapshot, local: &SchemaSnapshot) -> Vec<Changeset> {
        let config = MigrationConfig::default();
        let ctx = GeneratorContext {
            local,
            remote,
            config: &config,
        };
        generate_changesets(&diff_snapshots(remote, local), &ctx)
    }

    fn posts(on_delete: ReferentialAction) -> SchemaSnapshot {
        let mut s = users();
        s.add_table(
            TableInfo::new("posts")
                .column(ColumnInfo::parse("id", "integer").not_null())
                .column(ColumnInfo::parse("user_id", "integer")),
        );
        s.foreign_keys.entry("posts".into()).or_default().insert(
            "posts_user_id_fkey".into(),
            ForeignKeyInfo {
                name: "posts_user_id_fkey".into(),
                columns: vec!["user_id".into()],
                referenced_schema: None,
                referenced_table: "users".into(),
                referenced_columns: vec!["id".into()],
                on_delete,
                on_update: ReferentialAction::NoAction,
            },
        );
        s
    }

    #[test]
    fn test_unique_on_existing_column_needs_manual_fill() {
        let remote = users();
        let mut local = users();
        local.unique_constraints.entry("users".into()).or_default().insert(
            "users_email_key".into(),
            UniqueConstraintInfo {
                name: "users_email_key".into(),
                columns: vec!["email".into()],
                nulls_distinct: true,
            },
        );

        let changesets = run(&remote, &local);
        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].kind, OperationKind::CreateUniqueConstraint);
        assert_eq!(changesets[0].priority, CREATE_CONSTRAINT);
        assert_eq!(changesets[0].warnings[0].code, WarningCode::MF003);
    }

    #[test]
    fn test_foreign_key_action_change() {
        let remote = posts(ReferentialAction::NoAction);
        let local = posts(ReferentialAction::Cascade);

        let changesets = run(&remote, &local);
        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].kind, OperationKind::ChangeForeignKey);
        assert_eq!(changesets[0].priority, CHANGE_FOREIGN_KEY);
        assert_eq!(changesets[0].phase, Phase::Alter);
        match &changesets[0].down[1] {
            Statement::AddForeignKey { constraint, .. } => {
                assert_eq!(constraint.on_delete, ReferentialAction::NoAction)
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_check_removed() {
        let mut remote = users();
        remote.check_constraints.entry("users".into()).or_default().insert(
            "users_id_check".into(),
            CheckConstraintInfo {
                name: "users_id_check".into(),
                expression: "id > 0".into(),
            },
        );
        let local = users();

        let changesets = run(&remote, &local);
        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].kind, OperationKind::DropCheckConstraint);
        assert_eq!(changesets[0].phase, Phase::Contract);
        assert_eq!(changesets[0].priority, DROP_CONSTRAINT);
    }
}
