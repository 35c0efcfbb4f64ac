use keel_schema::ColumnInfo;

use crate::ddl::Statement;
use crate::diff::{Difference, DifferenceKind};

use super::priority::*;
use super::{Changeset, GeneratorContext, OperationKind, Phase, Warning, WarningCode};

/// `table/<table>/column/<column>[/<attribute>]`
pub(super) fn generate(diff: &Difference, ctx: &GeneratorContext<'_>) -> Option<Vec<Changeset>> {
    if diff.matches(&["table", "*", "column"], 4) {
        return whole_column(diff, ctx);
    }
    if diff.matches(&["table", "*", "column"], 5) {
        return attribute(diff, ctx);
    }
    None
}

fn whole_column(diff: &Difference, ctx: &GeneratorContext<'_>) -> Option<Vec<Changeset>> {
    let schema = ctx.namespace();
    let table = diff.segment(1)?;
    let name = diff.segment(3)?;

    let changeset = match diff.kind {
        DifferenceKind::Create => {
            let column = ctx.local.column(table, name)?;
            let mut changeset =
                Changeset::new(schema, OperationKind::CreateColumn, Phase::Expand, CREATE_COLUMN)
                    .table(table)
                    .up(Statement::AddColumn {
                        schema: schema.to_string(),
                        table: table.to_string(),
                        column: column.clone(),
                    })
                    .down(Statement::DropColumn {
                        schema: schema.to_string(),
                        table: table.to_string(),
                        column: name.to_string(),
                    });
            for code in added_column_warnings(column) {
                changeset = changeset.warn(Warning::new(code, schema).table(table).column(name));
            }
            changeset
        }
        DifferenceKind::Remove => {
            let column = ctx.remote.column(table, name)?;
            Changeset::new(schema, OperationKind::DropColumn, Phase::Contract, DROP_COLUMN)
                .table(table)
                .up(Statement::DropColumn {
                    schema: schema.to_string(),
                    table: table.to_string(),
                    column: name.to_string(),
                })
                .down(Statement::AddColumn {
                    schema: schema.to_string(),
                    table: table.to_string(),
                    column: column.clone(),
                })
                .warn(Warning::new(WarningCode::D003, schema).table(table).column(name))
        }
        DifferenceKind::Change => return Some(Vec::new()),
    };
    Some(vec![changeset])
}

fn added_column_warnings(column: &ColumnInfo) -> Vec<WarningCode> {
    let mut codes = Vec::new();
    match column.data_type.as_str() {
        "serial" | "smallserial" => codes.push(WarningCode::B003),
        "bigserial" => codes.push(WarningCode::B004),
        _ => {}
    }
    if column.default.as_ref().is_some_and(|d| d.volatile) {
        codes.push(WarningCode::B002);
    }
    if !column.is_nullable
        && column.default.is_none()
        && column.identity.is_none()
        && !column.is_serial()
    {
        codes.push(WarningCode::MF004);
    }
    codes
}

fn attribute(diff: &Difference, ctx: &GeneratorContext<'_>) -> Option<Vec<Changeset>> {
    let schema = ctx.namespace().to_string();
    let table = diff.segment(1)?.to_string();
    let name = diff.segment(3)?.to_string();
    let new = ctx.local.column(&table, &name)?;
    let old = ctx.remote.column(&table, &name)?;

    let alter = |priority: i32| {
        Changeset::new(&schema, OperationKind::ChangeColumn, Phase::Alter, priority).table(&table)
    };
    let warning = |code: WarningCode| Warning::new(code, &schema).table(&table).column(&name);
    let target = || (schema.clone(), table.clone(), name.clone());

    let changeset = match (diff.segment(4)?, diff.kind) {
        ("dataType", _) => {
            let (schema, table, column) = target();
            alter(COLUMN_DATA_TYPE)
                .up(Statement::AlterColumnType {
                    schema: schema.clone(),
                    table: table.clone(),
                    column: column.clone(),
                    data_type: new.full_data_type(),
                    user_defined: new.user_defined,
                })
                .down(Statement::AlterColumnType {
                    schema,
                    table,
                    column,
                    data_type: old.full_data_type(),
                    user_defined: old.user_defined,
                })
                .warn(warning(WarningCode::B001))
        }
        ("isNullable", _) => {
            let (schema, table, column) = target();
            let set = Statement::SetNotNull {
                schema: schema.clone(),
                table: table.clone(),
                column: column.clone(),
            };
            let drop = Statement::DropNotNull {
                schema,
                table,
                column,
            };
            if new.is_nullable {
                alter(COLUMN_NULLABILITY).up(drop).down(set)
            } else {
                alter(COLUMN_NULLABILITY)
                    .up(set)
                    .down(drop)
                    .warn(warning(WarningCode::MF005))
            }
        }
        ("default", kind) => {
            let set = |column: &ColumnInfo| {
                column.default.as_ref().map(|d| {
                    let (schema, table, column) = target();
                    Statement::SetColumnDefault {
                        schema,
                        table,
                        column,
                        expression: d.expression.clone(),
                    }
                })
            };
            let (schema, table, column) = target();
            let drop = Statement::DropColumnDefault {
                schema,
                table,
                column,
            };
            let mut changeset = match kind {
                DifferenceKind::Create => alter(COLUMN_DEFAULT_ADD).up(set(new)?).down(drop),
                DifferenceKind::Remove => alter(COLUMN_DEFAULT_DROP).up(drop).down(set(old)?),
                DifferenceKind::Change => {
                    alter(COLUMN_DEFAULT_CHANGE).up(set(new)?).down(set(old)?)
                }
            };
            if new.default.as_ref().is_some_and(|d| d.volatile) {
                changeset = changeset.warn(warning(WarningCode::B002));
            }
            changeset
        }
        ("identity", kind) => {
            let (schema, table, column) = target();
            match kind {
                DifferenceKind::Create => alter(COLUMN_IDENTITY_ADD)
                    .up(Statement::AddIdentity {
                        schema: schema.clone(),
                        table: table.clone(),
                        column: column.clone(),
                        generation: new.identity?,
                    })
                    .down(Statement::DropIdentity {
                        schema,
                        table,
                        column,
                    }),
                DifferenceKind::Remove => alter(COLUMN_IDENTITY_DROP)
                    .up(Statement::DropIdentity {
                        schema: schema.clone(),
                        table: table.clone(),
                        column: column.clone(),
                    })
                    .down(Statement::AddIdentity {
                        schema,
                        table,
                        column,
                        generation: old.identity?,
                    }),
                DifferenceKind::Change => alter(COLUMN_IDENTITY_CHANGE)
                    .up(Statement::SetIdentityGeneration {
                        schema: schema.clone(),
                        table: table.clone(),
                        column: column.clone(),
                        generation: new.identity?,
                    })
                    .down(Statement::SetIdentityGeneration {
                        schema,
                        table,
                        column,
                        generation: old.identity?,
                    }),
            }
        }
        _ => return Some(Vec::new()),
    };
    Some(vec![changeset])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::generate_changesets;
    use crate::changeset::tests::users;
    use crate::config::MigrationConfig;
    use crate::diff::diff_snapshots;
    use keel_schema::SchemaSnapshot;

    fn run(remote: &SchemaSnapshot, local: &SchemaSnapshot) -> Vec<Changeset> {
        let config = MigrationConfig::default();
        let ctx = GeneratorContext {
            local,
            remote,
            config: &config,
        };
        generate_changesets(&diff_snapshots(remote, local), &ctx)
    }

    fn codes(changeset: &Changeset) -> Vec<WarningCode> {
        changeset.warnings.iter().map(|w| w.code).collect()
    }

    #[test]
    fn test_add_not_null_column_without_default() {
        let remote = users();
        let mut local = users();
        local
            .tables
            .get_mut("users")
            .unwrap()
            .add_column(ColumnInfo::parse("age", "integer").not_null());

        let changesets = run(&remote, &local);
        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].phase, Phase::Expand);
        assert_eq!(codes(&changesets[0]), vec![WarningCode::MF004]);
    }

    #[test]
    fn test_add_bigserial_column() {
        let remote = users();
        let mut local = users();
        local
            .tables
            .get_mut("users")
            .unwrap()
            .add_column(ColumnInfo::parse("seq", "bigserial").not_null());
        let changesets = run(&remote, &local);
        assert_eq!(codes(&changesets[0]), vec![WarningCode::B004]);
    }

    #[test]
    fn test_drop_column_warns_d003() {
        let remote = users();
        let mut local = users();
        local.tables.get_mut("users").unwrap().columns.shift_remove("email");
        let changesets = run(&remote, &local);
        assert_eq!(changesets[0].kind, OperationKind::DropColumn);
        assert_eq!(changesets[0].phase, Phase::Contract);
        assert_eq!(codes(&changesets[0]), vec![WarningCode::D003]);
    }

    #[test]
    fn test_type_and_nullability_change() {
        let remote = users();
        let mut local = users();
        local
            .tables
            .get_mut("users")
            .unwrap()
            .add_column(ColumnInfo::parse("email", "varchar(320)").not_null());

        let changesets = run(&remote, &local);
        assert_eq!(changesets.len(), 2);
        assert_eq!(changesets[0].priority, COLUMN_DATA_TYPE);
        assert_eq!(codes(&changesets[0]), vec![WarningCode::B001]);
        assert_eq!(changesets[1].priority, COLUMN_NULLABILITY);
        assert_eq!(codes(&changesets[1]), vec![WarningCode::MF005]);
        assert!(changesets.iter().all(|c| c.phase == Phase::Alter));
    }

    #[test]
    fn test_volatile_default_added() {
        let remote = users();
        let mut local = users();
        local
            .tables
            .get_mut("users")
            .unwrap()
            .add_column(ColumnInfo::parse("email", "text").default_expr("gen_random_uuid()::text"));

        let changesets = run(&remote, &local);
        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].priority, COLUMN_DEFAULT_ADD);
        assert_eq!(codes(&changesets[0]), vec![WarningCode::B002]);
        assert!(matches!(changesets[0].down[0], Statement::DropColumnDefault { .. }));
    }
}
