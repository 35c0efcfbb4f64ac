use keel_schema::SchemaSnapshot;

use crate::ddl::Statement;
use crate::diff::{Difference, DifferenceKind};

use super::priority::{CREATE_TABLE, DROP_TABLE};
use super::{Changeset, GeneratorContext, OperationKind, Phase, Warning, WarningCode};

/// `table/<name>`
pub(super) fn generate(diff: &Difference, ctx: &GeneratorContext<'_>) -> Option<Vec<Changeset>> {
    if !diff.matches(&["table"], 2) {
        return None;
    }
    let schema = ctx.namespace();
    let table = diff.segment(1)?;

    let changeset = match diff.kind {
        DifferenceKind::Create => {
            let info = ctx.local.table(table)?;
            Changeset::new(schema, OperationKind::CreateTable, Phase::Expand, CREATE_TABLE)
                .table(table)
                .up(Statement::CreateTable {
                    schema: schema.to_string(),
                    table: table.to_string(),
                    columns: info.columns.values().cloned().collect(),
                })
                .down(Statement::DropTable {
                    schema: schema.to_string(),
                    table: table.to_string(),
                })
        }
        DifferenceKind::Remove => {
            let mut changeset =
                Changeset::new(schema, OperationKind::DropTable, Phase::Contract, DROP_TABLE)
                    .table(table)
                    .up(Statement::DropTable {
                        schema: schema.to_string(),
                        table: table.to_string(),
                    })
                    .warn(Warning::new(WarningCode::D002, schema).table(table));
            changeset.down = recreate_table(ctx.remote, table)?;
            changeset
        }
        DifferenceKind::Change => return Some(Vec::new()),
    };
    Some(vec![changeset])
}

/// Statements rebuilding a table and everything attached to it.
///
/// Sub-objects of a dropped table do not get changesets of their own, so the
/// table's down steps restore them.
pub(super) fn recreate_table(snapshot: &SchemaSnapshot, table: &str) -> Option<Vec<Statement>> {
    let schema = snapshot.namespace.as_str();
    let info = snapshot.table(table)?;
    let mut statements = vec![Statement::CreateTable {
        schema: schema.to_string(),
        table: table.to_string(),
        columns: info.columns.values().cloned().collect(),
    }];

    if let Some(key) = snapshot.primary_keys.get(table) {
        statements.push(Statement::AddPrimaryKey {
            schema: schema.to_string(),
            table: table.to_string(),
            key: key.clone(),
        });
    }
    for constraint in snapshot.unique_constraints.get(table).into_iter().flat_map(|m| m.values()) {
        statements.push(Statement::AddUniqueConstraint {
            schema: schema.to_string(),
            table: table.to_string(),
            constraint: constraint.clone(),
        });
    }
    for check in snapshot.check_constraints.get(table).into_iter().flat_map(|m| m.values()) {
        statements.push(Statement::AddCheckConstraint {
            schema: schema.to_string(),
            table: table.to_string(),
            name: check.name.clone(),
            expression: check.expression.clone(),
        });
    }
    for fk in snapshot.foreign_keys.get(table).into_iter().flat_map(|m| m.values()) {
        statements.push(Statement::AddForeignKey {
            schema: schema.to_string(),
            table: table.to_string(),
            constraint: fk.clone(),
        });
    }
    for index in snapshot.indexes.get(table).into_iter().flat_map(|m| m.values()) {
        statements.push(Statement::CreateIndex {
            schema: schema.to_string(),
            table: table.to_string(),
            index: index.clone(),
            concurrently: false,
        });
    }
    for trigger in snapshot.triggers.get(table).into_iter().flat_map(|m| m.values()) {
        statements.push(Statement::CreateTrigger {
            schema: schema.to_string(),
            table: table.to_string(),
            name: trigger.name.clone(),
            definition: trigger.definition.clone(),
        });
    }
    Some(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::generate_changesets;
    use crate::changeset::tests::users;
    use crate::config::MigrationConfig;
    use crate::diff::diff_snapshots;
    use keel_schema::{IndexInfo, PrimaryKeyInfo};

    #[test]
    fn test_table_drop_only_warns_d002() {
        let mut remote = users();
        remote.primary_keys.insert(
            "users".into(),
            PrimaryKeyInfo {
                name: "users_pkey".into(),
                columns: vec!["id".into()],
            },
        );
        remote.indexes.entry("users".into()).or_default().insert(
            "users_email_idx".into(),
            IndexInfo::new("users_email_idx", vec!["email".into()]),
        );
        let local = keel_schema::SchemaSnapshot::existing("public");
        let config = MigrationConfig::default();
        let ctx = GeneratorContext {
            local: &local,
            remote: &remote,
            config: &config,
        };

        let changesets = generate_changesets(&diff_snapshots(&remote, &local), &ctx);
        assert_eq!(changesets.len(), 1);
        let drop = &changesets[0];
        assert_eq!(drop.kind, OperationKind::DropTable);
        let codes: Vec<WarningCode> = drop.warnings.iter().map(|w| w.code).collect();
        assert_eq!(codes, vec![WarningCode::D002]);
        assert_eq!(drop.down.len(), 3);
    }

    #[test]
    fn test_table_create_keeps_column_order() {
        let remote = keel_schema::SchemaSnapshot::existing("public");
        let local = users();
        let config = MigrationConfig::default();
        let ctx = GeneratorContext {
            local: &local,
            remote: &remote,
            config: &config,
        };
        let changesets = generate_changesets(&diff_snapshots(&remote, &local), &ctx);
        assert_eq!(changesets.len(), 1);
        match &changesets[0].up[0] {
            Statement::CreateTable { columns, .. } => {
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, vec!["id", "email"]);
            }
            other => panic!("unexpected statement {other:?}"),
        }
        assert!(changesets[0].warnings.is_empty());
    }
}
