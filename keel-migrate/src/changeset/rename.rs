use crate::ddl::Statement;
use crate::rename::{ObjectKind, ObjectRename, RenameKind, RenameMapping};

use super::priority::{RENAME_COLUMN, RENAME_TABLE};
use super::{Changeset, OperationKind, Phase, Warning, WarningCode};

/// Changesets for accepted renames.
///
/// Table renames run before column renames, so column renames always address
/// the table under its new name. Indexes and constraints renamed along with a
/// mapping follow it in `up` and are restored first in `down`.
pub fn rename_changesets(mappings: &[RenameMapping]) -> Vec<Changeset> {
    mappings
        .iter()
        .map(|mapping| {
            let schema = mapping.schema.as_str();
            let changeset = match mapping.kind {
                RenameKind::Table => {
                    Changeset::new(schema, OperationKind::RenameTable, Phase::Alter, RENAME_TABLE)
                        .table(&mapping.to)
                        .up(Statement::RenameTable {
                            schema: schema.to_string(),
                            from: mapping.from.clone(),
                            to: mapping.to.clone(),
                        })
                        .down(Statement::RenameTable {
                            schema: schema.to_string(),
                            from: mapping.to.clone(),
                            to: mapping.from.clone(),
                        })
                        .warn(Warning::new(WarningCode::BI001, schema).table(&mapping.from))
                }
                RenameKind::Column => Changeset::new(
                    schema,
                    OperationKind::RenameColumn,
                    Phase::Alter,
                    RENAME_COLUMN,
                )
                .table(&mapping.table)
                .up(Statement::RenameColumn {
                    schema: schema.to_string(),
                    table: mapping.table.clone(),
                    from: mapping.from.clone(),
                    to: mapping.to.clone(),
                })
                .down(Statement::RenameColumn {
                    schema: schema.to_string(),
                    table: mapping.table.clone(),
                    from: mapping.to.clone(),
                    to: mapping.from.clone(),
                })
                .warn(
                    Warning::new(WarningCode::BI002, schema)
                        .table(&mapping.table)
                        .column(&mapping.from),
                ),
            };
            with_object_renames(changeset, mapping)
        })
        .collect()
}

fn with_object_renames(mut changeset: Changeset, mapping: &RenameMapping) -> Changeset {
    let schema = &mapping.schema;
    let table = &mapping.table;
    for object in &mapping.objects {
        changeset.up.push(object_statement(schema, table, object, false));
    }
    let mut down: Vec<Statement> = mapping
        .objects
        .iter()
        .rev()
        .map(|object| object_statement(schema, table, object, true))
        .collect();
    down.append(&mut changeset.down);
    changeset.down = down;
    changeset
}

fn object_statement(schema: &str, table: &str, object: &ObjectRename, revert: bool) -> Statement {
    let (from, to) = if revert {
        (object.to.clone(), object.from.clone())
    } else {
        (object.from.clone(), object.to.clone())
    };
    let (schema, table) = (schema.to_string(), table.to_string());
    match object.kind {
        ObjectKind::Index => Statement::RenameIndex {
            schema,
            table,
            from,
            to,
        },
        ObjectKind::Constraint => Statement::RenameConstraint {
            schema,
            table,
            from,
            to,
        },
    }
}
