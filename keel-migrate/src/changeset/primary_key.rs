use keel_schema::PrimaryKeyInfo;

use crate::ddl::Statement;
use crate::diff::{Difference, DifferenceKind};

use super::priority::{CREATE_PRIMARY_KEY, DROP_PRIMARY_KEY, UPDATE_PRIMARY_KEY};
use super::{Changeset, GeneratorContext, OperationKind, Phase, Warning, WarningCode};

/// `primaryKey/<table>`
pub(super) fn generate(diff: &Difference, ctx: &GeneratorContext<'_>) -> Option<Vec<Changeset>> {
    if !diff.matches(&["primaryKey"], 2) {
        return None;
    }
    let schema = ctx.namespace();
    let table = diff.segment(1)?;

    let add = |key: &PrimaryKeyInfo| Statement::AddPrimaryKey {
        schema: schema.to_string(),
        table: table.to_string(),
        key: key.clone(),
    };
    let drop = |key: &PrimaryKeyInfo| Statement::DropConstraint {
        schema: schema.to_string(),
        table: table.to_string(),
        name: key.name.clone(),
    };

    let changeset = match diff.kind {
        DifferenceKind::Create => {
            let key = ctx.local.primary_keys.get(table)?;
            let mut changeset = Changeset::new(
                schema,
                OperationKind::CreatePrimaryKey,
                Phase::Expand,
                CREATE_PRIMARY_KEY,
            )
            .table(table)
            .up(add(key))
            .down(drop(key));
            if ctx.is_existing_table(table) {
                for column in &key.columns {
                    let code = match ctx.remote.column(table, column) {
                        Some(existing) if existing.is_nullable => WarningCode::MF001,
                        Some(_) => continue,
                        None => WarningCode::MF002,
                    };
                    changeset = changeset.warn(Warning::new(code, schema).table(table).column(column));
                }
            }
            changeset
        }
        DifferenceKind::Remove => {
            if ctx.is_dropped_table(table) {
                return Some(Vec::new());
            }
            let key = ctx.remote.primary_keys.get(table)?;
            Changeset::new(
                schema,
                OperationKind::DropPrimaryKey,
                Phase::Contract,
                DROP_PRIMARY_KEY,
            )
            .table(table)
            .up(drop(key))
            .down(add(key))
        }
        DifferenceKind::Change => {
            let old = ctx.remote.primary_keys.get(table)?;
            let new = ctx.local.primary_keys.get(table)?;
            Changeset::new(
                schema,
                OperationKind::UpdatePrimaryKey,
                Phase::Alter,
                UPDATE_PRIMARY_KEY,
            )
            .table(table)
            .up(drop(old))
            .up(add(new))
            .down(drop(new))
            .down(add(old))
        }
    };
    Some(vec![changeset])
}
