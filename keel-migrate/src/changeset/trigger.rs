use crate::ddl::Statement;
use crate::diff::{Difference, DifferenceKind};

use super::priority::{CREATE_TRIGGER, DROP_TRIGGER, REPLACE_TRIGGER};
use super::{Changeset, GeneratorContext, OperationKind, Phase, Warning, WarningCode, named_entries};

/// `trigger/<table>[/<name>]`
pub(super) fn generate(diff: &Difference, ctx: &GeneratorContext<'_>) -> Option<Vec<Changeset>> {
    let entries = named_entries(diff, "trigger")?;
    let schema = ctx.namespace();
    let mut changesets = Vec::new();

    for (table, name) in entries {
        let create = |definition: &str| Statement::CreateTrigger {
            schema: schema.to_string(),
            table: table.clone(),
            name: name.clone(),
            definition: definition.to_string(),
        };
        let drop = Statement::DropTrigger {
            schema: schema.to_string(),
            table: table.clone(),
            name: name.clone(),
        };
        let local = ctx.local.triggers.get(&table).and_then(|t| t.get(&name));
        let remote = ctx.remote.triggers.get(&table).and_then(|t| t.get(&name));

        let changeset = match diff.kind {
            DifferenceKind::Create => {
                Changeset::new(schema, OperationKind::CreateTrigger, Phase::Expand, CREATE_TRIGGER)
                    .table(&table)
                    .up(create(&local?.definition))
                    .down(drop)
            }
            DifferenceKind::Remove => {
                if ctx.is_dropped_table(&table) {
                    continue;
                }
                Changeset::new(schema, OperationKind::DropTrigger, Phase::Contract, DROP_TRIGGER)
                    .table(&table)
                    .up(drop)
                    .down(create(&remote?.definition))
                    .warn(Warning::new(WarningCode::D004, schema).table(&table))
            }
            DifferenceKind::Change => Changeset::new(
                schema,
                OperationKind::ReplaceTrigger,
                Phase::Alter,
                REPLACE_TRIGGER,
            )
            .table(&table)
            .up(drop.clone())
            .up(create(&local?.definition))
            .down(drop)
            .down(create(&remote?.definition)),
        };
        changesets.push(changeset);
    }
    Some(changesets)
}
