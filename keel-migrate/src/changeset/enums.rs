use tracing::warn;

use crate::ddl::Statement;
use crate::diff::{Difference, DifferenceKind};

use super::priority::{CHANGE_ENUM, CREATE_ENUM, DROP_ENUM};
use super::{Changeset, GeneratorContext, OperationKind, Phase};

/// `enum/<name>`
pub(super) fn generate(diff: &Difference, ctx: &GeneratorContext<'_>) -> Option<Vec<Changeset>> {
    if !diff.matches(&["enum"], 2) {
        return None;
    }
    let schema = ctx.namespace();
    let name = diff.segment(1)?;

    let create = |values: &[String]| Statement::CreateEnum {
        schema: schema.to_string(),
        name: name.to_string(),
        values: values.to_vec(),
    };
    let drop = Statement::DropEnum {
        schema: schema.to_string(),
        name: name.to_string(),
    };

    let changeset = match diff.kind {
        DifferenceKind::Create => {
            let values = &ctx.local.enums.get(name)?.values;
            Changeset::new(schema, OperationKind::CreateEnum, Phase::Expand, CREATE_ENUM)
                .up(create(values))
                .down(drop)
        }
        DifferenceKind::Remove => {
            let values = &ctx.remote.enums.get(name)?.values;
            Changeset::new(schema, OperationKind::DropEnum, Phase::Contract, DROP_ENUM)
                .up(drop)
                .down(create(values))
        }
        DifferenceKind::Change => {
            let old = &ctx.remote.enums.get(name)?.values;
            let new = &ctx.local.enums.get(name)?.values;
            let Some(additions) = added_values(old, new) else {
                warn!(
                    schema,
                    name,
                    "Enum values were removed or reordered; this is not migrated automatically"
                );
                return Some(Vec::new());
            };

            // Labels cannot be removed again, so there is no down step.
            let mut changeset =
                Changeset::new(schema, OperationKind::ChangeEnum, Phase::Expand, CHANGE_ENUM);
            for (value, before) in additions {
                changeset = changeset.up(Statement::AddEnumValue {
                    schema: schema.to_string(),
                    name: name.to_string(),
                    value,
                    before,
                });
            }
            changeset
        }
    };
    Some(vec![changeset])
}

/// Labels added to `old`, each with the existing label it precedes.
///
/// Returns `None` when `old` is not an ordered subsequence of `new`.
fn added_values(old: &[String], new: &[String]) -> Option<Vec<(String, Option<String>)>> {
    let mut remaining = old.iter().peekable();
    for value in new {
        if remaining.peek() == Some(&value) {
            remaining.next();
        }
    }
    if remaining.peek().is_some() {
        return None;
    }

    let additions = new
        .iter()
        .enumerate()
        .filter(|(_, v)| !old.contains(v))
        .map(|(i, v)| {
            let before = new[i + 1..].iter().find(|n| old.contains(n)).cloned();
            (v.clone(), before)
        })
        .collect();
    Some(additions)
}
