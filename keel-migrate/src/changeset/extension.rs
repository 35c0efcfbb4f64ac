use crate::ddl::Statement;
use crate::diff::{Difference, DifferenceKind};

use super::priority::{CREATE_EXTENSION, DROP_EXTENSION};
use super::{Changeset, GeneratorContext, OperationKind, Phase, Warning, WarningCode};

/// `extension/<name>`
pub(super) fn generate(diff: &Difference, ctx: &GeneratorContext<'_>) -> Option<Vec<Changeset>> {
    if !diff.matches(&["extension"], 2) {
        return None;
    }
    let schema = ctx.namespace();
    let name = diff.segment(1)?.to_string();
    let create = Statement::CreateExtension {
        schema: schema.to_string(),
        name: name.clone(),
    };
    let drop = Statement::DropExtension { name };

    let changeset = match diff.kind {
        DifferenceKind::Create => Changeset::new(
            schema,
            OperationKind::CreateExtension,
            Phase::Expand,
            CREATE_EXTENSION,
        )
        .up(create)
        .down(drop),
        DifferenceKind::Remove => Changeset::new(
            schema,
            OperationKind::DropExtension,
            Phase::Contract,
            DROP_EXTENSION,
        )
        .up(drop)
        .down(create)
        .warn(Warning::new(WarningCode::D005, schema)),
        DifferenceKind::Change => return Some(Vec::new()),
    };
    Some(vec![changeset])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::generate_changesets;
    use crate::config::MigrationConfig;
    use crate::diff::diff_snapshots;
    use keel_schema::SchemaSnapshot;

    #[test]
    fn test_extension_drop_warns_d005() {
        let mut remote = SchemaSnapshot::existing("public");
        remote.extensions.insert("pgcrypto".into());
        let local = SchemaSnapshot::existing("public");
        let config = MigrationConfig::default();
        let ctx = GeneratorContext {
            local: &local,
            remote: &remote,
            config: &config,
        };
        let changesets = generate_changesets(&diff_snapshots(&remote, &local), &ctx);
        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].warnings[0].code, WarningCode::D005);
        assert_eq!(
            changesets[0].down,
            vec![Statement::CreateExtension {
                schema: "public".into(),
                name: "pgcrypto".into()
            }]
        );
    }
}
