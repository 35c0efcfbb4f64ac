use crate::ddl::Statement;
use crate::diff::{Difference, DifferenceKind};

use super::priority::{CREATE_SCHEMA, DROP_SCHEMA};
use super::{Changeset, GeneratorContext, OperationKind, Phase, Warning, WarningCode};

/// `schema/<name>`
pub(super) fn generate(diff: &Difference, _ctx: &GeneratorContext<'_>) -> Option<Vec<Changeset>> {
    if !diff.matches(&["schema"], 2) {
        return None;
    }
    let schema = diff.segment(1)?.to_string();
    let create = Statement::CreateSchema {
        schema: schema.clone(),
    };
    let drop = Statement::DropSchema {
        schema: schema.clone(),
    };

    let changeset = match diff.kind {
        DifferenceKind::Create => {
            Changeset::new(&schema, OperationKind::CreateSchema, Phase::Expand, CREATE_SCHEMA)
                .up(create)
                .down(drop)
        }
        DifferenceKind::Remove => {
            Changeset::new(&schema, OperationKind::DropSchema, Phase::Contract, DROP_SCHEMA)
                .up(drop)
                .down(create)
                .warn(Warning::new(WarningCode::D001, &schema))
        }
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
    fn test_schema_drop_warns_d001() {
        let remote = SchemaSnapshot::existing("audit");
        let local = SchemaSnapshot::new("audit");
        let config = MigrationConfig::default();
        let ctx = GeneratorContext {
            local: &local,
            remote: &remote,
            config: &config,
        };
        let changesets = generate_changesets(&diff_snapshots(&remote, &local), &ctx);
        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].kind, OperationKind::DropSchema);
        assert_eq!(changesets[0].phase, Phase::Contract);
        assert_eq!(changesets[0].warnings[0].code, WarningCode::D001);
    }

    #[test]
    fn test_schema_create_is_first() {
        let remote = SchemaSnapshot::new("audit");
        let local = SchemaSnapshot::existing("audit");
        let config = MigrationConfig::default();
        let ctx = GeneratorContext {
            local: &local,
            remote: &remote,
            config: &config,
        };
        let changesets = generate_changesets(&diff_snapshots(&remote, &local), &ctx);
        assert_eq!(changesets[0].priority, 0);
        assert_eq!(changesets[0].down, vec![Statement::DropSchema { schema: "audit".into() }]);
    }
}
