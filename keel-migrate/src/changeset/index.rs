use keel_schema::IndexInfo;

use crate::ddl::Statement;
use crate::diff::{Difference, DifferenceKind};

use super::priority::{CHANGE_INDEX, CREATE_INDEX, DROP_INDEX};
use super::{Changeset, GeneratorContext, OperationKind, Phase, named_entries};

/// `index/<table>[/<name>]`
pub(super) fn generate(diff: &Difference, ctx: &GeneratorContext<'_>) -> Option<Vec<Changeset>> {
    let entries = named_entries(diff, "index")?;
    let schema = ctx.namespace();
    let mut changesets = Vec::new();

    for (table, name) in entries {
        // Indexes of a new table are built before it holds any rows.
        let concurrently = ctx.config.concurrent_indexes && !ctx.is_new_table(&table);
        let create = |index: &IndexInfo| Statement::CreateIndex {
            schema: schema.to_string(),
            table: table.clone(),
            index: index.clone(),
            concurrently,
        };
        let drop = |index: &IndexInfo| Statement::DropIndex {
            schema: schema.to_string(),
            name: index.name.clone(),
            concurrently,
        };

        let changeset = match diff.kind {
            DifferenceKind::Create => {
                let index = ctx.local.indexes.get(&table)?.get(&name)?;
                Changeset::new(schema, OperationKind::CreateIndex, Phase::Expand, CREATE_INDEX)
                    .table(&table)
                    .up(create(index))
                    .down(drop(index))
            }
            DifferenceKind::Remove => {
                if ctx.is_dropped_table(&table) {
                    continue;
                }
                let index = ctx.remote.indexes.get(&table)?.get(&name)?;
                Changeset::new(schema, OperationKind::DropIndex, Phase::Contract, DROP_INDEX)
                    .table(&table)
                    .up(drop(index))
                    .down(create(index))
            }
            DifferenceKind::Change => {
                let old = ctx.remote.indexes.get(&table)?.get(&name)?;
                let new = ctx.local.indexes.get(&table)?.get(&name)?;
                Changeset::new(schema, OperationKind::ChangeIndex, Phase::Alter, CHANGE_INDEX)
                    .table(&table)
                    .up(drop(old))
                    .up(create(new))
                    .down(drop(new))
                    .down(create(old))
            }
        };
        changesets.push(changeset);
    }
    Some(changesets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::generate_changesets;
    use crate::changeset::tests::users;
    use crate::config::MigrationConfig;
    use crate::diff::diff_snapshots;
    use keel_schema::{ColumnInfo, SchemaSnapshot, TableInfo};

    fn with_index(mut snapshot: SchemaSnapshot, table: &str, index: IndexInfo) -> SchemaSnapshot {
        snapshot
            .indexes
            .entry(table.into())
            .or_default()
            .insert(index.name.clone(), index);
        snapshot
    }

    #[test]
    fn test_index_on_existing_table_is_concurrent() {
        let remote = users();
        let local = with_index(
            users(),
            "users",
            IndexInfo::new("users_email_idx", vec!["email".into()]),
        );
        let config = MigrationConfig::default();
        let ctx = GeneratorContext {
            local: &local,
            remote: &remote,
            config: &config,
        };

        let changesets = generate_changesets(&diff_snapshots(&remote, &local), &ctx);
        assert_eq!(changesets.len(), 1);
        assert!(changesets[0].requires_no_transaction());
        assert_eq!(changesets[0].priority, CREATE_INDEX);
    }

    #[test]
    fn test_index_on_new_table_is_transactional() {
        let remote = SchemaSnapshot::existing("public");
        let mut local = SchemaSnapshot::existing("public");
        local.add_table(TableInfo::new("posts").column(ColumnInfo::parse("title", "text")));
        let local = with_index(
            local,
            "posts",
            IndexInfo::new("posts_title_idx", vec!["title".into()]),
        );
        let config = MigrationConfig::default();
        let ctx = GeneratorContext {
            local: &local,
            remote: &remote,
            config: &config,
        };

        let changesets = generate_changesets(&diff_snapshots(&remote, &local), &ctx);
        assert_eq!(changesets.len(), 2);
        assert!(changesets.iter().all(|c| !c.requires_no_transaction()));
    }

    #[test]
    fn test_index_change_is_rebuilt() {
        let remote = with_index(
            users(),
            "users",
            IndexInfo::new("users_email_idx", vec!["email".into()]),
        );
        let mut changed = IndexInfo::new("users_email_idx", vec!["email".into()]);
        changed.unique = true;
        let local = with_index(users(), "users", changed);
        let config = MigrationConfig::default().concurrent_indexes(false);
        let ctx = GeneratorContext {
            local: &local,
            remote: &remote,
            config: &config,
        };

        let changesets = generate_changesets(&diff_snapshots(&remote, &local), &ctx);
        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].kind, OperationKind::ChangeIndex);
        assert_eq!(changesets[0].up.len(), 2);
        assert!(!changesets[0].requires_no_transaction());
    }
}
