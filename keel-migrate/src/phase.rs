//! Phase assembly.
//!
//! Changesets arrive tagged with their natural phase. The assembler promotes
//! everything touching a renamed table into the Alter phase, so it runs after
//! the rename, then orders each phase by priority and table dependency.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::changeset::{Changeset, Phase, Warning, priority};
use crate::rename::{RenameKind, RenameMapping};

/// Ordered changesets per phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasePlan {
    pub expand: Vec<Changeset>,
    pub alter: Vec<Changeset>,
    pub contract: Vec<Changeset>,
}

impl PhasePlan {
    /// Changesets of one phase in application order.
    pub fn phase(&self, phase: Phase) -> &[Changeset] {
        match phase {
            Phase::Expand => &self.expand,
            Phase::Alter => &self.alter,
            Phase::Contract => &self.contract,
        }
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut Vec<Changeset> {
        match phase {
            Phase::Expand => &mut self.expand,
            Phase::Alter => &mut self.alter,
            Phase::Contract => &mut self.contract,
        }
    }

    /// Non-empty phases in application order.
    pub fn phases(&self) -> impl Iterator<Item = (Phase, &[Changeset])> {
        Phase::ALL
            .into_iter()
            .map(|p| (p, self.phase(p)))
            .filter(|(_, changesets)| !changesets.is_empty())
    }

    /// All changesets in application order.
    pub fn changesets(&self) -> impl Iterator<Item = &Changeset> {
        self.expand.iter().chain(&self.alter).chain(&self.contract)
    }

    pub fn len(&self) -> usize {
        self.expand.len() + self.alter.len() + self.contract.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append another namespace's plan.
    ///
    /// Each phase is re-sorted by priority alone; the sort is stable, so both
    /// plans keep their own dependency order within a priority.
    pub fn merge(&mut self, other: PhasePlan) {
        for (phase, changesets) in [
            (Phase::Expand, other.expand),
            (Phase::Alter, other.alter),
            (Phase::Contract, other.contract),
        ] {
            let target = self.phase_mut(phase);
            target.extend(changesets);
            target.sort_by_key(|c| c.priority);
        }
    }

    /// Every warning attached to a changeset, in application order.
    pub fn warnings(&self) -> Vec<&Warning> {
        self.changesets().flat_map(|c| &c.warnings).collect()
    }
}

/// Assemble changesets into phases.
///
/// `table_order` is the dependency order of tables, referenced tables first.
/// Ties on priority follow that order, except in the drop band where
/// referencing tables go first. Expand changesets on a renamed table move to
/// the alter phase so they run after the rename; contract changesets stay put.
pub fn assemble(
    changesets: Vec<Changeset>,
    table_order: &[String],
    renames: &[RenameMapping],
) -> PhasePlan {
    let renamed: BTreeSet<&str> = renames
        .iter()
        .map(|m| match m.kind {
            RenameKind::Table => m.to.as_str(),
            RenameKind::Column => m.table.as_str(),
        })
        .collect();
    let positions: HashMap<&str, usize> = table_order
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();

    let mut plan = PhasePlan::default();
    for mut changeset in changesets {
        if changeset.phase == Phase::Expand
            && renamed.iter().any(|t| changeset.addresses_table(t))
        {
            debug!(
                kind = ?changeset.kind,
                table = ?changeset.table_name,
                "Promoting changeset on renamed table to alter phase"
            );
            changeset.phase = Phase::Alter;
        }
        plan.phase_mut(changeset.phase).push(changeset);
    }

    let len = table_order.len();
    let rank = |changeset: &Changeset| -> (i32, usize) {
        let position = match changeset.table_name.as_deref() {
            None => 0,
            Some(table) => {
                let position = positions.get(table).copied().unwrap_or(len);
                if priority::is_drop(changeset.priority) {
                    len - position.min(len) + 1
                } else {
                    position + 1
                }
            }
        };
        (changeset.priority, position)
    };
    for phase in Phase::ALL {
        plan.phase_mut(phase).sort_by_key(|c| rank(c));
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{OperationKind, rename_changesets};
    use crate::ddl::Statement;

    fn drop_table(table: &str) -> Changeset {
        Changeset::new("public", OperationKind::DropTable, Phase::Contract, priority::DROP_TABLE)
            .table(table)
    }

    fn create_table(table: &str) -> Changeset {
        Changeset::new("public", OperationKind::CreateTable, Phase::Expand, priority::CREATE_TABLE)
            .table(table)
    }

    fn order(tables: &[&str]) -> Vec<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_creates_follow_dependency_order() {
        let plan = assemble(
            vec![
                create_table("posts"),
                create_table("users"),
                Changeset::new("public", OperationKind::CreateSchema, Phase::Expand, priority::CREATE_SCHEMA),
            ],
            &order(&["users", "posts"]),
            &[],
        );
        let kinds: Vec<_> = plan.expand.iter().map(|c| c.table_name.clone()).collect();
        assert_eq!(kinds, vec![None, Some("users".into()), Some("posts".into())]);
    }

    #[test]
    fn test_drops_run_in_reverse_dependency_order() {
        let plan = assemble(
            vec![drop_table("users"), drop_table("posts")],
            &order(&["users", "posts"]),
            &[],
        );
        let tables: Vec<_> = plan.contract.iter().filter_map(|c| c.table_name.as_deref()).collect();
        assert_eq!(tables, vec!["posts", "users"]);
    }

    #[test]
    fn test_priority_non_decreasing_within_phase() {
        let plan = assemble(
            vec![
                Changeset::new("public", OperationKind::CreateIndex, Phase::Expand, priority::CREATE_INDEX)
                    .table("users"),
                create_table("users"),
                Changeset::new("public", OperationKind::CreateColumn, Phase::Expand, priority::CREATE_COLUMN)
                    .table("posts"),
            ],
            &order(&["users", "posts"]),
            &[],
        );
        for (_, changesets) in plan.phases() {
            assert!(changesets.windows(2).all(|w| w[0].priority <= w[1].priority));
        }
    }

    #[test]
    fn test_changes_on_renamed_table_are_promoted() {
        let renames = vec![RenameMapping::table("public", "people", "users")];
        let mut changesets = rename_changesets(&renames);
        changesets.push(
            Changeset::new("public", OperationKind::CreateColumn, Phase::Expand, priority::CREATE_COLUMN)
                .table("users"),
        );
        changesets.push(
            Changeset::new("public", OperationKind::CreateForeignKey, Phase::Expand, priority::CREATE_CONSTRAINT)
                .table("posts")
                .up(Statement::AddForeignKey {
                    schema: "public".into(),
                    table: "posts".into(),
                    constraint: keel_schema::ForeignKeyInfo {
                        name: "posts_author_fkey".into(),
                        columns: vec!["author".into()],
                        referenced_schema: None,
                        referenced_table: "users".into(),
                        referenced_columns: vec!["id".into()],
                        on_delete: Default::default(),
                        on_update: Default::default(),
                    },
                }),
        );
        changesets.push(create_table("tags"));

        let plan = assemble(changesets, &order(&["people", "users", "posts", "tags"]), &renames);
        assert_eq!(plan.expand.len(), 1);
        let alter: Vec<_> = plan.alter.iter().map(|c| c.kind).collect();
        assert_eq!(
            alter,
            vec![
                OperationKind::RenameTable,
                OperationKind::CreateColumn,
                OperationKind::CreateForeignKey,
            ]
        );
    }

    #[test]
    fn test_drops_on_renamed_table_stay_in_contract() {
        let renames = vec![RenameMapping::table("public", "people", "users")];
        let mut changesets = rename_changesets(&renames);
        changesets.push(
            Changeset::new("public", OperationKind::DropColumn, Phase::Contract, priority::DROP_COLUMN)
                .table("users")
                .up(Statement::DropColumn {
                    schema: "public".into(),
                    table: "users".into(),
                    column: "email".into(),
                }),
        );
        changesets.push(
            Changeset::new("public", OperationKind::DropTable, Phase::Contract, priority::DROP_TABLE)
                .table("sessions")
                .up(Statement::DropTable {
                    schema: "public".into(),
                    table: "sessions".into(),
                }),
        );

        let plan = assemble(changesets, &order(&["people", "users", "sessions"]), &renames);
        let alter: Vec<_> = plan.alter.iter().map(|c| c.kind).collect();
        assert_eq!(alter, vec![OperationKind::RenameTable]);
        let contract: Vec<_> = plan.contract.iter().map(|c| c.kind).collect();
        assert_eq!(contract, vec![OperationKind::DropColumn, OperationKind::DropTable]);
    }

    #[test]
    fn test_merge_keeps_priority_order() {
        let mut plan = assemble(vec![create_table("users")], &order(&["users"]), &[]);
        let audit = assemble(
            vec![
                Changeset::new("audit", OperationKind::CreateSchema, Phase::Expand, priority::CREATE_SCHEMA),
                create_table("events"),
            ],
            &order(&["events"]),
            &[],
        );
        plan.merge(audit);
        let priorities: Vec<i32> = plan.expand.iter().map(|c| c.priority).collect();
        assert_eq!(
            priorities,
            vec![priority::CREATE_SCHEMA, priority::CREATE_TABLE, priority::CREATE_TABLE]
        );
        assert_eq!(plan.expand[1].table_name.as_deref(), Some("users"));
    }
}
