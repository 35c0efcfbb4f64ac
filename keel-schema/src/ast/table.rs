//! Table definitions and their constraints.

use serde::{Deserialize, Serialize};

use super::ColumnDef;
use crate::snapshot::ReferentialAction;

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Composite primary key. Column-level `primary_key` flags are merged in.
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexDef>,
    pub uniques: Vec<UniqueDef>,
    pub foreign_keys: Vec<ForeignKeyDef>,
    pub checks: Vec<CheckDef>,
    pub triggers: Vec<TriggerDef>,
}

impl TableDef {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            uniques: Vec::new(),
            foreign_keys: Vec::new(),
            checks: Vec::new(),
            triggers: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Declare a composite primary key.
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn unique(mut self, unique: UniqueDef) -> Self {
        self.uniques.push(unique);
        self
    }

    pub fn foreign_key(mut self, foreign_key: ForeignKeyDef) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn check(mut self, check: CheckDef) -> Self {
        self.checks.push(check);
        self
    }

    pub fn trigger(mut self, trigger: TriggerDef) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Find a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// An index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Explicit name; defaults to `{table}_{columns}_idx`.
    pub name: Option<String>,
    /// Columns or expressions.
    pub columns: Vec<String>,
    pub unique: bool,
    /// Access method; defaults to `btree`.
    pub method: Option<String>,
    /// Partial index predicate.
    pub predicate: Option<String>,
}

impl IndexDef {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            columns: strings(columns),
            unique: false,
            method: None,
            predicate: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn using(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }
}

/// A unique constraint definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueDef {
    /// Explicit name; defaults to `{table}_{columns}_key`.
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub nulls_distinct: bool,
}

impl UniqueDef {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            columns: strings(columns),
            nulls_distinct: true,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn nulls_not_distinct(mut self) -> Self {
        self.nulls_distinct = false;
        self
    }
}

/// A foreign key definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    /// Explicit name; defaults to `{table}_{columns}_fkey`.
    pub name: Option<String>,
    pub columns: Vec<String>,
    /// Namespace of the referenced table when it is not the owner's.
    pub references_schema: Option<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl ForeignKeyDef {
    pub fn new<I, S, J, T>(columns: I, table: impl Into<String>, references: J) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            name: None,
            columns: strings(columns),
            references_schema: None,
            references_table: table.into(),
            references_columns: strings(references),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.references_schema = Some(schema.into());
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }
}

/// A check constraint definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDef {
    pub name: String,
    pub expression: String,
}

impl CheckDef {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// When a trigger fires relative to the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerTiming {
    Before,
    After,
    InsteadOf,
}

impl TriggerTiming {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Before => "BEFORE",
            Self::After => "AFTER",
            Self::InsteadOf => "INSTEAD OF",
        }
    }
}

/// Events a trigger fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Insert,
    Delete,
    Update,
    Truncate,
}

impl TriggerEvent {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Delete => "DELETE",
            Self::Update => "UPDATE",
            Self::Truncate => "TRUNCATE",
        }
    }
}

/// A trigger definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDef {
    pub name: String,
    pub timing: TriggerTiming,
    pub events: Vec<TriggerEvent>,
    /// `FOR EACH ROW` when true, `FOR EACH STATEMENT` otherwise.
    pub for_each_row: bool,
    /// Optional `WHEN` condition.
    pub condition: Option<String>,
    /// Function call, e.g. `set_updated_at()`.
    pub function: String,
}

impl TriggerDef {
    pub fn new(
        name: impl Into<String>,
        timing: TriggerTiming,
        events: Vec<TriggerEvent>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            timing,
            events,
            for_each_row: true,
            condition: None,
            function: function.into(),
        }
    }

    pub fn for_each_statement(mut self) -> Self {
        self.for_each_row = false;
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Render the definition the way `pg_get_triggerdef` prints it.
    pub fn definition(&self, namespace: &str, table: &str) -> String {
        // pg_get_triggerdef lists events in catalog bit order.
        let mut events = self.events.clone();
        events.sort();
        events.dedup();
        let events = events
            .iter()
            .map(TriggerEvent::as_sql)
            .collect::<Vec<_>>()
            .join(" OR ");

        let level = if self.for_each_row { "ROW" } else { "STATEMENT" };
        let condition = self
            .condition
            .as_ref()
            .map(|c| format!(" WHEN ({c})"))
            .unwrap_or_default();

        format!(
            "CREATE TRIGGER {} {} {} ON {}.{} FOR EACH {}{} EXECUTE FUNCTION {}",
            self.name,
            self.timing.as_sql(),
            events,
            namespace,
            table,
            level,
            condition,
            self.function
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ColumnKind;

    #[test]
    fn test_trigger_definition() {
        let trigger = TriggerDef::new(
            "users_touch",
            TriggerTiming::Before,
            vec![TriggerEvent::Update, TriggerEvent::Insert],
            "set_updated_at()",
        );
        assert_eq!(
            trigger.definition("public", "users"),
            "CREATE TRIGGER users_touch BEFORE INSERT OR UPDATE ON public.users \
             FOR EACH ROW EXECUTE FUNCTION set_updated_at()"
        );
    }

    #[test]
    fn test_table_builder() {
        let table = TableDef::new("orders")
            .column(ColumnDef::new("id", ColumnKind::BigSerial).primary_key())
            .column(ColumnDef::new("user_id", ColumnKind::Integer).not_null())
            .foreign_key(ForeignKeyDef::new(["user_id"], "users", ["id"]))
            .index(IndexDef::new(["user_id"]));

        assert_eq!(table.columns.len(), 2);
        assert!(table.get_column("user_id").is_some());
        assert_eq!(table.foreign_keys[0].references_table, "users");
    }
}
