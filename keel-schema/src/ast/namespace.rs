//! Namespace definitions.

use serde::{Deserialize, Serialize};

use super::TableDef;

/// An enum type definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<String>,
}

impl EnumDef {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Everything the application declares for one database namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDef {
    /// Namespace (PostgreSQL schema) name.
    pub name: String,
    pub tables: Vec<TableDef>,
    pub enums: Vec<EnumDef>,
    /// Extensions the namespace relies on.
    pub extensions: Vec<String>,
}

impl NamespaceDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Vec::new(),
            enums: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    pub fn enum_type(mut self, definition: EnumDef) -> Self {
        self.enums.push(definition);
        self
    }

    pub fn extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }
}
