//! Warning registry.
//!
//! Warnings are advisory metadata attached to changesets. They never fail a
//! plan on their own; see [`crate::sync::Plan::check_strict`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad class of a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningType {
    /// Renames break code still using the old name.
    BackwardIncompatible,
    /// Data is removed.
    Destructive,
    /// The statement can hold locks or rewrite the table.
    Blocking,
    /// Existing rows may violate the change; a backfill may be needed.
    NeedsManualFill,
}

/// Stable warning codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WarningCode {
    BI001,
    BI002,
    D001,
    D002,
    D003,
    D004,
    D005,
    B001,
    B002,
    B003,
    B004,
    MF001,
    MF002,
    MF003,
    MF004,
    MF005,
}

impl WarningCode {
    /// Every registered code.
    pub const ALL: [WarningCode; 16] = [
        Self::BI001,
        Self::BI002,
        Self::D001,
        Self::D002,
        Self::D003,
        Self::D004,
        Self::D005,
        Self::B001,
        Self::B002,
        Self::B003,
        Self::B004,
        Self::MF001,
        Self::MF002,
        Self::MF003,
        Self::MF004,
        Self::MF005,
    ];

    /// The code as surfaced to operators, e.g. `D002`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BI001 => "BI001",
            Self::BI002 => "BI002",
            Self::D001 => "D001",
            Self::D002 => "D002",
            Self::D003 => "D003",
            Self::D004 => "D004",
            Self::D005 => "D005",
            Self::B001 => "B001",
            Self::B002 => "B002",
            Self::B003 => "B003",
            Self::B004 => "B004",
            Self::MF001 => "MF001",
            Self::MF002 => "MF002",
            Self::MF003 => "MF003",
            Self::MF004 => "MF004",
            Self::MF005 => "MF005",
        }
    }

    /// Look a code up by its string form.
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    pub fn warning_type(&self) -> WarningType {
        match self {
            Self::BI001 | Self::BI002 => WarningType::BackwardIncompatible,
            Self::D001 | Self::D002 | Self::D003 | Self::D004 | Self::D005 => {
                WarningType::Destructive
            }
            Self::B001 | Self::B002 | Self::B003 | Self::B004 => WarningType::Blocking,
            Self::MF001 | Self::MF002 | Self::MF003 | Self::MF004 | Self::MF005 => {
                WarningType::NeedsManualFill
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::BI001 => "table rename",
            Self::BI002 => "column rename",
            Self::D001 => "schema drop",
            Self::D002 => "table drop",
            Self::D003 => "column drop",
            Self::D004 => "trigger drop",
            Self::D005 => "extension drop",
            Self::B001 => "column type change",
            Self::B002 => "volatile default added",
            Self::B003 => "serial column added",
            Self::B004 => "bigserial column added",
            Self::MF001 => "primary key added to existing nullable column",
            Self::MF002 => "primary key added to new column",
            Self::MF003 => "unique constraint added to existing column",
            Self::MF004 => "non-nullable column added",
            Self::MF005 => "column changed to non-nullable",
        }
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A warning attached to a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    #[serde(rename = "type")]
    pub warning_type: WarningType,
    pub code: WarningCode,
    pub schema: String,
    pub table: Option<String>,
    pub column: Option<String>,
}

impl Warning {
    /// A warning on a namespace-level object.
    pub fn new(code: WarningCode, schema: impl Into<String>) -> Self {
        Self {
            warning_type: code.warning_type(),
            code,
            schema: schema.into(),
            table: None,
            column: None,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.code.description())?;
        match (&self.table, &self.column) {
            (Some(table), Some(column)) => write!(f, " ({}.{table}.{column})", self.schema),
            (Some(table), None) => write!(f, " ({}.{table})", self.schema),
            _ => write!(f, " ({})", self.schema),
        }
    }
}
