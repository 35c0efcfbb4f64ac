//! Column definitions.

use serde::{Deserialize, Serialize};

use crate::snapshot::{IdentityGeneration, ReferentialAction};
use crate::types::SqlType;

/// The closed set of column kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    SmallInt,
    Integer,
    BigInt,
    /// `serial`: integer backed by an owned sequence.
    Serial,
    BigSerial,
    SmallSerial,
    Real,
    DoublePrecision,
    Numeric {
        precision: Option<i32>,
        scale: Option<i32>,
    },
    Text,
    Varchar {
        length: Option<i32>,
    },
    Char {
        length: Option<i32>,
    },
    Boolean,
    /// `timestamp without time zone`
    Timestamp,
    /// `timestamp with time zone`
    TimestampTz,
    Date,
    Time,
    Uuid,
    Json,
    Jsonb,
    Bytea,
    /// An enum type declared in the same namespace.
    Enum(String),
    /// Any other type, spelled in SQL.
    Raw(String),
}

impl ColumnKind {
    /// The type in catalog spelling.
    pub fn sql_type(&self) -> SqlType {
        match self {
            Self::SmallInt => SqlType::new("smallint"),
            Self::Integer => SqlType::new("integer"),
            Self::BigInt => SqlType::new("bigint"),
            Self::Serial => SqlType::new("serial"),
            Self::BigSerial => SqlType::new("bigserial"),
            Self::SmallSerial => SqlType::new("smallserial"),
            Self::Real => SqlType::new("real"),
            Self::DoublePrecision => SqlType::new("double precision"),
            Self::Numeric { precision, scale } => SqlType {
                numeric_precision: *precision,
                numeric_scale: precision.map(|_| scale.unwrap_or(0)),
                ..SqlType::new("numeric")
            },
            Self::Text => SqlType::new("text"),
            Self::Varchar { length } => SqlType {
                character_maximum_length: *length,
                ..SqlType::new("character varying")
            },
            Self::Char { length } => SqlType {
                character_maximum_length: Some(length.unwrap_or(1)),
                ..SqlType::new("character")
            },
            Self::Boolean => SqlType::new("boolean"),
            Self::Timestamp => SqlType::new("timestamp without time zone"),
            Self::TimestampTz => SqlType::new("timestamp with time zone"),
            Self::Date => SqlType::new("date"),
            Self::Time => SqlType::new("time without time zone"),
            Self::Uuid => SqlType::new("uuid"),
            Self::Json => SqlType::new("json"),
            Self::Jsonb => SqlType::new("jsonb"),
            Self::Bytea => SqlType::new("bytea"),
            Self::Enum(name) => SqlType::new(name.clone()),
            Self::Raw(sql) => SqlType::parse(sql),
        }
    }

    /// Whether this kind refers to a user-defined enum.
    pub fn is_enum(&self) -> bool {
        matches!(self, Self::Enum(_))
    }
}

/// A column-level foreign key shorthand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnReference {
    pub table: String,
    pub column: String,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column kind.
    pub kind: ColumnKind,
    /// Whether NULL is allowed. Primary key and identity columns never are.
    pub nullable: bool,
    /// Default expression in SQL.
    pub default: Option<String>,
    /// Single-column primary key shorthand.
    pub primary_key: bool,
    /// Single-column unique constraint shorthand.
    pub unique: bool,
    /// Identity generation.
    pub identity: Option<IdentityGeneration>,
    /// Single-column foreign key shorthand.
    pub references: Option<ColumnReference>,
    /// Single-column check constraint shorthand.
    pub check: Option<String>,
}

impl ColumnDef {
    /// Create a nullable column.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
            identity: None,
            references: None,
            check: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_expr(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn identity(mut self, generation: IdentityGeneration) -> Self {
        self.identity = Some(generation);
        self.nullable = false;
        self
    }

    /// Reference `table(column)`.
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ColumnReference {
            table: table.into(),
            column: column.into(),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        });
        self
    }

    /// Set the `ON DELETE` action of the column reference.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        if let Some(reference) = self.references.as_mut() {
            reference.on_delete = action;
        }
        self
    }

    pub fn check(mut self, expression: impl Into<String>) -> Self {
        self.check = Some(expression.into());
        self
    }
}
