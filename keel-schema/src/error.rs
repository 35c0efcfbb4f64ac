//! Error types for schema definition and compilation.

use miette::Diagnostic;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while validating or compiling a declarative schema.
///
/// All of these are configuration errors: they are detected before any
/// database interaction takes place.
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaError {
    /// Two namespace definitions share a name.
    #[error("namespace `{0}` is declared more than once")]
    #[diagnostic(
        code(keel::schema::duplicate_namespace),
        help("merge the definitions or rename one of the namespaces")
    )]
    DuplicateNamespace(String),

    /// Duplicate definition inside a namespace or table.
    #[error("duplicate {kind} `{name}`")]
    #[diagnostic(code(keel::schema::duplicate))]
    Duplicate { kind: String, name: String },

    /// Invalid table definition.
    #[error("invalid table `{table}`: {message}")]
    #[diagnostic(code(keel::schema::invalid_table))]
    InvalidTable { table: String, message: String },

    /// Invalid column definition.
    #[error("invalid column `{table}.{column}`: {message}")]
    #[diagnostic(code(keel::schema::invalid_column))]
    InvalidColumn {
        table: String,
        column: String,
        message: String,
    },

    /// A constraint, index or trigger refers to a column the table does not have.
    #[error("`{object}` on `{table}` references unknown column `{column}`")]
    #[diagnostic(code(keel::schema::unknown_column))]
    UnknownColumn {
        table: String,
        object: String,
        column: String,
    },

    /// A column refers to an enum type that is not declared in its namespace.
    #[error("column `{table}.{column}` uses undeclared enum `{enum_name}`")]
    #[diagnostic(code(keel::schema::unknown_enum))]
    UnknownEnum {
        table: String,
        column: String,
        enum_name: String,
    },

    /// Identifier that PostgreSQL would reject or silently truncate.
    #[error("invalid identifier `{0}`: {1}")]
    #[diagnostic(code(keel::schema::invalid_identifier))]
    InvalidIdentifier(String, String),
}

impl SchemaError {
    /// Create an invalid table error.
    pub fn invalid_table(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTable {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an invalid column error.
    pub fn invalid_column(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidColumn {
            table: table.into(),
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate definition error.
    pub fn duplicate(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Duplicate {
            kind: kind.into(),
            name: name.into(),
        }
    }
}
