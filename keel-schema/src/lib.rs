//! # keel-schema
//!
//! The canonical schema model shared by every Keel component, and the
//! compiler that produces it from declarative definitions.
//!
//! Two sources produce a [`SchemaSnapshot`] for a namespace:
//!
//! - catalog introspection of a live database (see `keel-migrate` and
//!   `keel-postgres`), and
//! - the [`LocalCompiler`], from the application's [`ast::NamespaceDef`]s.
//!
//! Both spell types and defaults identically ([`types`], [`default`]), so the
//! differ can compare snapshots by value.
//!
//! ## Example
//!
//! ```rust
//! use keel_schema::ast::{ColumnDef, ColumnKind, NamespaceDef, TableDef};
//! use keel_schema::LocalCompiler;
//!
//! let app = NamespaceDef::new("public").table(
//!     TableDef::new("users")
//!         .column(ColumnDef::new("id", ColumnKind::Serial).primary_key())
//!         .column(ColumnDef::new("email", ColumnKind::Text).not_null().unique()),
//! );
//!
//! let compiler = LocalCompiler::new([app]).unwrap();
//! let snapshot = compiler.compile("public").unwrap();
//! assert_eq!(snapshot.primary_keys["users"].name, "users_pkey");
//! ```

pub mod ast;
pub mod compiler;
pub mod default;
pub mod error;
pub mod snapshot;
pub mod types;

pub use compiler::{LocalCompiler, compile_namespace};
pub use default::DefaultValue;
pub use error::{SchemaError, SchemaResult};
pub use snapshot::{
    CheckConstraintInfo, ColumnInfo, EnumInfo, ForeignKeyInfo, IdentityGeneration, IndexInfo,
    PrimaryKeyInfo, ReferentialAction, SchemaSnapshot, TableInfo, TriggerInfo,
    UniqueConstraintInfo,
};
pub use types::SqlType;
