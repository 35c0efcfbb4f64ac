//! # Keel
//!
//! Declarative schema synchronization for PostgreSQL.
//!
//! Keel compares the schema an application declares with the schema a live
//! database actually has, and turns the difference into reversible,
//! phased migrations:
//!
//! - **Expand** adds namespaces, tables, columns and relaxed constraints
//! - **Alter** changes types, defaults and renames objects
//! - **Contract** drops what is no longer declared
//!
//! Migrations form a `depends_on` chain and are applied under a PostgreSQL
//! advisory lock so that only one deployment migrates at a time.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = NamespaceDef::new("public").table(
//!         TableDef::new("users")
//!             .column(ColumnDef::new("id", ColumnKind::BigSerial).primary_key())
//!             .column(ColumnDef::new("email", ColumnKind::Text).not_null().unique()),
//!     );
//!
//!     let config = MigrationConfig::load("keel.toml")?;
//!     let pool = PgPool::from_url("postgresql://localhost/app")?;
//!     let sync = SchemaSync::new(config.clone(), LocalCompiler::new([app])?, pool.introspector());
//!
//!     sync.generate(&MigrationRenderer::new(), "create users").await?;
//!     let report = sync.engine(pool.session(&config).await?).apply().await?;
//!     report.ensure_success()?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

/// Schema model, declarations and the local compiler.
pub mod schema {
    pub use keel_schema::*;
}

/// Diffing, planning, rendering and execution.
pub mod migrate {
    pub use keel_migrate::*;
}

/// PostgreSQL introspection and migration sessions.
pub mod postgres {
    pub use keel_postgres::*;
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use keel_schema::ast::{
        CheckDef, ColumnDef, ColumnKind, EnumDef, ForeignKeyDef, IndexDef, NamespaceDef,
        TableDef, TriggerDef, UniqueDef,
    };
    pub use keel_schema::{LocalCompiler, SchemaSnapshot};

    pub use keel_migrate::{
        MigrationConfig, MigrationEngine, MigrationError, MigrationRenderer, Plan, SchemaSync,
    };

    pub use keel_postgres::{PgConfig, PgIntrospector, PgMigrationSession, PgPool};
}
