//! # keel-migrate
//!
//! Schema synchronization and phased migrations for Keel.
//!
//! This crate provides functionality for:
//! - Introspecting a live namespace into a [`keel_schema::SchemaSnapshot`]
//! - Detecting table and column renames by structural similarity
//! - Diffing snapshots as generic trees and turning differences into
//!   reversible, prioritized changesets with warnings
//! - Assembling changesets into Expand, Alter and Contract phases
//! - Rendering migration artifacts and validating their `depends_on` chain
//! - Applying and rolling back migrations under an advisory lock
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ Introspector │   │ LocalCompiler│
//! └──────┬───────┘   └──────┬───────┘
//!        └────────┬─────────┘
//!                 ▼
//!        ┌────────────────┐     ┌─────────────┐     ┌────────────┐
//!        │ RenameDetector │────▶│ Differ      │────▶│ Generators │
//!        └────────────────┘     └─────────────┘     └─────┬──────┘
//!                                                         ▼
//!        ┌────────────────┐     ┌─────────────┐     ┌────────────┐
//!        │ Executor       │◀────│ Renderer    │◀────│ Phases     │
//!        └──────┬─────────┘     └─────────────┘     └────────────┘
//!               ▼
//!        ┌────────────────┐
//!        │ History table  │
//!        └────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use keel_migrate::{MigrationConfig, MigrationRenderer, SchemaSync};
//!
//! async fn sync(compiler: LocalCompiler, catalog: impl CatalogSource, session: impl MigrationSession)
//!     -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let config = MigrationConfig::load("keel.toml")?;
//!     let sync = SchemaSync::new(config, compiler, catalog);
//!
//!     // Plan and write artifacts
//!     let written = sync.generate(&MigrationRenderer::new(), "add users").await?;
//!     println!("Wrote {} migrations", written.len());
//!
//!     // Apply everything pending
//!     let report = sync.engine(session).apply().await?;
//!     println!("{}", report.summary());
//!     report.ensure_success()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Migration Files
//!
//! One TOML file per migration, grouped by phase:
//!
//! ```text
//! migrations/
//! ├── expand/
//! │   ├── 20240301123000001-add-users.toml
//! │   └── 20240301123000002-add-users.toml
//! ├── alter/
//! └── contract/
//! ```

pub mod changeset;
pub mod config;
pub mod ddl;
pub mod diff;
pub mod engine;
pub mod error;
pub mod file;
pub mod history;
pub mod introspect;
pub mod phase;
pub mod rename;
pub mod render;
pub mod shadow;
pub mod sql;
pub mod sync;

// Re-exports
pub use changeset::{
    Changeset, GeneratorContext, OperationKind, Phase, Warning, WarningCode, WarningType,
    generate_changesets,
};
pub use config::MigrationConfig;
pub use ddl::Statement;
pub use diff::{Difference, DifferenceKind, diff_snapshots};
pub use engine::{
    FailedMigration, MigrationEngine, MigrationStatus, RunReport, RunState, pending_migrations,
};
pub use error::{MigrateResult, MigrationError};
pub use file::{MigrationFile, MigrationFileManager};
pub use history::{MigrationRecord, MigrationSession, RecordState, StatementResult};
pub use introspect::{CatalogSource, IntrospectionConfig, SnapshotBuilder};
pub use phase::{PhasePlan, assemble};
pub use rename::{ObjectKind, ObjectRename, RenameDetector, RenameKind, RenameMapping, RenameOutcome};
pub use render::{Migration, MigrationRenderer};
pub use shadow::ShadowSnapshot;
pub use sql::PostgresSqlGenerator;
pub use sync::{Plan, SchemaSync};
