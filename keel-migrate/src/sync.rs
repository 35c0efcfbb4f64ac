//! Schema synchronization facade.
//!
//! [`SchemaSync`] wires the pipeline together for the caller: introspect the
//! live namespace, compile the declared one, detect renames, diff, generate
//! changesets and assemble phases. Rendering and execution stay with
//! [`MigrationRenderer`] and [`MigrationEngine`].

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use keel_schema::{LocalCompiler, SchemaSnapshot};

use crate::changeset::{Changeset, GeneratorContext, Warning, generate_changesets, rename_changesets};
use crate::config::MigrationConfig;
use crate::diff::diff_snapshots;
use crate::engine::MigrationEngine;
use crate::error::{MigrateResult, MigrationError};
use crate::file::MigrationFileManager;
use crate::history::MigrationSession;
use crate::introspect::{CatalogSource, IntrospectionConfig, introspect};
use crate::phase::{PhasePlan, assemble};
use crate::rename::{RenameDetector, RenameMapping, dependency_order};
use crate::render::{Migration, MigrationRenderer};

/// The planned changes for one or more namespaces.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    /// Namespaces covered, in planning order.
    pub namespaces: Vec<String>,
    /// Accepted renames.
    pub renames: Vec<RenameMapping>,
    pub phases: PhasePlan,
}

impl Plan {
    /// All changesets in application order.
    pub fn changesets(&self) -> impl Iterator<Item = &Changeset> {
        self.phases.changesets()
    }

    pub fn warnings(&self) -> Vec<&Warning> {
        self.phases.warnings()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Fail on the first warning whose code is listed in `codes`.
    pub fn check_strict(&self, codes: &[String]) -> MigrateResult<()> {
        match self
            .warnings()
            .into_iter()
            .find(|w| codes.iter().any(|c| c == w.code.as_str()))
        {
            Some(warning) => Err(MigrationError::StrictWarning {
                code: warning.code.to_string(),
                message: warning.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Render the plan into artifacts following `previous`.
    pub fn render(
        &self,
        renderer: &MigrationRenderer,
        name: &str,
        previous: Option<&str>,
    ) -> MigrateResult<Vec<Migration>> {
        renderer.render(&self.phases, name, previous)
    }

    /// One line per phase, e.g. `expand: 3, contract: 1 (2 warnings)`.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no changes".to_string();
        }
        let phases: Vec<String> = self
            .phases
            .phases()
            .map(|(phase, changesets)| format!("{phase}: {}", changesets.len()))
            .collect();
        format!("{} ({} warnings)", phases.join(", "), self.warnings().len())
    }

    fn merge(&mut self, other: Plan) {
        self.namespaces.extend(other.namespaces);
        self.renames.extend(other.renames);
        self.phases.merge(other.phases);
    }
}

/// Compares the declared schema with a live database.
pub struct SchemaSync<C: CatalogSource> {
    config: MigrationConfig,
    compiler: LocalCompiler,
    catalog: C,
    overrides: Vec<RenameMapping>,
}

impl<C: CatalogSource> SchemaSync<C> {
    /// Create a facade over a compiler and a catalog source.
    pub fn new(config: MigrationConfig, compiler: LocalCompiler, catalog: C) -> Self {
        Self {
            config,
            compiler,
            catalog,
            overrides: Vec::new(),
        }
    }

    /// Resolve renames explicitly. Overrides bypass similarity scoring.
    pub fn with_renames(mut self, renames: impl IntoIterator<Item = RenameMapping>) -> Self {
        self.overrides.extend(renames);
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Snapshot of a namespace as it exists in the database.
    pub async fn introspect_remote(&self, namespace: &str) -> MigrateResult<SchemaSnapshot> {
        let config = IntrospectionConfig::for_migrations(&self.config);
        introspect(&self.catalog, namespace, &config).await
    }

    /// Snapshot of a namespace as declared by the application.
    pub fn compile_local(&self, namespace: &str) -> MigrateResult<SchemaSnapshot> {
        Ok(self.compiler.compile(namespace)?)
    }

    /// Plan the changes turning `remote` into `local`.
    pub fn diff(&self, local: &SchemaSnapshot, remote: &SchemaSnapshot) -> MigrateResult<Plan> {
        let detector = RenameDetector::new(self.config.rename_threshold)
            .with_overrides(self.overrides.iter().cloned());
        let outcome = detector.detect(remote, local)?;
        let renames = outcome.mappings();

        let ctx = GeneratorContext {
            local,
            remote: &outcome.remote,
            config: &self.config,
        };
        let differences = diff_snapshots(&outcome.remote, local);
        debug!(
            namespace = %local.namespace,
            differences = differences.len(),
            renames = renames.len(),
            "Diffed namespace"
        );

        let mut changesets = rename_changesets(&renames);
        changesets.extend(generate_changesets(&differences, &ctx));

        let order = dependency_order(remote, local, &renames);
        Ok(Plan {
            namespaces: vec![local.namespace.clone()],
            phases: assemble(changesets, &order, &renames),
            renames,
        })
    }

    /// Plan a single namespace.
    pub async fn plan_namespace(&self, namespace: &str) -> MigrateResult<Plan> {
        let local = self.compile_local(namespace)?;
        let remote = self.introspect_remote(namespace).await?;
        self.diff(&local, &remote)
    }

    /// Plan every declared namespace, plus undeclared ones when
    /// `drop_undeclared_namespaces` is set.
    pub async fn plan(&self) -> MigrateResult<Plan> {
        let mut plan = Plan::default();
        for namespace in self.namespaces().await? {
            plan.merge(self.plan_namespace(&namespace).await?);
        }
        info!(summary = %plan.summary(), "Planned schema changes");
        Ok(plan)
    }

    /// Plan, enforce strict warnings, render and write the artifacts.
    ///
    /// Returns the written migrations; an up-to-date database yields
    /// [`MigrationError::NoChanges`].
    pub async fn generate(
        &self,
        renderer: &MigrationRenderer,
        name: &str,
    ) -> MigrateResult<Vec<Migration>> {
        let plan = self.plan().await?;
        plan.check_strict(&self.config.strict_warnings)?;

        let files = MigrationFileManager::new(&self.config.migrations_dir);
        let previous = files.latest().await?;
        let migrations = plan.render(renderer, name, previous.as_deref())?;
        files.write_all(&migrations).await?;
        info!(count = migrations.len(), "Wrote migrations");
        Ok(migrations)
    }

    /// An executor for the on-disk migrations over `session`.
    pub fn engine<S: MigrationSession>(&self, session: S) -> MigrationEngine<S> {
        MigrationEngine::new(self.config.clone(), session)
    }

    async fn namespaces(&self) -> MigrateResult<Vec<String>> {
        let ignored = |n: &String| self.config.ignored_namespaces.contains(n);
        let mut namespaces: BTreeSet<String> = self
            .compiler
            .namespaces()
            .into_iter()
            .filter(|n| !ignored(n))
            .collect();

        if self.config.drop_undeclared_namespaces {
            for namespace in self.catalog.namespaces().await? {
                if !ignored(&namespace) && namespace != self.config.history_schema {
                    namespaces.insert(namespace);
                }
            }
        }
        Ok(namespaces.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{OperationKind, Phase, WarningCode};
    use crate::introspect::{RawColumn, RawConstraint, RawEnum, RawIndex, RawTrigger};
    use keel_schema::ast::{ColumnDef, ColumnKind, NamespaceDef, TableDef};
    use keel_schema::{ColumnInfo, TableInfo};

    /// A database holding only empty namespaces.
    struct EmptyCatalog(Vec<String>);

    #[async_trait::async_trait]
    impl CatalogSource for EmptyCatalog {
        async fn namespaces(&self) -> MigrateResult<Vec<String>> {
            Ok(self.0.clone())
        }
        async fn tables(&self, _: &str) -> MigrateResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn columns(&self, _: &str) -> MigrateResult<Vec<RawColumn>> {
            Ok(Vec::new())
        }
        async fn constraints(&self, _: &str) -> MigrateResult<Vec<RawConstraint>> {
            Ok(Vec::new())
        }
        async fn indexes(&self, _: &str) -> MigrateResult<Vec<RawIndex>> {
            Ok(Vec::new())
        }
        async fn triggers(&self, _: &str) -> MigrateResult<Vec<RawTrigger>> {
            Ok(Vec::new())
        }
        async fn enums(&self, _: &str) -> MigrateResult<Vec<RawEnum>> {
            Ok(Vec::new())
        }
        async fn extensions(&self, _: &str) -> MigrateResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn app() -> LocalCompiler {
        LocalCompiler::new([NamespaceDef::new("public").table(
            TableDef::new("users")
                .column(ColumnDef::new("id", ColumnKind::Serial).primary_key())
                .column(ColumnDef::new("email", ColumnKind::Text).not_null()),
        )])
        .unwrap()
    }

    fn sync(namespaces: &[&str]) -> SchemaSync<EmptyCatalog> {
        SchemaSync::new(
            MigrationConfig::default(),
            app(),
            EmptyCatalog(namespaces.iter().map(|n| n.to_string()).collect()),
        )
    }

    #[test]
    fn test_diff_against_itself_is_empty() {
        let sync = sync(&["public"]);
        let local = sync.compile_local("public").unwrap();
        let plan = sync.diff(&local, &local).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.summary(), "no changes");
    }

    #[tokio::test]
    async fn test_plan_creates_declared_table() {
        let plan = sync(&["public"]).plan().await.unwrap();
        let kinds: Vec<OperationKind> = plan.changesets().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![OperationKind::CreateTable, OperationKind::CreatePrimaryKey]
        );
        assert_eq!(plan.namespaces, vec!["public"]);
    }

    #[tokio::test]
    async fn test_undeclared_namespace_is_dropped_on_request() {
        let mut sync = sync(&["public", "legacy"]);
        sync.config.drop_undeclared_namespaces = true;
        let plan = sync.plan().await.unwrap();

        let drop = plan.phases.phase(Phase::Contract);
        assert_eq!(drop.len(), 1);
        assert_eq!(drop[0].kind, OperationKind::DropSchema);
        assert_eq!(drop[0].warnings[0].code, WarningCode::D001);
    }

    #[test]
    fn test_check_strict() {
        let sync = sync(&["public"]);
        let mut remote = SchemaSnapshot::existing("public");
        remote.add_table(TableInfo::new("legacy").column(ColumnInfo::parse("id", "integer")));
        let local = SchemaSnapshot::existing("public");
        let plan = sync.diff(&local, &remote).unwrap();

        assert!(plan.check_strict(&["B001".to_string()]).is_ok());
        let err = plan.check_strict(&["D002".to_string()]).unwrap_err();
        assert!(matches!(err, MigrationError::StrictWarning { ref code, .. } if code == "D002"));
    }

    #[test]
    fn test_explicit_rename_override() {
        let sync = sync(&["public"]).with_renames([RenameMapping::table("public", "people", "users")]);
        let local = sync.compile_local("public").unwrap();
        let mut remote = local.clone();
        let users = remote.tables.remove("users").unwrap();
        remote.add_table(TableInfo { name: "people".into(), ..users });
        let pk = remote.primary_keys.remove("users").unwrap();
        remote.primary_keys.insert("people".into(), pk);

        let plan = sync.diff(&local, &remote).unwrap();
        assert_eq!(plan.renames.len(), 1);
        let kinds: Vec<OperationKind> = plan.changesets().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![OperationKind::RenameTable]);
    }
}
