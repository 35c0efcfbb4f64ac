//! Catalog queries against a live PostgreSQL database.

use async_trait::async_trait;
use keel_migrate::introspect::{
    RawColumn, RawConstraint, RawEnum, RawIndex, RawTrigger, introspect, postgres_queries,
};
use keel_migrate::{CatalogSource, IntrospectionConfig, MigrateResult};
use keel_schema::SchemaSnapshot;
use tokio_postgres::Row;
use tracing::{debug, instrument};

use crate::error::{PgError, PgResult};
use crate::pool::PgPool;

/// Reads namespaces, tables and their sub-objects from the system catalogs.
#[derive(Clone)]
pub struct PgIntrospector {
    pool: PgPool,
}

impl PgIntrospector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Introspect one namespace into a snapshot.
    pub async fn snapshot(
        &self,
        namespace: &str,
        config: &IntrospectionConfig,
    ) -> MigrateResult<SchemaSnapshot> {
        introspect(self, namespace, config).await
    }

    async fn rows(&self, sql: &str, namespace: Option<&str>) -> PgResult<Vec<Row>> {
        let conn = self.pool.get().await?;
        let rows = match namespace {
            Some(namespace) => conn.query(sql, &[&namespace]).await?,
            None => conn.query(sql, &[]).await?,
        };
        debug!(rows = rows.len(), "Catalog query returned");
        Ok(rows)
    }

    async fn map_rows<T>(
        &self,
        sql: &str,
        namespace: &str,
        map: fn(&Row) -> PgResult<T>,
    ) -> MigrateResult<Vec<T>> {
        let rows = self.rows(sql, Some(namespace)).await?;
        Ok(rows.iter().map(map).collect::<PgResult<Vec<_>>>()?)
    }
}

fn get<'a, T: tokio_postgres::types::FromSql<'a>>(row: &'a Row, column: &str) -> PgResult<T> {
    row.try_get(column)
        .map_err(|e| PgError::decode(format!("column {column}: {e}")))
}

fn column_row(row: &Row) -> PgResult<RawColumn> {
    let identity: Option<String> = get(row, "identity")?;
    Ok(RawColumn {
        table: get(row, "table_name")?,
        name: get(row, "column_name")?,
        data_type: get(row, "data_type")?,
        is_nullable: get(row, "is_nullable")?,
        default: get(row, "column_default")?,
        identity: identity.filter(|i| !i.is_empty()),
        is_enum: get(row, "is_enum")?,
        ordinal_position: get(row, "ordinal_position")?,
    })
}

fn constraint_row(row: &Row) -> PgResult<RawConstraint> {
    Ok(RawConstraint {
        table: get(row, "table_name")?,
        name: get(row, "constraint_name")?,
        kind: get(row, "kind")?,
        columns: get(row, "columns")?,
        referenced_schema: get(row, "referenced_schema")?,
        referenced_table: get(row, "referenced_table")?,
        referenced_columns: get(row, "referenced_columns")?,
        on_delete: get(row, "on_delete")?,
        on_update: get(row, "on_update")?,
        definition: get(row, "definition")?,
    })
}

fn index_row(row: &Row) -> PgResult<RawIndex> {
    Ok(RawIndex {
        table: get(row, "table_name")?,
        name: get(row, "index_name")?,
        columns: get(row, "columns")?,
        is_unique: get(row, "is_unique")?,
        method: get(row, "index_method")?,
        predicate: get(row, "predicate")?,
        is_constraint: get(row, "is_constraint")?,
    })
}

fn trigger_row(row: &Row) -> PgResult<RawTrigger> {
    Ok(RawTrigger {
        table: get(row, "table_name")?,
        name: get(row, "trigger_name")?,
        definition: get(row, "definition")?,
    })
}

fn enum_row(row: &Row) -> PgResult<RawEnum> {
    Ok(RawEnum {
        name: get(row, "enum_name")?,
        values: get(row, "enum_values")?,
    })
}

#[async_trait]
impl CatalogSource for PgIntrospector {
    #[instrument(skip(self))]
    async fn namespaces(&self) -> MigrateResult<Vec<String>> {
        let rows = self.rows(postgres_queries::NAMESPACES, None).await?;
        Ok(rows
            .iter()
            .map(|row| get(row, "nspname"))
            .collect::<PgResult<Vec<_>>>()?)
    }

    #[instrument(skip(self))]
    async fn tables(&self, namespace: &str) -> MigrateResult<Vec<String>> {
        self.map_rows(postgres_queries::TABLES, namespace, |row| get(row, "relname"))
            .await
    }

    async fn columns(&self, namespace: &str) -> MigrateResult<Vec<RawColumn>> {
        self.map_rows(postgres_queries::COLUMNS, namespace, column_row)
            .await
    }

    async fn constraints(&self, namespace: &str) -> MigrateResult<Vec<RawConstraint>> {
        self.map_rows(postgres_queries::CONSTRAINTS, namespace, constraint_row)
            .await
    }

    async fn indexes(&self, namespace: &str) -> MigrateResult<Vec<RawIndex>> {
        self.map_rows(postgres_queries::INDEXES, namespace, index_row)
            .await
    }

    async fn triggers(&self, namespace: &str) -> MigrateResult<Vec<RawTrigger>> {
        self.map_rows(postgres_queries::TRIGGERS, namespace, trigger_row)
            .await
    }

    async fn enums(&self, namespace: &str) -> MigrateResult<Vec<RawEnum>> {
        self.map_rows(postgres_queries::ENUMS, namespace, enum_row)
            .await
    }

    async fn extensions(&self, namespace: &str) -> MigrateResult<Vec<String>> {
        self.map_rows(postgres_queries::EXTENSIONS, namespace, |row| get(row, "extname"))
            .await
    }
}
