//! Connection pool for PostgreSQL.

use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use keel_migrate::MigrationConfig;
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::config::PgConfig;
use crate::connection::PgConnection;
use crate::error::{PgError, PgResult};
use crate::introspect::PgIntrospector;
use crate::session::PgMigrationSession;

/// A connection pool for PostgreSQL.
#[derive(Clone)]
pub struct PgPool {
    inner: Pool,
}

impl PgPool {
    /// Create a new connection pool from configuration.
    pub fn new(config: PgConfig) -> PgResult<Self> {
        Self::with_pool_config(config, PoolConfig::default())
    }

    /// Create a new connection pool with custom pool configuration.
    pub fn with_pool_config(config: PgConfig, pool_config: PoolConfig) -> PgResult<Self> {
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(config.to_pg_config(), NoTls, mgr_config);

        let pool = Pool::builder(mgr)
            .max_size(pool_config.max_connections)
            .runtime(Runtime::Tokio1)
            .wait_timeout(pool_config.connection_timeout)
            .create_timeout(pool_config.connection_timeout)
            .recycle_timeout(pool_config.idle_timeout)
            .build()
            .map_err(|e| PgError::config(format!("failed to create pool: {e}")))?;

        info!(
            host = %config.host,
            port = %config.port,
            database = %config.database,
            max_connections = %pool_config.max_connections,
            "PostgreSQL connection pool created"
        );

        Ok(Self { inner: pool })
    }

    /// Create a pool from a database URL.
    pub fn from_url(url: impl Into<String>) -> PgResult<Self> {
        Self::new(PgConfig::from_url(url)?)
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> PgResult<PgConnection> {
        debug!("Acquiring connection from pool");
        let client = self.inner.get().await?;
        Ok(PgConnection::new(client))
    }

    /// A catalog source reading through this pool.
    pub fn introspector(&self) -> PgIntrospector {
        PgIntrospector::new(self.clone())
    }

    /// A migration session pinned to one pooled connection.
    ///
    /// The advisory lock is session scoped, so the connection is held for
    /// the lifetime of the returned session.
    pub async fn session(&self, config: &MigrationConfig) -> PgResult<PgMigrationSession> {
        let conn = self.get().await?;
        Ok(PgMigrationSession::new(conn, config))
    }
}

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: usize,
    /// Maximum time to wait for or create a connection.
    pub connection_timeout: Option<Duration>,
    /// Maximum time spent recycling an idle connection.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            connection_timeout: Some(Duration::from_secs(30)),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}
