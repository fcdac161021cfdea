//! Tenant-aware connection pool.

use std::sync::Arc;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use schemata_core::{SearchPathBinder, SearchPathConfig, TenancyConfig};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::config::PgConfig;
use crate::connection::TenantConnection;
use crate::error::{PgError, PgResult};

/// A pool of [`TenantConnection`]s sharing one search-path configuration.
#[derive(Clone)]
pub struct TenantPool {
    inner: Pool,
    config: Arc<PgConfig>,
    binder: SearchPathBinder,
}

impl std::fmt::Debug for TenantPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantPool")
            .field("host", &self.config.host)
            .field("database", &self.config.database)
            .field("binder", &self.binder)
            .finish_non_exhaustive()
    }
}

impl TenantPool {
    /// Create a pool. No connection is opened until the first checkout.
    pub fn new(config: PgConfig, search_path: SearchPathConfig) -> PgResult<Self> {
        config.validate()?;
        let manager = Manager::from_config(
            config.to_pg_config(),
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let inner = Pool::builder(manager)
            .max_size(config.max_connections)
            .wait_timeout(config.wait_timeout)
            .create_timeout(Some(config.connect_timeout))
            .runtime(deadpool_postgres::Runtime::Tokio1)
            .build()
            .map_err(|e| PgError::config(format!("failed to create pool: {e}")))?;

        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            max_connections = config.max_connections,
            "tenant pool created"
        );

        Ok(Self {
            inner,
            config: Arc::new(config),
            binder: SearchPathBinder::new(search_path),
        })
    }

    /// Create a pool using the search-path settings of a tenancy config.
    pub fn for_tenancy(config: PgConfig, tenancy: &TenancyConfig) -> PgResult<Self> {
        Self::new(config, tenancy.search_path_config())
    }

    /// Check out a connection.
    pub async fn get(&self) -> PgResult<TenantConnection> {
        debug!("acquiring connection from pool");
        let client = self.inner.get().await?;
        Ok(TenantConnection::new(client, self.binder.clone()))
    }

    /// The search-path binder shared by every connection.
    pub fn binder(&self) -> &SearchPathBinder {
        &self.binder
    }

    /// Connection settings.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Current pool status.
    pub fn status(&self) -> PoolStatus {
        let status = self.inner.status();
        PoolStatus {
            available: status.available,
            size: status.size,
            max_size: status.max_size,
            waiting: status.waiting,
        }
    }

    /// Whether a connection can be checked out and answers `SELECT 1`.
    pub async fn is_healthy(&self) -> bool {
        match self.inner.get().await {
            Ok(client) => client.query_one("SELECT 1", &[]).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Close the pool and all idle connections.
    pub fn close(&self) {
        self.inner.close();
        info!("tenant pool closed");
    }
}

/// Pool status information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections.
    pub available: usize,
    /// Current total size of the pool.
    pub size: usize,
    /// Maximum size of the pool.
    pub max_size: usize,
    /// Number of tasks waiting for a connection.
    pub waiting: usize,
}
