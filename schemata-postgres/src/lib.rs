//! # schemata-postgres
//!
//! PostgreSQL backend for schemata.
//!
//! This crate provides:
//! - [`TenantPool`], a `deadpool-postgres` pool whose connections apply the
//!   active schema's search path lazily, right before the next statement
//! - [`PgSchemaAdmin`] for `CREATE`/`DROP`/clone of tenant namespaces, with
//!   the clone procedure installed on first use
//! - [`PgTenantStore`] for dynamic tenant and domain records
//! - [`PgMigrationRunner`] applying a directory of SQL files per schema
//!
//! ## Example
//!
//! ```rust,ignore
//! use schemata_core::{Schema, context};
//! use schemata_postgres::{PgConfig, TenantPool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = TenantPool::new(
//!         PgConfig::from_url("postgresql://localhost/app")?,
//!         Default::default(),
//!     )?;
//!
//!     context::with_schema(Schema::parse("acme")?, async {
//!         let mut conn = pool.get().await?;
//!         // Runs with search_path = "acme", "public"
//!         conn.query("SELECT * FROM orders", &[]).await
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod config;
pub mod connection;
pub mod error;
pub mod migrate;
pub mod pool;
pub mod store;

pub use admin::{CLONE_SCHEMA_SQL, PgSchemaAdmin};
pub use config::{DatabaseSection, PgConfig};
pub use connection::{TenantConnection, TenantTransaction};
pub use error::{PgError, PgResult};
pub use migrate::{MigrationFile, MigrationsSection, PgMigrationRunner, load_migrations};
pub use pool::{PoolStatus, TenantPool};
pub use store::{PgTenantStore, StoreSql};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::admin::PgSchemaAdmin;
    pub use crate::config::PgConfig;
    pub use crate::connection::TenantConnection;
    pub use crate::error::{PgError, PgResult};
    pub use crate::migrate::PgMigrationRunner;
    pub use crate::pool::TenantPool;
    pub use crate::store::PgTenantStore;
}
