//! # schemata
//!
//! Schema-per-tenant multi-tenancy for PostgreSQL.
//!
//! One database hosts many tenants, each in its own namespace. A shared pool
//! hands out connections that switch their `search_path` to the active
//! tenant right before the next statement runs, and the active tenant
//! follows the async task rather than the thread.
//!
//! schemata provides:
//! - A task-local tenant context with a blocking fallback
//! - Request routing by domain, folder, session value or header
//! - A catalog streaming static and dynamic tenants in a stable order
//! - Create, clone, drop and migrate for tenant namespaces
//! - Running one command across many schemas, sequentially or in parallel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use schemata::prelude::*;
//! use schemata::postgres::{PgConfig, TenantPool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TenancyConfig::load("schemata.toml")?;
//!     let pool = TenantPool::for_tenancy(
//!         PgConfig::from_url("postgresql://localhost/app")?,
//!         &config,
//!     )?;
//!
//!     let rows = with_schema(Schema::parse("acme")?, async {
//!         let mut conn = pool.get().await?;
//!         conn.query("SELECT id FROM orders", &[]).await
//!     })
//!     .await?;
//!
//!     println!("acme has {} orders", rows.len());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use schemata_core::*;

/// PostgreSQL backend: pool, schema admin, tenant store and migrations.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use schemata_postgres::*;
}

/// Axum layer and extractors.
#[cfg(feature = "axum")]
#[cfg_attr(docsrs, doc(cfg(feature = "axum")))]
pub mod axum {
    pub use schemata_axum::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use schemata_core::prelude::*;
    pub use schemata_core::{
        CommandExecutor, ExecutionMode, ResolverChain, TenantProvisioner, command_fn,
    };

    #[cfg(feature = "postgres")]
    pub use schemata_postgres::prelude::*;

    #[cfg(feature = "axum")]
    pub use schemata_axum::prelude::*;
}
