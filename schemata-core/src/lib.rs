//! # schemata-core
//!
//! Schema-per-tenant multi-tenancy primitives, independent of any database
//! driver or web framework:
//! - Validated schema names and the [`Schema`] value
//! - The active-schema context, scoped per async task
//! - `search_path` computation and lazy per-connection binding
//! - Request routing by domain, folder, session value or header
//! - Tenant enumeration with wildcard selection
//! - Namespace lifecycle (create, clone, drop, migrate)
//! - Running a command across many schemas, sequentially or in parallel
//!
//! ## Context
//!
//! ```rust
//! use schemata_core::{Schema, context};
//!
//! let acme = Schema::parse("acme").unwrap();
//! context::with_schema_sync(acme, || {
//!     assert_eq!(context::current().name().as_str(), "acme");
//! });
//! assert!(context::current().is_public());
//! ```
//!
//! ## Search path
//!
//! ```rust
//! use schemata_core::{Schema, SearchPathConfig, compute_search_path};
//!
//! let acme = Schema::parse("acme").unwrap();
//! let config = SearchPathConfig::default();
//! assert_eq!(compute_search_path(&acme, &config), r#""acme", "public""#);
//! assert_eq!(compute_search_path(&Schema::public(), &config), r#""public""#);
//! ```
//!
//! ## Name validation
//!
//! ```rust
//! use schemata_core::is_valid_schema_name;
//!
//! assert!(is_valid_schema_name("acme_2024"));
//! assert!(!is_valid_schema_name("pg_catalog"));
//! assert!(!is_valid_schema_name("acme; drop"));
//! ```

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod logging;
pub mod provision;
pub mod routing;
pub mod schema;
pub mod search_path;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalog::{SchemaClass, SchemaSelection, TenantCatalog};
pub use config::{DynamicTenantConfig, StaticTenantConfig, TenancyConfig};
pub use context::{SchemaGuard, with_schema, with_schema_sync};
pub use error::{BoxError, ErrorCode, TenancyError, TenancyResult};
pub use executor::{
    CommandExecutor, ExecutionMode, ExecutionReport, ExecutorConfig, ProgressObserver,
    SchemaCommand, SchemaOutcome, command_fn,
};
pub use lifecycle::{
    CloneOptions, CreateOptions, DropOptions, LifecycleEvent, MigrationRunner, SchemaAdmin,
    SchemaManager,
};
pub use provision::TenantProvisioner;
pub use routing::{
    DomainResolver, PrefixCache, RequestInfo, Resolution, Resolver, ResolverChain, TenantUrls,
    TokenSource,
};
pub use schema::{
    MAX_SCHEMA_NAME_LENGTH, PUBLIC_SCHEMA, RoutingInfo, Schema, SchemaName, is_valid_schema_name,
    validate_schema_name,
};
pub use search_path::{
    BindingState, SearchPathBinder, SearchPathConfig, SearchPathTarget, compute_search_path,
    set_search_path_sql,
};
pub use store::{DomainRecord, NewDomain, TenantRecord, TenantStore};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::context::{self, with_schema, with_schema_sync};
    pub use crate::error::{TenancyError, TenancyResult};
    pub use crate::schema::{Schema, SchemaName};
    pub use crate::search_path::{SearchPathBinder, SearchPathTarget};
    pub use crate::{TenancyConfig, TenantCatalog, SchemaSelection, SchemaManager};
}
