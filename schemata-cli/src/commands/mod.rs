//! CLI command implementations.

pub mod clone;
pub mod create;
pub mod drop;
pub mod exec;
pub mod init;
pub mod install;
pub mod list;
pub mod migrate;

use std::sync::Arc;

use schemata_core::logging::{self, LogSettings};
use schemata_core::{
    CommandExecutor, ExecutionReport, SchemaManager, TenantCatalog, TenantStore,
};
use schemata_postgres::{PgMigrationRunner, PgSchemaAdmin, PgTenantStore, TenantPool};
use tracing::{debug, warn};

use crate::cli::{ExecutionArgs, GlobalArgs};
use crate::config::Config;
use crate::error::{CliError, CliResult};
use crate::output::{self, ProgressPrinter};

/// Install logging: `-v` flags win over `SCHEMATA_*` variables.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => {
            logging::init();
            return;
        }
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let format = LogSettings::from_env().map(|s| s.format).unwrap_or_default();
    logging::init_with(LogSettings::with_level(level).with_format(format));
}

/// Everything a command needs, built from `schemata.toml`.
pub struct Project {
    /// Parsed configuration.
    pub config: Config,
    /// Tenant-aware pool.
    pub pool: TenantPool,
    /// Dynamic tenant records, when dynamic tenants are enabled.
    pub store: Option<Arc<PgTenantStore>>,
}

impl Project {
    /// Load the configuration and open a (lazy) pool.
    pub fn load(global: &GlobalArgs) -> CliResult<Self> {
        let config = Config::load(&global.config)?;
        debug!(
            path = %global.config.display(),
            static_tenants = config.tenancy.tenants.len(),
            dynamic = config.tenancy.has_dynamic(),
            "loaded configuration"
        );
        let pg = config.pg_config(global.database_url.as_deref())?;
        let pool = TenantPool::for_tenancy(pg, &config.tenancy)?;
        let store = match &config.tenancy.dynamic {
            Some(dynamic) => Some(Arc::new(PgTenantStore::new(pool.clone(), dynamic)?)),
            None => None,
        };
        Ok(Self {
            config,
            pool,
            store,
        })
    }

    /// Catalog over static and dynamic tenants.
    pub fn catalog(&self) -> TenantCatalog {
        let catalog = TenantCatalog::new(Arc::new(self.config.tenancy.clone()));
        match &self.store {
            Some(store) => catalog.with_store(store.clone() as Arc<dyn TenantStore>),
            None => catalog,
        }
    }

    /// Lifecycle manager migrating with the configured directory.
    pub async fn manager(&self) -> CliResult<SchemaManager> {
        let runner =
            PgMigrationRunner::from_section(self.pool.clone(), &self.config.migrations).await?;
        debug!(
            directory = %self.config.migrations.directory.display(),
            migrations = runner.migrations().len(),
            "loaded migrations"
        );
        Ok(SchemaManager::new(
            Arc::new(PgSchemaAdmin::new(self.pool.clone())),
            Arc::new(runner),
        )
        .with_clone_reference(self.config.tenancy.clone_reference().cloned()))
    }

    /// Executor reporting progress to the terminal.
    pub fn executor(&self, args: &ExecutionArgs) -> CommandExecutor {
        let mut config = self.config.executor.clone();
        if let Some(timeout) = args.timeout() {
            config = config.with_timeout(timeout);
        }
        CommandExecutor::new(config).with_observer(Arc::new(ProgressPrinter))
    }

    /// The dynamic tenant store, or an error naming `command`.
    pub fn require_store(&self, command: &str) -> CliResult<Arc<PgTenantStore>> {
        self.store.clone().ok_or_else(|| {
            CliError::Config(format!("`{command}` needs [tenancy.dynamic] to be configured"))
        })
    }
}

/// Print the summary and fail when any schema failed.
pub fn finish(report: &ExecutionReport) -> CliResult<()> {
    output::report(report);
    for outcome in report.failed() {
        warn!(schema = %outcome.schema, "schema failed");
    }
    if report.is_success() {
        output::newline();
        output::success(&format!("{} schema(s) done", report.outcomes.len()));
        Ok(())
    } else {
        Err(CliError::Failed {
            failed: report.failed().count(),
            skipped: report.skipped.len(),
            workers: report.worker_errors.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemata_core::TenancyError;

    #[test]
    fn test_finish_fails_on_worker_error() {
        let report = ExecutionReport {
            worker_errors: vec![TenancyError::database("too many connections")],
            ..ExecutionReport::default()
        };
        match finish(&report) {
            Err(CliError::Failed {
                failed: 0,
                skipped: 0,
                workers: 1,
            }) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(finish(&ExecutionReport::default()).is_ok());
    }
}
