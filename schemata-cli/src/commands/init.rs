//! `schemata init` - write a starter configuration.

use schemata_postgres::{PgSchemaAdmin, PgTenantStore, TenantPool};

use crate::cli::InitArgs;
use crate::config::{CONFIG_FILE_NAME, Config, template};
use crate::error::{CliError, CliResult};
use crate::output;

/// URL written when none is given.
const DEFAULT_URL: &str = "postgresql://postgres@localhost:5432/app";

/// Run the init command
pub async fn run(args: InitArgs) -> CliResult<()> {
    output::header("Init");

    let config_path = args.path.join(CONFIG_FILE_NAME);
    if config_path.exists() && !args.force {
        return Err(CliError::Config(format!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        )));
    }

    let url = args.url.as_deref().unwrap_or(DEFAULT_URL);
    let content = template(url, args.dynamic);
    let config = Config::parse(&content)?;

    tokio::fs::create_dir_all(&args.path).await?;
    tokio::fs::write(&config_path, &content).await?;
    output::kv("Config", &config_path.display().to_string());

    let migrations = args.path.join(&config.migrations.directory);
    tokio::fs::create_dir_all(&migrations).await?;
    output::kv("Migrations", &migrations.display().to_string());

    if args.install {
        output::newline();
        install(&config).await?;
    }

    output::newline();
    output::success("schemata initialized successfully");
    output::newline();
    output::section("Next steps");
    output::list_item(&format!("Review {CONFIG_FILE_NAME}"));
    output::list_item("Add .sql files to the migrations directory");
    output::list_item("Run `schemata migrate`");
    Ok(())
}

async fn install(config: &Config) -> CliResult<()> {
    let pool = TenantPool::for_tenancy(config.pg_config(None)?, &config.tenancy)?;

    let total = if config.tenancy.dynamic.is_some() { 2 } else { 1 };
    output::step(1, total, "Installing clone procedure...");
    PgSchemaAdmin::new(pool.clone())
        .install_clone_function()
        .await?;

    if let Some(dynamic) = &config.tenancy.dynamic {
        output::step(2, total, "Creating tenant tables...");
        PgTenantStore::new(pool, dynamic)?
            .install()
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args(path: PathBuf) -> InitArgs {
        InitArgs {
            path,
            url: Some("postgresql://localhost/shop".into()),
            dynamic: true,
            install: false,
            force: false,
        }
    }

    #[tokio::test]
    async fn test_init_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        run(args(dir.path().to_path_buf())).await.unwrap();

        let config = Config::load(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert!(config.tenancy.has_dynamic());
        assert!(dir.path().join("migrations").is_dir());
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        run(args(dir.path().to_path_buf())).await.unwrap();
        assert!(run(args(dir.path().to_path_buf())).await.is_err());

        let mut forced = args(dir.path().to_path_buf());
        forced.force = true;
        run(forced).await.unwrap();
    }
}
