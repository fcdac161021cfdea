//! CLI configuration handling.

use std::path::Path;

use schemata_core::{ExecutorConfig, TenancyConfig};
use schemata_postgres::{DatabaseSection, MigrationsSection, PgConfig};
use serde::Deserialize;

use crate::error::{CliError, CliResult};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "schemata.toml";

/// Contents of `schemata.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tenants, routing and search path settings
    pub tenancy: TenancyConfig,

    /// Database connection
    pub database: Option<DatabaseSection>,

    /// Migration files
    pub migrations: MigrationsSection,

    /// Cross-schema execution
    pub executor: ExecutorConfig,
}

impl Config {
    /// Load and validate configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> CliResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.tenancy.validate()?;
        Ok(config)
    }

    /// Connection settings, with `url_override` replacing the configured URL.
    pub fn pg_config(&self, url_override: Option<&str>) -> CliResult<PgConfig> {
        let section = match (url_override, &self.database) {
            (Some(url), Some(section)) => DatabaseSection {
                url: url.to_string(),
                ..section.clone()
            },
            (Some(url), None) => DatabaseSection {
                url: url.to_string(),
                max_connections: None,
                connect_timeout_secs: None,
                application_name: None,
            },
            (None, Some(section)) => section.clone(),
            (None, None) => {
                return Err(CliError::Config(
                    "no database configured; set [database].url or SCHEMATA_DATABASE_URL".into(),
                ));
            }
        };
        Ok(PgConfig::from_section(&section)?)
    }
}

/// Starter configuration written by `schemata init`.
pub fn template(url: &str, dynamic: bool) -> String {
    let mut content = String::from(
        r#"# schemata configuration

[tenancy]
# Namespaces appended to every tenant's search path
extra_search_paths = []
session_key = "tenant"
header = "x-tenant"

[tenancy.tenants.public]
domains = ["localhost"]
"#,
    );
    if dynamic {
        content.push_str(
            r#"
[tenancy.dynamic]
tenants_table = "tenants"
domains_table = "domains"
# clone_reference = "sample"
"#,
        );
    }
    content.push_str(&format!(
        r#"
[database]
url = "{url}"
max_connections = 10

[migrations]
directory = "migrations"
table_name = "_schemata_migrations"

[executor]
max_workers = 4
# operation_timeout_secs = 600
"#
    ));
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_template_parses() {
        let config = Config::parse(&template("postgresql://localhost/app", true)).unwrap();
        assert!(config.tenancy.has_dynamic());
        assert!(config.tenancy.is_static("public"));
        assert_eq!(config.executor.max_workers, 4);
        assert_eq!(
            config.database.as_ref().map(|d| d.url.as_str()),
            Some("postgresql://localhost/app")
        );
    }

    #[test]
    fn test_empty_document() {
        let config = Config::parse("").unwrap();
        assert!(config.database.is_none());
        assert!(config.pg_config(None).is_err());
        let pg = config.pg_config(Some("postgresql://db/app")).unwrap();
        assert_eq!(pg.host, "db");
        assert_eq!(pg.database, "app");
    }

    #[test]
    fn test_url_override_keeps_pool_settings() {
        let config = Config::parse(
            r#"
            [database]
            url = "postgresql://localhost/app"
            max_connections = 3
            "#,
        )
        .unwrap();
        let pg = config.pg_config(Some("postgresql://other/app")).unwrap();
        assert_eq!(pg.host, "other");
        assert_eq!(pg.max_connections, 3);
    }

    #[test]
    fn test_invalid_tenant_is_rejected() {
        let err = Config::parse("[tenancy.tenants.default]\ndomains = []\n").unwrap_err();
        assert!(matches!(err, CliError::Tenancy(_)));
    }
}
