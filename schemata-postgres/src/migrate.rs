//! Plain SQL migrations applied per schema.
//!
//! Migrations are the `*.sql` files of one directory, applied in file-name
//! order. Each schema keeps its own history table recording the id and
//! SHA-256 checksum of every applied file, so re-running is a no-op and an
//! edited file is reported instead of silently skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use schemata_core::{
    MigrationRunner, Schema, SchemaName, TenancyError, TenancyResult, context, is_valid_schema_name,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{PgError, PgResult};
use crate::pool::TenantPool;

/// Default history table name.
pub const DEFAULT_HISTORY_TABLE: &str = "_schemata_migrations";

const LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

/// The `[migrations]` section of `schemata.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MigrationsSection {
    /// Directory holding `*.sql` files.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// History table created in every schema.
    #[serde(default = "default_table")]
    pub table_name: String,
}

fn default_directory() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_table() -> String {
    DEFAULT_HISTORY_TABLE.to_string()
}

impl Default for MigrationsSection {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            table_name: default_table(),
        }
    }
}

/// One migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File stem, e.g. `0001_create_users`.
    pub id: String,
    /// File content.
    pub sql: String,
    /// Hex SHA-256 of the content.
    pub checksum: String,
}

impl MigrationFile {
    /// Create a migration from its id and SQL.
    pub fn new(id: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            id: id.into(),
            checksum: compute_checksum(&sql),
            sql,
        }
    }
}

/// Hex SHA-256 of `content`.
pub fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Read every `*.sql` file of `dir`, sorted by file name.
pub async fn load_migrations(dir: &Path) -> PgResult<Vec<MigrationFile>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| PgError::migration_file(path.display().to_string(), "file name is not UTF-8"))?
            .to_string();
        let sql = tokio::fs::read_to_string(&path).await?;
        if sql.trim().is_empty() {
            return Err(PgError::migration_file(id, "file is empty"));
        }
        files.push(MigrationFile::new(id, sql));
    }
    debug!(dir = %dir.display(), count = files.len(), "loaded migrations");
    Ok(files)
}

/// DDL creating the history table inside `schema`.
pub fn history_table_sql(schema: &SchemaName, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {}.\"{table}\" (
    id VARCHAR(255) PRIMARY KEY,
    checksum VARCHAR(64) NOT NULL,
    applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    duration_ms BIGINT NOT NULL DEFAULT 0
)",
        schema.quoted()
    )
}

/// [`MigrationRunner`] applying a fixed list of SQL files.
#[derive(Debug, Clone)]
pub struct PgMigrationRunner {
    pool: TenantPool,
    migrations: Arc<Vec<MigrationFile>>,
    table: String,
}

impl PgMigrationRunner {
    /// Create a runner for `migrations`, recording history in `table`.
    pub fn new(
        pool: TenantPool,
        migrations: Vec<MigrationFile>,
        table: impl Into<String>,
    ) -> TenancyResult<Self> {
        let table = table.into();
        if !is_valid_schema_name(&table) {
            return Err(TenancyError::config(format!("invalid history table name '{table}'")));
        }
        Ok(Self {
            pool,
            migrations: Arc::new(migrations),
            table,
        })
    }

    /// Load the directory named in `section`.
    pub async fn from_section(pool: TenantPool, section: &MigrationsSection) -> TenancyResult<Self> {
        let migrations = load_migrations(&section.directory).await?;
        Self::new(pool, migrations, section.table_name.clone())
    }

    /// Migrations this runner applies.
    pub fn migrations(&self) -> &[MigrationFile] {
        &self.migrations
    }

    /// Apply pending migrations to the active schema. Returns how many ran.
    async fn apply_active(&self, schema: &SchemaName) -> PgResult<usize> {
        let mut conn = self.pool.get().await?;
        let mut txn = conn.transaction().await?;
        txn.execute(LOCK_SQL, &[&schema.as_str()]).await?;
        txn.batch_execute(&history_table_sql(schema, &self.table)).await?;

        let history = format!("{}.\"{}\"", schema.quoted(), self.table);
        let applied: HashMap<String, String> = txn
            .query(&format!("SELECT id, checksum FROM {history}"), &[])
            .await?
            .iter()
            .map(|row| -> PgResult<(String, String)> {
                Ok((row.try_get("id")?, row.try_get("checksum")?))
            })
            .collect::<PgResult<_>>()?;

        let insert = format!("INSERT INTO {history} (id, checksum, duration_ms) VALUES ($1, $2, $3)");
        let mut ran = 0;
        for migration in self.migrations.iter() {
            match applied.get(&migration.id) {
                Some(checksum) if *checksum == migration.checksum => continue,
                Some(_) => {
                    return Err(PgError::migration_file(
                        &migration.id,
                        "content changed after it was applied",
                    ));
                }
                None => {}
            }
            let started = Instant::now();
            txn.batch_execute(&migration.sql).await?;
            let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
            txn.execute(&insert, &[&migration.id, &migration.checksum, &duration_ms])
                .await?;
            debug!(schema = %schema, migration = %migration.id, duration_ms, "applied migration");
            ran += 1;
        }
        txn.commit().await?;
        Ok(ran)
    }
}

#[async_trait]
impl MigrationRunner for PgMigrationRunner {
    async fn apply(&self, schema: &SchemaName) -> TenancyResult<()> {
        let target = Schema::new(schema.clone(), !schema.is_public());
        let ran = context::with_schema(target, self.apply_active(schema))
            .await
            .map_err(|e| TenancyError::migration(schema.as_str(), e))?;
        if ran > 0 {
            info!(schema = %schema, count = ran, "migrations applied");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        let checksum = compute_checksum("CREATE TABLE users (id BIGINT);");
        assert_eq!(checksum.len(), 64);
        assert_eq!(checksum, compute_checksum("CREATE TABLE users (id BIGINT);"));
        assert_ne!(checksum, compute_checksum("CREATE TABLE users (id INT);"));
    }

    #[test]
    fn test_history_table_sql() {
        let sql = history_table_sql(&SchemaName::new("acme").unwrap(), DEFAULT_HISTORY_TABLE);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"acme\".\"_schemata_migrations\""));
        assert!(sql.contains("checksum VARCHAR(64)"));
    }

    #[test]
    fn test_section_defaults() {
        let section: MigrationsSection = toml::from_str("").unwrap();
        assert_eq!(section, MigrationsSection::default());
        assert_eq!(section.directory, PathBuf::from("migrations"));
    }

    #[tokio::test]
    async fn test_load_migrations_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0002_posts.sql"), "CREATE TABLE posts (id BIGINT);").unwrap();
        std::fs::write(dir.path().join("0001_users.sql"), "CREATE TABLE users (id BIGINT);").unwrap();
        std::fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let files = load_migrations(dir.path()).await.unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["0001_users", "0002_posts"]);
        assert_eq!(files[0].checksum, compute_checksum("CREATE TABLE users (id BIGINT);"));
    }

    #[tokio::test]
    async fn test_load_migrations_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0001_blank.sql"), "  \n").unwrap();

        let err = load_migrations(dir.path()).await.unwrap_err();
        assert!(matches!(err, PgError::MigrationFile { .. }));
    }
}
