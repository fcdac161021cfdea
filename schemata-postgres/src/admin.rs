//! Namespace DDL on PostgreSQL.

use async_trait::async_trait;
use schemata_core::{CloneOptions, SchemaAdmin, SchemaName, TenancyError, TenancyResult};
use tokio_postgres::error::SqlState;
use tracing::{info, warn};

use crate::error::{PgError, PgResult};
use crate::pool::TenantPool;

/// Installs `public.clone_schema(source, dest, include_records)`.
pub const CLONE_SCHEMA_SQL: &str = include_str!("../sql/clone_schema.sql");

const SCHEMA_EXISTS_SQL: &str = "SELECT EXISTS(SELECT 1 FROM pg_namespace WHERE nspname = $1)";
const CLONE_CALL_SQL: &str = "SELECT public.clone_schema($1, $2, $3)";

/// `CREATE SCHEMA` for a validated name.
pub fn create_schema_sql(name: &SchemaName) -> String {
    format!("CREATE SCHEMA {}", name.quoted())
}

/// `DROP SCHEMA ... CASCADE` for a validated name.
pub fn drop_schema_sql(name: &SchemaName) -> String {
    format!("DROP SCHEMA {} CASCADE", name.quoted())
}

/// [`SchemaAdmin`] over a [`TenantPool`].
#[derive(Debug, Clone)]
pub struct PgSchemaAdmin {
    pool: TenantPool,
}

impl PgSchemaAdmin {
    /// Create an admin using connections from `pool`.
    pub fn new(pool: TenantPool) -> Self {
        Self { pool }
    }

    /// (Re)install the clone procedure.
    pub async fn install_clone_function(&self) -> TenancyResult<()> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(CLONE_SCHEMA_SQL).await?;
        info!("installed clone_schema procedure");
        Ok(())
    }

    async fn run_clone(
        &self,
        source: &SchemaName,
        dest: &SchemaName,
        options: CloneOptions,
    ) -> PgResult<()> {
        let mut conn = self.pool.get().await?;
        let mut txn = conn.transaction().await?;
        txn.execute(
            CLONE_CALL_SQL,
            &[&source.as_str(), &dest.as_str(), &options.include_data],
        )
        .await?;
        if options.dry_run {
            txn.rollback().await
        } else {
            txn.commit().await
        }
    }
}

fn clone_error(err: PgError, source: &SchemaName, dest: &SchemaName) -> TenancyError {
    match err.sqlstate() {
        Some(code) if *code == SqlState::INVALID_SCHEMA_NAME => {
            TenancyError::DoesNotExist(source.to_string())
        }
        Some(code) if *code == SqlState::DUPLICATE_SCHEMA => {
            TenancyError::AlreadyExists(dest.to_string())
        }
        _ => err.into(),
    }
}

#[async_trait]
impl SchemaAdmin for PgSchemaAdmin {
    async fn schema_exists(&self, name: &SchemaName) -> TenancyResult<bool> {
        let mut conn = self.pool.get().await?;
        let row = conn.query_one(SCHEMA_EXISTS_SQL, &[&name.as_str()]).await?;
        Ok(row.try_get::<_, bool>(0).map_err(PgError::from)?)
    }

    async fn create_schema(&self, name: &SchemaName) -> TenancyResult<()> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(&create_schema_sql(name))
            .await
            .map_err(|e| e.for_schema(name.as_str()))
    }

    async fn drop_schema(&self, name: &SchemaName) -> TenancyResult<()> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(&drop_schema_sql(name))
            .await
            .map_err(|e| e.for_schema(name.as_str()))
    }

    async fn clone_schema(
        &self,
        source: &SchemaName,
        dest: &SchemaName,
        options: CloneOptions,
    ) -> TenancyResult<()> {
        match self.run_clone(source, dest, options).await {
            Err(err) if err.is_undefined_function() => {
                warn!("clone_schema procedure missing, installing it");
                self.install_clone_function().await?;
                self.run_clone(source, dest, options)
                    .await
                    .map_err(|e| clone_error(e, source, dest))
            }
            result => result.map_err(|e| clone_error(e, source, dest)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> SchemaName {
        SchemaName::new(s).unwrap()
    }

    #[test]
    fn test_ddl_quotes_identifiers() {
        assert_eq!(create_schema_sql(&name("acme")), "CREATE SCHEMA \"acme\"");
        assert_eq!(drop_schema_sql(&name("Acme_2")), "DROP SCHEMA \"Acme_2\" CASCADE");
    }

    #[test]
    fn test_clone_procedure_shape() {
        assert!(CLONE_SCHEMA_SQL.contains("CREATE OR REPLACE FUNCTION public.clone_schema("));
        assert!(CLONE_SCHEMA_SQL.contains("include_records boolean"));
        assert!(CLONE_SCHEMA_SQL.contains("USING ERRCODE = 'duplicate_schema'"));
        assert!(CLONE_SCHEMA_SQL.contains("USING ERRCODE = 'invalid_schema_name'"));
        assert_eq!(CLONE_CALL_SQL.matches('$').count(), 3);
    }

    #[test]
    fn test_clone_error_passthrough() {
        let err = clone_error(PgError::config("boom"), &name("sample"), &name("acme"));
        assert!(matches!(err, TenancyError::Config(_)));
    }
}
