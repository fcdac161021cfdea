//! Tenant and domain records in PostgreSQL.
//!
//! Both tables live in `public`. Statements qualify them explicitly, so they
//! work whatever schema the connection is bound to.

use std::collections::HashMap;

use async_trait::async_trait;
use schemata_core::{
    DomainRecord, DynamicTenantConfig, NewDomain, SchemaName, TenancyError, TenancyResult,
    TenantRecord, TenantStore, is_valid_schema_name,
};
use tokio_postgres::Row;
use tracing::{debug, info};

use crate::error::{PgError, PgResult};
use crate::pool::TenantPool;

const DOMAIN_COLUMNS: &str = "id, tenant_id, domain, folder, is_primary, redirect_to_primary";

/// SQL statements for one pair of tenant/domain tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSql {
    tenants: String,
    domains: String,
}

impl StoreSql {
    /// Statements for `public.<tenants_table>` and `public.<domains_table>`.
    pub fn new(config: &DynamicTenantConfig) -> TenancyResult<Self> {
        for table in [&config.tenants_table, &config.domains_table] {
            if !is_valid_schema_name(table) {
                return Err(TenancyError::config(format!("invalid table name '{table}'")));
            }
        }
        Ok(Self {
            tenants: format!("public.\"{}\"", config.tenants_table),
            domains: format!("public.\"{}\"", config.domains_table),
        })
    }

    /// DDL creating both tables and their indexes.
    pub fn install(&self) -> String {
        let Self { tenants, domains } = self;
        format!(
            "CREATE TABLE IF NOT EXISTS {tenants} (
    id BIGSERIAL PRIMARY KEY,
    schema_name VARCHAR(63) NOT NULL UNIQUE,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS {domains} (
    id BIGSERIAL PRIMARY KEY,
    tenant_id BIGINT NOT NULL REFERENCES {tenants} (id) ON DELETE CASCADE,
    domain VARCHAR(253) NOT NULL,
    folder VARCHAR(100) NOT NULL DEFAULT '',
    is_primary BOOLEAN NOT NULL DEFAULT FALSE,
    redirect_to_primary BOOLEAN NOT NULL DEFAULT FALSE,
    UNIQUE (domain, folder)
);
CREATE UNIQUE INDEX IF NOT EXISTS {primary_index} ON {domains} (tenant_id) WHERE is_primary;
",
            primary_index = self.index_name("primary"),
        )
    }

    fn index_name(&self, suffix: &str) -> String {
        let table = self.domains.trim_start_matches("public.").trim_matches('"');
        format!("\"{table}_{suffix}_idx\"")
    }

    fn batch(&self) -> String {
        format!(
            "SELECT id, schema_name FROM {} WHERE id > $1 ORDER BY id LIMIT $2",
            self.tenants
        )
    }

    fn by_schema_name(&self) -> String {
        format!("SELECT id, schema_name FROM {} WHERE schema_name = $1", self.tenants)
    }

    fn by_identifier(&self) -> String {
        format!(
            "SELECT DISTINCT t.id, t.schema_name FROM {} t \
             LEFT JOIN {} d ON d.tenant_id = t.id \
             WHERE t.schema_name = $1 \
                OR lower(d.domain) = lower($1) \
                OR (d.folder <> '' AND lower(d.domain || '/' || d.folder) = lower($1)) \
             ORDER BY t.id",
            self.tenants, self.domains
        )
    }

    fn by_id(&self) -> String {
        format!("SELECT id, schema_name FROM {} WHERE id = $1", self.tenants)
    }

    fn domains_of(&self) -> String {
        format!(
            "SELECT {DOMAIN_COLUMNS} FROM {} WHERE tenant_id = ANY($1) ORDER BY id",
            self.domains
        )
    }

    fn find_domain(&self) -> String {
        format!(
            "SELECT {DOMAIN_COLUMNS} FROM {} WHERE lower(domain) = lower($1) AND folder = $2",
            self.domains
        )
    }

    fn insert_tenant(&self) -> String {
        format!("INSERT INTO {} (schema_name) VALUES ($1) RETURNING id", self.tenants)
    }

    fn delete_tenant(&self) -> String {
        format!("DELETE FROM {} WHERE schema_name = $1", self.tenants)
    }

    fn demote_primary(&self) -> String {
        format!(
            "UPDATE {} SET is_primary = FALSE WHERE tenant_id = $1 AND is_primary",
            self.domains
        )
    }

    fn insert_domain(&self) -> String {
        format!(
            "INSERT INTO {} (tenant_id, domain, folder, is_primary, redirect_to_primary) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {DOMAIN_COLUMNS}",
            self.domains
        )
    }
}

fn domain_from_row(row: &Row) -> PgResult<DomainRecord> {
    Ok(DomainRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        domain: row.try_get("domain")?,
        folder: row.try_get("folder")?,
        is_primary: row.try_get("is_primary")?,
        redirect_to_primary: row.try_get("redirect_to_primary")?,
    })
}

fn tenant_from_row(row: &Row) -> PgResult<TenantRecord> {
    let name: String = row.try_get("schema_name")?;
    Ok(TenantRecord {
        id: row.try_get("id")?,
        schema_name: SchemaName::new(name)?,
        domains: Vec::new(),
    })
}

/// [`TenantStore`] over two PostgreSQL tables.
#[derive(Debug, Clone)]
pub struct PgTenantStore {
    pool: TenantPool,
    sql: StoreSql,
}

impl PgTenantStore {
    /// Create a store for the tables named in `config`.
    pub fn new(pool: TenantPool, config: &DynamicTenantConfig) -> TenancyResult<Self> {
        Ok(Self {
            pool,
            sql: StoreSql::new(config)?,
        })
    }

    /// Statements used by this store.
    pub fn sql(&self) -> &StoreSql {
        &self.sql
    }

    /// Create the tables if missing.
    pub async fn install(&self) -> TenancyResult<()> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(&self.sql.install()).await?;
        info!("tenant tables installed");
        Ok(())
    }

    async fn tenants(&self, sql: &str, key: &str) -> PgResult<Vec<TenantRecord>> {
        let mut conn = self.pool.get().await?;
        let rows = conn.query(sql, &[&key]).await?;
        let tenants = rows.iter().map(tenant_from_row).collect::<PgResult<Vec<_>>>()?;
        self.with_domains(tenants).await
    }

    async fn with_domains(&self, mut tenants: Vec<TenantRecord>) -> PgResult<Vec<TenantRecord>> {
        if tenants.is_empty() {
            return Ok(tenants);
        }
        let ids: Vec<i64> = tenants.iter().map(|t| t.id).collect();
        let mut conn = self.pool.get().await?;
        let rows = conn.query(&self.sql.domains_of(), &[&ids]).await?;

        let mut by_tenant: HashMap<i64, Vec<DomainRecord>> = HashMap::new();
        for row in &rows {
            let domain = domain_from_row(row)?;
            by_tenant.entry(domain.tenant_id).or_default().push(domain);
        }
        for tenant in &mut tenants {
            tenant.domains = by_tenant.remove(&tenant.id).unwrap_or_default();
        }
        Ok(tenants)
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn fetch_batch(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> TenancyResult<Vec<TenantRecord>> {
        let after = after_id.unwrap_or(0);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        debug!(after, limit, "fetching tenant batch");

        let mut conn = self.pool.get().await?;
        let rows = conn.query(&self.sql.batch(), &[&after, &limit]).await?;
        let tenants = rows.iter().map(tenant_from_row).collect::<PgResult<Vec<_>>>()?;
        Ok(self.with_domains(tenants).await?)
    }

    async fn find_by_schema_name(&self, name: &str) -> TenancyResult<Option<TenantRecord>> {
        Ok(self.tenants(&self.sql.by_schema_name(), name).await?.into_iter().next())
    }

    async fn find_by_identifier(&self, identifier: &str) -> TenancyResult<Vec<TenantRecord>> {
        Ok(self.tenants(&self.sql.by_identifier(), identifier).await?)
    }

    async fn find_domain(
        &self,
        domain: &str,
        folder: &str,
    ) -> TenancyResult<Option<(TenantRecord, DomainRecord)>> {
        let mut conn = self.pool.get().await?;
        let Some(row) = conn.query_opt(&self.sql.find_domain(), &[&domain, &folder]).await? else {
            return Ok(None);
        };
        let binding = domain_from_row(&row)?;
        let row = conn.query_one(&self.sql.by_id(), &[&binding.tenant_id]).await?;
        drop(conn);

        let tenant = tenant_from_row(&row)?;
        let tenant = self.with_domains(vec![tenant]).await?.into_iter().next();
        Ok(tenant.map(|tenant| (tenant, binding)))
    }

    async fn insert_tenant(&self, schema_name: &SchemaName) -> TenancyResult<TenantRecord> {
        let mut conn = self.pool.get().await?;
        let row = conn
            .query_one(&self.sql.insert_tenant(), &[&schema_name.as_str()])
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    TenancyError::AlreadyExists(schema_name.to_string())
                } else {
                    e.into()
                }
            })?;
        Ok(TenantRecord {
            id: row.try_get("id").map_err(PgError::from)?,
            schema_name: schema_name.clone(),
            domains: Vec::new(),
        })
    }

    async fn delete_tenant(&self, schema_name: &SchemaName) -> TenancyResult<bool> {
        let mut conn = self.pool.get().await?;
        let deleted = conn
            .execute(&self.sql.delete_tenant(), &[&schema_name.as_str()])
            .await?;
        Ok(deleted > 0)
    }

    async fn add_domain(&self, tenant_id: i64, domain: NewDomain) -> TenancyResult<DomainRecord> {
        let mut conn = self.pool.get().await?;
        let mut txn = conn.transaction().await?;
        if domain.is_primary {
            txn.execute(&self.sql.demote_primary(), &[&tenant_id]).await?;
        }
        let row = txn
            .query_one(
                &self.sql.insert_domain(),
                &[
                    &tenant_id,
                    &domain.domain,
                    &domain.folder,
                    &domain.is_primary,
                    &domain.redirect_to_primary,
                ],
            )
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    TenancyError::AlreadyExists(format!("{}/{}", domain.domain, domain.folder))
                } else {
                    e.into()
                }
            })?;
        let record = domain_from_row(&row)?;
        txn.commit().await?;
        Ok(record)
    }
}
