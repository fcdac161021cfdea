//! Pooled connections that follow the active schema.
//!
//! A [`TenantConnection`] binds the search path lazily: nothing is sent when
//! the connection is checked out or when the active schema changes, only
//! right before the next statement. The binding state lives for one checkout
//! and is cleared on rollback and close, so a fresh checkout always applies
//! the path once before its first statement.

use async_trait::async_trait;
use deadpool_postgres::Object;
use schemata_core::{
    BindingState, SearchPathBinder, SearchPathTarget, TenancyError, TenancyResult, context,
    set_search_path_sql,
};
use tokio_postgres::types::ToSql;
use tokio_postgres::{GenericClient, Row};
use tracing::debug;

use crate::error::{PgError, PgResult};

/// Statement parameters.
pub type Params<'p> = &'p [&'p (dyn ToSql + Sync)];

/// Applies search paths through any tokio-postgres client or transaction.
struct ClientTarget<'c, C>(&'c C);

#[async_trait]
impl<C> SearchPathTarget for ClientTarget<'_, C>
where
    C: GenericClient + Sync,
{
    async fn apply_search_path(&mut self, search_path: &str) -> TenancyResult<()> {
        self.0
            .batch_execute(&set_search_path_sql(search_path))
            .await
            .map_err(|e| TenancyError::from(PgError::from(e)))
    }
}

/// A pooled connection bound to whatever schema is active when it runs a
/// statement.
pub struct TenantConnection {
    client: Object,
    binder: SearchPathBinder,
    state: BindingState,
}

impl std::fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnection")
            .field("search_path", &self.state.last_applied())
            .finish_non_exhaustive()
    }
}

impl TenantConnection {
    pub(crate) fn new(client: Object, binder: SearchPathBinder) -> Self {
        Self {
            client,
            binder,
            state: BindingState::new(),
        }
    }

    /// Apply the active schema's search path if it changed since the last
    /// statement. Returns whether a statement was issued.
    pub async fn bind(&mut self) -> TenancyResult<bool> {
        let mut target = ClientTarget(&**self.client);
        self.binder.bind_current(&mut self.state, &mut target).await
    }

    /// The search path last applied on this checkout.
    pub fn search_path(&self) -> Option<&str> {
        self.state.last_applied()
    }

    /// Execute a query and return all rows.
    pub async fn query(&mut self, sql: &str, params: Params<'_>) -> PgResult<Vec<Row>> {
        self.bind().await?;
        debug!(sql = %sql, schema = %context::current(), "executing query");
        Ok(self.client.query(sql, params).await?)
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(&mut self, sql: &str, params: Params<'_>) -> PgResult<Row> {
        self.bind().await?;
        Ok(self.client.query_one(sql, params).await?)
    }

    /// Execute a query and return zero or one row.
    pub async fn query_opt(&mut self, sql: &str, params: Params<'_>) -> PgResult<Option<Row>> {
        self.bind().await?;
        Ok(self.client.query_opt(sql, params).await?)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: Params<'_>) -> PgResult<u64> {
        self.bind().await?;
        debug!(sql = %sql, schema = %context::current(), "executing statement");
        Ok(self.client.execute(sql, params).await?)
    }

    /// Execute a batch of statements in a single round-trip.
    pub async fn batch_execute(&mut self, sql: &str) -> PgResult<()> {
        self.bind().await?;
        Ok(self.client.batch_execute(sql).await?)
    }

    /// Begin a transaction.
    pub async fn transaction(&mut self) -> PgResult<TenantTransaction<'_>> {
        self.bind().await?;
        debug!("beginning transaction");
        let txn = self.client.transaction().await?;
        Ok(TenantTransaction {
            txn: Some(txn),
            binder: &self.binder,
            state: &mut self.state,
        })
    }

    /// Close the physical connection instead of returning it to the pool.
    pub fn close(mut self) {
        self.state.on_close();
        drop(Object::take(self.client));
    }
}

/// A transaction on a [`TenantConnection`].
///
/// Dropping it without [`commit`](Self::commit) rolls back and clears the
/// connection's binding state.
pub struct TenantTransaction<'a> {
    txn: Option<deadpool_postgres::Transaction<'a>>,
    binder: &'a SearchPathBinder,
    state: &'a mut BindingState,
}

impl TenantTransaction<'_> {
    fn txn(&self) -> PgResult<&deadpool_postgres::Transaction<'_>> {
        self.txn
            .as_ref()
            .ok_or_else(|| TenancyError::internal("transaction already finished").into())
    }

    async fn bind(&mut self) -> PgResult<()> {
        let Some(txn) = self.txn.as_ref() else {
            return Err(TenancyError::internal("transaction already finished").into());
        };
        let mut target = ClientTarget(&**txn);
        self.binder.bind_current(self.state, &mut target).await?;
        Ok(())
    }

    /// Execute a query and return all rows.
    pub async fn query(&mut self, sql: &str, params: Params<'_>) -> PgResult<Vec<Row>> {
        self.bind().await?;
        Ok(self.txn()?.query(sql, params).await?)
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(&mut self, sql: &str, params: Params<'_>) -> PgResult<Row> {
        self.bind().await?;
        Ok(self.txn()?.query_one(sql, params).await?)
    }

    /// Execute a query and return zero or one row.
    pub async fn query_opt(&mut self, sql: &str, params: Params<'_>) -> PgResult<Option<Row>> {
        self.bind().await?;
        Ok(self.txn()?.query_opt(sql, params).await?)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: Params<'_>) -> PgResult<u64> {
        self.bind().await?;
        Ok(self.txn()?.execute(sql, params).await?)
    }

    /// Execute a batch of statements.
    pub async fn batch_execute(&mut self, sql: &str) -> PgResult<()> {
        self.bind().await?;
        Ok(self.txn()?.batch_execute(sql).await?)
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> PgResult<()> {
        if let Some(txn) = self.txn.take() {
            debug!("committing transaction");
            if let Err(e) = txn.commit().await {
                self.state.on_rollback();
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Roll back the transaction.
    pub async fn rollback(mut self) -> PgResult<()> {
        self.state.on_rollback();
        if let Some(txn) = self.txn.take() {
            debug!("rolling back transaction");
            txn.rollback().await?;
        }
        Ok(())
    }
}

impl Drop for TenantTransaction<'_> {
    fn drop(&mut self) {
        if self.txn.is_some() {
            self.state.on_rollback();
        }
    }
}
