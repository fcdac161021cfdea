//! In-memory implementations of the database seams, for tests.
//!
//! Enabled in this crate's own tests and, for downstream crates, through the
//! `testing` feature.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::context;
use crate::error::{TenancyError, TenancyResult};
use crate::lifecycle::{CloneOptions, MigrationRunner, SchemaAdmin};
use crate::schema::SchemaName;
use crate::search_path::SearchPathTarget;
use crate::store::{DomainRecord, NewDomain, TenantRecord, TenantStore};

#[derive(Debug, Default)]
struct StoreState {
    next_tenant: i64,
    next_domain: i64,
    tenants: BTreeMap<i64, TenantRecord>,
}

impl StoreState {
    fn bind(&mut self, tenant_id: i64, domain: NewDomain) -> TenancyResult<DomainRecord> {
        let taken = self.tenants.values().flat_map(|t| &t.domains).any(|d| {
            d.domain.eq_ignore_ascii_case(&domain.domain) && d.folder == domain.folder
        });
        if taken {
            return Err(TenancyError::AlreadyExists(format!(
                "domain '{}/{}'",
                domain.domain, domain.folder
            )));
        }

        self.next_domain += 1;
        let id = self.next_domain;
        let tenant = self
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| TenancyError::not_found(format!("tenant id {tenant_id}")))?;
        if domain.is_primary {
            for existing in &mut tenant.domains {
                existing.is_primary = false;
            }
        }
        let record = DomainRecord {
            id,
            tenant_id,
            domain: domain.domain,
            folder: domain.folder,
            is_primary: domain.is_primary,
            redirect_to_primary: domain.redirect_to_primary,
        };
        tenant.domains.push(record.clone());
        Ok(record)
    }
}

/// A [`TenantStore`] backed by a map, ids assigned in insertion order.
#[derive(Debug, Default)]
pub struct MemoryTenantStore {
    state: Mutex<StoreState>,
    batch_calls: AtomicUsize,
}

impl MemoryTenantStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tenant with domains.
    ///
    /// # Panics
    ///
    /// Panics on an invalid name or a duplicate binding.
    pub async fn seed(&self, name: &str, domains: Vec<NewDomain>) -> TenantRecord {
        let name = SchemaName::new(name).expect("valid schema name");
        let record = self.insert_tenant(&name).await.expect("tenant inserted");
        for domain in domains {
            self.add_domain(record.id, domain).await.expect("domain bound");
        }
        self.state.lock().tenants[&record.id].clone()
    }

    /// Number of [`TenantStore::fetch_batch`] calls so far.
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Number of stored tenants.
    pub fn len(&self) -> usize {
        self.state.lock().tenants.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn fetch_batch(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> TenancyResult<Vec<TenantRecord>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let start = after_id.map_or(i64::MIN, |id| id.saturating_add(1));
        Ok(state.tenants.range(start..).take(limit).map(|(_, t)| t.clone()).collect())
    }

    async fn find_by_schema_name(&self, name: &str) -> TenancyResult<Option<TenantRecord>> {
        let state = self.state.lock();
        Ok(state.tenants.values().find(|t| t.schema_name.as_str() == name).cloned())
    }

    async fn find_by_identifier(&self, identifier: &str) -> TenancyResult<Vec<TenantRecord>> {
        let state = self.state.lock();
        Ok(state
            .tenants
            .values()
            .filter(|t| t.matches_identifier(identifier))
            .cloned()
            .collect())
    }

    async fn find_domain(
        &self,
        domain: &str,
        folder: &str,
    ) -> TenancyResult<Option<(TenantRecord, DomainRecord)>> {
        let state = self.state.lock();
        Ok(state.tenants.values().find_map(|tenant| {
            tenant
                .domains
                .iter()
                .find(|d| d.domain.eq_ignore_ascii_case(domain) && d.folder == folder)
                .map(|d| (tenant.clone(), d.clone()))
        }))
    }

    async fn insert_tenant(&self, schema_name: &SchemaName) -> TenancyResult<TenantRecord> {
        let mut state = self.state.lock();
        if state.tenants.values().any(|t| &t.schema_name == schema_name) {
            return Err(TenancyError::AlreadyExists(schema_name.to_string()));
        }
        state.next_tenant += 1;
        let record = TenantRecord {
            id: state.next_tenant,
            schema_name: schema_name.clone(),
            domains: Vec::new(),
        };
        state.tenants.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_tenant(&self, schema_name: &SchemaName) -> TenancyResult<bool> {
        let mut state = self.state.lock();
        let id = state
            .tenants
            .values()
            .find(|t| &t.schema_name == schema_name)
            .map(|t| t.id);
        Ok(id.is_some_and(|id| state.tenants.remove(&id).is_some()))
    }

    async fn add_domain(&self, tenant_id: i64, domain: NewDomain) -> TenancyResult<DomainRecord> {
        self.state.lock().bind(tenant_id, domain)
    }
}

/// A call observed by [`RecordingAdmin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCall {
    /// `schema_exists`
    Exists(String),
    /// `create_schema`
    Create(String),
    /// `drop_schema`
    Drop(String),
    /// `clone_schema`
    Clone {
        /// Copy source.
        source: String,
        /// New namespace.
        dest: String,
        /// Whether the clone was rolled back.
        dry_run: bool,
    },
}

#[derive(Debug, Default)]
struct AdminState {
    schemas: BTreeSet<String>,
    calls: Vec<AdminCall>,
    active: Vec<String>,
    failing: HashSet<String>,
}

/// A [`SchemaAdmin`] over a set of namespace names that records every call
/// and the schema active while it ran.
#[derive(Debug, Default)]
pub struct RecordingAdmin {
    state: Mutex<AdminState>,
}

impl RecordingAdmin {
    /// An admin with no namespaces.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `name` exists.
    pub fn add_schema(&self, name: &str) {
        self.state.lock().schemas.insert(name.to_string());
    }

    /// Whether `name` exists.
    pub fn has_schema(&self, name: &str) -> bool {
        self.state.lock().schemas.contains(name)
    }

    /// Calls so far.
    pub fn calls(&self) -> Vec<AdminCall> {
        self.state.lock().calls.clone()
    }

    /// Active schema name at each call.
    pub fn active_during_calls(&self) -> Vec<String> {
        self.state.lock().active.clone()
    }

    /// Make `create_schema` fail for `name`.
    pub fn fail_create(&self, name: &str) {
        self.state.lock().failing.insert(name.to_string());
    }

    fn record(&self, call: AdminCall) -> parking_lot::MutexGuard<'_, AdminState> {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.active.push(context::current().name().to_string());
        state
    }
}

#[async_trait]
impl SchemaAdmin for RecordingAdmin {
    async fn schema_exists(&self, name: &SchemaName) -> TenancyResult<bool> {
        let state = self.record(AdminCall::Exists(name.to_string()));
        Ok(state.schemas.contains(name.as_str()))
    }

    async fn create_schema(&self, name: &SchemaName) -> TenancyResult<()> {
        let mut state = self.record(AdminCall::Create(name.to_string()));
        if state.failing.contains(name.as_str()) {
            return Err(TenancyError::database(format!("cannot create schema {name}")));
        }
        if !state.schemas.insert(name.to_string()) {
            return Err(TenancyError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    async fn drop_schema(&self, name: &SchemaName) -> TenancyResult<()> {
        let mut state = self.record(AdminCall::Drop(name.to_string()));
        if !state.schemas.remove(name.as_str()) {
            return Err(TenancyError::DoesNotExist(name.to_string()));
        }
        Ok(())
    }

    async fn clone_schema(
        &self,
        source: &SchemaName,
        dest: &SchemaName,
        options: CloneOptions,
    ) -> TenancyResult<()> {
        let mut state = self.record(AdminCall::Clone {
            source: source.to_string(),
            dest: dest.to_string(),
            dry_run: options.dry_run,
        });
        if !state.schemas.contains(source.as_str()) {
            return Err(TenancyError::DoesNotExist(source.to_string()));
        }
        if state.schemas.contains(dest.as_str()) {
            return Err(TenancyError::AlreadyExists(dest.to_string()));
        }
        if !options.dry_run {
            state.schemas.insert(dest.to_string());
        }
        Ok(())
    }
}

/// A [`MigrationRunner`] that records the namespaces it was applied to.
#[derive(Debug, Default)]
pub struct RecordingMigrationRunner {
    applied: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingMigrationRunner {
    /// A runner that succeeds everywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespaces migrated successfully, in order.
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    /// Make migrations fail for `name`.
    pub fn fail_for(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }
}

#[async_trait]
impl MigrationRunner for RecordingMigrationRunner {
    async fn apply(&self, schema: &SchemaName) -> TenancyResult<()> {
        if self.failing.lock().contains(schema.as_str()) {
            return Err(TenancyError::migration(
                schema.as_str(),
                format!("migration failed for {schema}"),
            ));
        }
        self.applied.lock().push(schema.to_string());
        Ok(())
    }
}

/// A [`SearchPathTarget`] that records applied paths.
#[derive(Debug, Default)]
pub struct RecordingTarget {
    applied: Vec<String>,
    fail_next: Option<TenancyError>,
}

impl RecordingTarget {
    /// A target that accepts every path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths applied successfully, in order.
    pub fn applied(&self) -> Vec<String> {
        self.applied.clone()
    }

    /// Fail the next apply with `error`.
    pub fn fail_next(&mut self, error: TenancyError) {
        self.fail_next = Some(error);
    }
}

#[async_trait]
impl SearchPathTarget for RecordingTarget {
    async fn apply_search_path(&mut self, search_path: &str) -> TenancyResult<()> {
        if let Some(error) = self.fail_next.take() {
            return Err(error);
        }
        self.applied.push(search_path.to_string());
        Ok(())
    }
}
