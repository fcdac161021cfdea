//! Storage of dynamic tenant records.
//!
//! The core never talks to the database directly. [`TenantStore`] is the seam
//! the PostgreSQL crate implements; an in-memory implementation lives in
//! [`crate::testing`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TenancyResult;
use crate::schema::{RoutingInfo, Schema, SchemaName};

/// A domain binding of a dynamic tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Storage id.
    pub id: i64,
    /// Owning tenant id.
    pub tenant_id: i64,
    /// Host name, lowercase.
    pub domain: String,
    /// Folder prefix; empty for bare-domain bindings.
    pub folder: String,
    /// Whether this is the tenant's primary binding.
    pub is_primary: bool,
    /// Redirect requests on this binding to the primary binding.
    pub redirect_to_primary: bool,
}

impl DomainRecord {
    /// `domain` or `domain/folder`.
    pub fn identifier(&self) -> String {
        if self.folder.is_empty() {
            self.domain.clone()
        } else {
            format!("{}/{}", self.domain, self.folder)
        }
    }

    /// Routing metadata for a request that matched this binding.
    pub fn routing(&self) -> RoutingInfo {
        RoutingInfo::domain_folder(self.domain.clone(), self.folder.clone())
    }
}

/// A dynamic tenant with its domain bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Storage id, ascending in creation order.
    pub id: i64,
    /// Namespace of the tenant.
    pub schema_name: SchemaName,
    /// Domain bindings.
    #[serde(default)]
    pub domains: Vec<DomainRecord>,
}

impl TenantRecord {
    /// The primary binding, if any.
    pub fn primary_domain(&self) -> Option<&DomainRecord> {
        self.domains.iter().find(|d| d.is_primary)
    }

    /// Whether `identifier` names this tenant by schema name, domain, or
    /// `domain/folder`.
    ///
    /// A bare domain matches every binding on that host whatever its folder,
    /// so it can match several folder-routed tenants.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        self.schema_name.as_str() == identifier
            || self.domains.iter().any(|d| {
                d.domain.eq_ignore_ascii_case(identifier)
                    || d.identifier().eq_ignore_ascii_case(identifier)
            })
    }

    /// The tenant as a [`Schema`], routed through its primary binding.
    pub fn to_schema(&self) -> Schema {
        let schema = Schema::new(self.schema_name.clone(), true);
        match self.primary_domain().or_else(|| self.domains.first()) {
            Some(domain) => schema.with_routing(domain.routing()),
            None => schema,
        }
    }
}

/// A domain binding to add to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDomain {
    /// Host name.
    pub domain: String,
    /// Folder prefix; empty for bare-domain bindings.
    #[serde(default)]
    pub folder: String,
    /// Make this the primary binding, demoting the current one.
    #[serde(default)]
    pub is_primary: bool,
    /// Redirect requests on this binding to the primary binding.
    #[serde(default)]
    pub redirect_to_primary: bool,
}

impl NewDomain {
    /// A bare-domain binding.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into().to_ascii_lowercase(),
            folder: String::new(),
            is_primary: false,
            redirect_to_primary: false,
        }
    }

    /// Scope the binding to a folder.
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    /// Mark the binding primary.
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    /// Redirect requests on this binding to the primary binding.
    pub fn redirecting(mut self) -> Self {
        self.redirect_to_primary = true;
        self
    }
}

/// Persistent storage of dynamic tenants.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Up to `limit` tenants with `id > after_id`, ordered by id.
    async fn fetch_batch(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> TenancyResult<Vec<TenantRecord>>;

    /// Tenant by schema name.
    async fn find_by_schema_name(&self, name: &str) -> TenancyResult<Option<TenantRecord>>;

    /// Every tenant matching `identifier` by schema name, domain, or
    /// `domain/folder`.
    async fn find_by_identifier(&self, identifier: &str) -> TenancyResult<Vec<TenantRecord>>;

    /// The tenant bound to exactly `(domain, folder)`.
    async fn find_domain(
        &self,
        domain: &str,
        folder: &str,
    ) -> TenancyResult<Option<(TenantRecord, DomainRecord)>>;

    /// Persist a tenant without domains.
    async fn insert_tenant(&self, schema_name: &SchemaName) -> TenancyResult<TenantRecord>;

    /// Remove a tenant and its domains. Returns whether a record was removed.
    async fn delete_tenant(&self, schema_name: &SchemaName) -> TenancyResult<bool>;

    /// Bind a domain to a tenant. A primary binding demotes the current
    /// primary in the same transaction.
    async fn add_domain(&self, tenant_id: i64, domain: NewDomain) -> TenancyResult<DomainRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TenantRecord {
        TenantRecord {
            id: 1,
            schema_name: SchemaName::new("acme").unwrap(),
            domains: vec![
                DomainRecord {
                    id: 1,
                    tenant_id: 1,
                    domain: "acme.com".into(),
                    folder: String::new(),
                    is_primary: false,
                    redirect_to_primary: true,
                },
                DomainRecord {
                    id: 2,
                    tenant_id: 1,
                    domain: "tenants.example.com".into(),
                    folder: "acme".into(),
                    is_primary: true,
                    redirect_to_primary: false,
                },
            ],
        }
    }

    #[test]
    fn test_matches_identifier() {
        let record = record();
        assert!(record.matches_identifier("acme"));
        assert!(record.matches_identifier("acme.com"));
        assert!(record.matches_identifier("ACME.com"));
        assert!(record.matches_identifier("tenants.example.com/acme"));
        assert!(record.matches_identifier("tenants.example.com"));
        assert!(!record.matches_identifier("tenants.example.com/globex"));
        assert!(!record.matches_identifier("globex"));
    }

    #[test]
    fn test_to_schema_uses_primary() {
        let schema = record().to_schema();
        assert!(schema.is_dynamic());
        assert_eq!(schema.display_identifier(), "tenants.example.com/acme");
    }

    #[test]
    fn test_new_domain_lowercases() {
        let domain = NewDomain::new("Acme.COM").with_folder("x").primary();
        assert_eq!(domain.domain, "acme.com");
        assert_eq!(domain.folder, "x");
        assert!(domain.is_primary);
    }
}
