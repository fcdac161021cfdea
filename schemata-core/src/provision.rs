//! Dynamic tenant provisioning.
//!
//! Keeps tenant records and their namespaces consistent: a record whose
//! namespace could not be provisioned is deleted again, and a namespace is
//! dropped before its record is removed.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::{TenancyError, TenancyResult};
use crate::lifecycle::{DropOptions, SchemaManager};
use crate::schema::SchemaName;
use crate::store::{DomainRecord, NewDomain, TenantRecord, TenantStore};

/// Creates and deletes dynamic tenants.
#[derive(Clone)]
pub struct TenantProvisioner {
    store: Arc<dyn TenantStore>,
    manager: SchemaManager,
}

impl std::fmt::Debug for TenantProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantProvisioner")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl TenantProvisioner {
    /// Create a provisioner.
    pub fn new(store: Arc<dyn TenantStore>, manager: SchemaManager) -> Self {
        Self { store, manager }
    }

    /// The underlying lifecycle manager.
    pub fn manager(&self) -> &SchemaManager {
        &self.manager
    }

    /// Persist a tenant, bind its domains and provision its namespace.
    ///
    /// If any step after the insert fails, the record is deleted and the
    /// original error is returned.
    pub async fn create_tenant(
        &self,
        name: &str,
        domains: Vec<NewDomain>,
    ) -> TenancyResult<TenantRecord> {
        let name = SchemaName::new(name)?;
        if self.store.find_by_schema_name(name.as_str()).await?.is_some() {
            return Err(TenancyError::AlreadyExists(name.into_inner()));
        }

        let mut record = self.store.insert_tenant(&name).await?;
        match self.finish_create(&mut record, domains).await {
            Ok(()) => {
                info!(schema = %name, id = record.id, "provisioned tenant");
                Ok(record)
            }
            Err(err) => {
                error!(schema = %name, error = %err, "provisioning failed, removing tenant record");
                if let Err(cleanup) = self.store.delete_tenant(&name).await {
                    error!(schema = %name, error = %cleanup, "failed to remove tenant record");
                }
                Err(err)
            }
        }
    }

    async fn finish_create(
        &self,
        record: &mut TenantRecord,
        domains: Vec<NewDomain>,
    ) -> TenancyResult<()> {
        for domain in domains {
            let bound = self.store.add_domain(record.id, domain).await?;
            if bound.is_primary {
                for existing in &mut record.domains {
                    existing.is_primary = false;
                }
            }
            record.domains.push(bound);
        }
        if !self.manager.create_or_clone(record.schema_name.as_str()).await? {
            return Err(TenancyError::AlreadyExists(record.schema_name.to_string()));
        }
        Ok(())
    }

    /// Drop a tenant's namespace, then remove its record.
    pub async fn delete_tenant(&self, name: &str) -> TenancyResult<()> {
        let name = SchemaName::new(name)?;
        if self.store.find_by_schema_name(name.as_str()).await?.is_none() {
            return Err(TenancyError::not_found(format!("tenant '{name}'")));
        }

        self.manager
            .drop_schema(name.as_str(), DropOptions { check_if_exists: true })
            .await?;
        self.store.delete_tenant(&name).await?;
        info!(schema = %name, "deleted tenant");
        Ok(())
    }

    /// Bind another domain to an existing tenant.
    pub async fn add_domain(&self, name: &str, domain: NewDomain) -> TenancyResult<DomainRecord> {
        let record = self
            .store
            .find_by_schema_name(name)
            .await?
            .ok_or_else(|| TenancyError::not_found(format!("tenant '{name}'")))?;
        self.store.add_domain(record.id, domain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::SchemaManager;
    use crate::testing::{MemoryTenantStore, RecordingAdmin, RecordingMigrationRunner};

    struct Fixture {
        store: Arc<MemoryTenantStore>,
        admin: Arc<RecordingAdmin>,
        runner: Arc<RecordingMigrationRunner>,
        provisioner: TenantProvisioner,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryTenantStore::new());
        let admin = Arc::new(RecordingAdmin::new());
        let runner = Arc::new(RecordingMigrationRunner::new());
        let manager = SchemaManager::new(admin.clone(), runner.clone());
        let provisioner = TenantProvisioner::new(store.clone(), manager);
        Fixture {
            store,
            admin,
            runner,
            provisioner,
        }
    }

    #[tokio::test]
    async fn test_create_tenant() {
        let f = fixture();
        let record = f
            .provisioner
            .create_tenant("acme", vec![NewDomain::new("acme.com").primary()])
            .await
            .unwrap();

        assert_eq!(record.primary_domain().unwrap().domain, "acme.com");
        assert!(f.admin.has_schema("acme"));
        assert_eq!(f.runner.applied(), vec!["acme".to_string()]);
        assert!(f.store.find_by_schema_name("acme").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_provisioning_removes_record() {
        let f = fixture();
        f.admin.fail_create("acme");

        let err = f.provisioner.create_tenant("acme", Vec::new()).await.unwrap_err();
        assert!(matches!(err, TenancyError::Database { .. }));
        assert!(f.store.find_by_schema_name("acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_existing_namespace_without_record_is_rejected() {
        let f = fixture();
        f.admin.add_schema("acme");

        let err = f.provisioner.create_tenant("acme", Vec::new()).await.unwrap_err();
        assert!(matches!(err, TenancyError::AlreadyExists(_)));
        assert!(f.store.find_by_schema_name("acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_tenant_drops_namespace_first() {
        let f = fixture();
        f.provisioner.create_tenant("acme", Vec::new()).await.unwrap();

        f.provisioner.delete_tenant("acme").await.unwrap();
        assert!(!f.admin.has_schema("acme"));
        assert!(f.store.find_by_schema_name("acme").await.unwrap().is_none());

        let err = f.provisioner.delete_tenant("acme").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_add_primary_domain_demotes_previous() {
        let f = fixture();
        f.provisioner
            .create_tenant("acme", vec![NewDomain::new("acme.com").primary()])
            .await
            .unwrap();
        f.provisioner
            .add_domain("acme", NewDomain::new("acme.io").primary())
            .await
            .unwrap();

        let record = f.store.find_by_schema_name("acme").await.unwrap().unwrap();
        let primaries: Vec<&str> = record
            .domains
            .iter()
            .filter(|d| d.is_primary)
            .map(|d| d.domain.as_str())
            .collect();
        assert_eq!(primaries, vec!["acme.io"]);
    }
}
