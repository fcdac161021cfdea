//! Creating, cloning and dropping tenant namespaces.
//!
//! [`SchemaManager`] runs every operation with `public` active, whatever the
//! caller's context, and re-validates names before any DDL is issued. The
//! database work itself goes through [`SchemaAdmin`]; migrations go through
//! the external [`MigrationRunner`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::context::with_schema;
use crate::error::{TenancyError, TenancyResult};
use crate::schema::{Schema, SchemaName, validate_schema_name};

/// Options for [`SchemaAdmin::clone_schema`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneOptions {
    /// Copy table rows, not only structure.
    pub include_data: bool,
    /// Run the whole procedure, then roll back.
    pub dry_run: bool,
}

/// Options for [`SchemaManager::create`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Return `false` instead of failing when the namespace exists.
    pub check_if_exists: bool,
    /// Run migrations right after creation.
    pub sync_schema: bool,
}

/// Options for [`SchemaManager::drop_schema`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropOptions {
    /// Return `false` instead of failing when the namespace is missing.
    pub check_if_exists: bool,
}

/// Namespace DDL against the database.
#[async_trait]
pub trait SchemaAdmin: Send + Sync {
    /// Whether the namespace exists.
    async fn schema_exists(&self, name: &SchemaName) -> TenancyResult<bool>;

    /// `CREATE SCHEMA`. Fails with [`TenancyError::AlreadyExists`] if present.
    async fn create_schema(&self, name: &SchemaName) -> TenancyResult<()>;

    /// `DROP SCHEMA ... CASCADE`. Fails with [`TenancyError::DoesNotExist`] if
    /// absent.
    async fn drop_schema(&self, name: &SchemaName) -> TenancyResult<()>;

    /// Copy `source` into a new `dest` in one transaction.
    async fn clone_schema(
        &self,
        source: &SchemaName,
        dest: &SchemaName,
        options: CloneOptions,
    ) -> TenancyResult<()>;
}

/// The external migration engine.
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Apply pending migrations to `schema`. Must be idempotent.
    async fn apply(&self, schema: &SchemaName) -> TenancyResult<()>;
}

/// A namespace lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A namespace was created.
    Created(SchemaName),
    /// A namespace was cloned.
    Cloned {
        /// Copy source.
        source: SchemaName,
        /// New namespace.
        dest: SchemaName,
    },
    /// A namespace is about to be dropped.
    PreDrop(SchemaName),
    /// A namespace was dropped.
    Dropped(SchemaName),
    /// Migrations were applied to a namespace.
    Migrated(SchemaName),
}

type EventObserver = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Namespace lifecycle operations.
#[derive(Clone)]
pub struct SchemaManager {
    admin: Arc<dyn SchemaAdmin>,
    migrations: Arc<dyn MigrationRunner>,
    clone_reference: Option<SchemaName>,
    observers: Arc<RwLock<Vec<EventObserver>>>,
}

impl std::fmt::Debug for SchemaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaManager")
            .field("clone_reference", &self.clone_reference)
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl SchemaManager {
    /// Create a manager.
    pub fn new(admin: Arc<dyn SchemaAdmin>, migrations: Arc<dyn MigrationRunner>) -> Self {
        Self {
            admin,
            migrations,
            clone_reference: None,
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Namespace used by [`create_or_clone`](Self::create_or_clone).
    pub fn with_clone_reference(mut self, reference: Option<SchemaName>) -> Self {
        self.clone_reference = reference;
        self
    }

    /// The configured clone reference.
    pub fn clone_reference(&self) -> Option<&SchemaName> {
        self.clone_reference.as_ref()
    }

    /// Register a lifecycle observer. `PreDrop` is delivered before the drop,
    /// every other event after the change is durable.
    pub fn on_event<F>(&self, observer: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    fn emit(&self, event: LifecycleEvent) {
        debug!(?event, "lifecycle event");
        let observers: Vec<EventObserver> = self.observers.read().iter().cloned().collect();
        for observer in observers {
            observer(&event);
        }
    }

    /// Whether `name` exists.
    pub async fn exists(&self, name: &str) -> TenancyResult<bool> {
        let name = SchemaName::new(name)?;
        with_schema(Schema::public(), self.admin.schema_exists(&name)).await
    }

    /// Create `name`. Returns `false` when it already existed and
    /// `check_if_exists` was set.
    ///
    /// Migration errors after a successful create are returned as is; the
    /// namespace is left in place.
    pub async fn create(&self, name: &str, options: CreateOptions) -> TenancyResult<bool> {
        let name = SchemaName::new(name)?;
        with_schema(Schema::public(), async {
            if options.check_if_exists && self.admin.schema_exists(&name).await? {
                debug!(schema = %name, "schema already exists");
                return Ok(false);
            }
            match self.admin.create_schema(&name).await {
                Ok(()) => {}
                Err(TenancyError::AlreadyExists(_)) if options.check_if_exists => return Ok(false),
                Err(e) => return Err(e),
            }
            info!(schema = %name, "created schema");
            self.emit(LifecycleEvent::Created(name.clone()));

            if options.sync_schema {
                self.migrate(&name).await?;
            }
            Ok(true)
        })
        .await
    }

    /// Run migrations for `name`.
    pub async fn migrate(&self, name: &SchemaName) -> TenancyResult<()> {
        validate_schema_name(name.as_str())?;
        self.migrations.apply(name).await?;
        info!(schema = %name, "migrated schema");
        self.emit(LifecycleEvent::Migrated(name.clone()));
        Ok(())
    }

    /// Copy `source` into a new namespace `dest`.
    pub async fn clone_from(&self, source: &str, dest: &str, dry_run: bool) -> TenancyResult<()> {
        let source = SchemaName::new(source)?;
        let dest = SchemaName::new(dest)?;
        let options = CloneOptions {
            include_data: true,
            dry_run,
        };
        with_schema(Schema::public(), async {
            self.admin.clone_schema(&source, &dest, options).await?;
            if dry_run {
                info!(source = %source, dest = %dest, "clone dry run succeeded");
            } else {
                info!(source = %source, dest = %dest, "cloned schema");
                self.emit(LifecycleEvent::Cloned {
                    source: source.clone(),
                    dest: dest.clone(),
                });
            }
            Ok(())
        })
        .await
    }

    /// Drop `name` and everything in it. Returns `false` when it was missing
    /// and `check_if_exists` was set.
    pub async fn drop_schema(&self, name: &str, options: DropOptions) -> TenancyResult<bool> {
        let name = SchemaName::new(name)?;
        if name.is_public() {
            return Err(TenancyError::invalid_name(
                name.as_str(),
                "the public schema cannot be dropped",
            ));
        }
        with_schema(Schema::public(), async {
            if options.check_if_exists && !self.admin.schema_exists(&name).await? {
                return Ok(false);
            }
            self.emit(LifecycleEvent::PreDrop(name.clone()));
            match self.admin.drop_schema(&name).await {
                Ok(()) => {}
                Err(TenancyError::DoesNotExist(_)) if options.check_if_exists => return Ok(false),
                Err(e) => return Err(e),
            }
            warn!(schema = %name, "dropped schema");
            self.emit(LifecycleEvent::Dropped(name.clone()));
            Ok(true)
        })
        .await
    }

    /// Provision `name`: clone the reference when it exists, otherwise create
    /// and migrate. Returns `false` when `name` already existed.
    pub async fn create_or_clone(&self, name: &str) -> TenancyResult<bool> {
        let target = SchemaName::new(name)?;
        let reference = match &self.clone_reference {
            Some(reference) => {
                let (target_exists, reference_exists) = with_schema(Schema::public(), async {
                    let target_exists = self.admin.schema_exists(&target).await?;
                    let reference_exists = self.admin.schema_exists(reference).await?;
                    Ok::<_, TenancyError>((target_exists, reference_exists))
                })
                .await?;
                if target_exists {
                    return Ok(false);
                }
                reference_exists.then_some(reference)
            }
            None => None,
        };

        match reference {
            Some(reference) => {
                self.clone_from(reference.as_str(), target.as_str(), false).await?;
                Ok(true)
            }
            None => {
                self.create(
                    target.as_str(),
                    CreateOptions {
                        check_if_exists: true,
                        sync_schema: true,
                    },
                )
                .await
            }
        }
    }
}
