//! Enumeration of known tenants.
//!
//! [`TenantCatalog::iterate`] yields, in order:
//! 1. `public`;
//! 2. static tenants in declaration order;
//! 3. the clone reference;
//! 4. dynamic tenants in storage order, fetched in batches.
//!
//! Targeted identifiers (schema name, domain or `domain/folder`) are resolved
//! before anything is yielded. An identifier that matches nothing, or more
//! than one tenant, fails the whole call.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitflags::bitflags;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::debug;

use crate::config::TenancyConfig;
use crate::error::{TenancyError, TenancyResult};
use crate::routing::normalize_host;
use crate::schema::{PUBLIC_SCHEMA, RoutingInfo, Schema, SchemaName};
use crate::store::{TenantRecord, TenantStore};

bitflags! {
    /// Tenant classes a selection can include.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SchemaClass: u8 {
        /// Configuration-declared tenants, `public` included.
        const STATIC = 0b001;
        /// Database-backed tenants.
        const DYNAMIC = 0b010;
        /// The clone reference namespace.
        const CLONE_REFERENCE = 0b100;
    }
}

impl SchemaClass {
    /// Every class.
    pub const ALL: Self = Self::all();
}

impl Default for SchemaClass {
    fn default() -> Self {
        Self::empty()
    }
}

/// Wildcard selecting every class.
pub const WILDCARD_ALL: &str = ":all:";
/// Wildcard selecting static tenants and `public`.
pub const WILDCARD_STATIC: &str = ":static:";
/// Wildcard selecting dynamic tenants.
pub const WILDCARD_DYNAMIC: &str = ":dynamic:";
/// Wildcard selecting the clone reference.
pub const WILDCARD_CLONE_REFERENCE: &str = ":clone_reference:";
/// Wildcard selecting only `public`.
pub const WILDCARD_PUBLIC: &str = ":public:";

/// Which tenants an administrative command applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSelection {
    classes: SchemaClass,
    public: bool,
    identifiers: Vec<String>,
    excludes: Vec<String>,
}

impl SchemaSelection {
    /// Select whole classes. `STATIC` includes `public`.
    pub fn classes(classes: SchemaClass) -> Self {
        Self {
            classes,
            public: classes.contains(SchemaClass::STATIC),
            ..Self::default()
        }
    }

    /// Select every tenant.
    pub fn all() -> Self {
        Self::classes(SchemaClass::ALL)
    }

    /// Select specific tenants by identifier.
    pub fn identifiers<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifiers: identifiers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parse command-line style selectors.
    ///
    /// `:all:`, `:static:`, `:dynamic:`, `:clone_reference:` and `:public:`
    /// select classes; anything else is an identifier. Wildcards among the
    /// exclusions remove classes.
    pub fn parse<S: AsRef<str>>(includes: &[S], excludes: &[S]) -> TenancyResult<Self> {
        let mut selection = Self::default();
        for include in includes {
            let include = include.as_ref().trim();
            match wildcard(include)? {
                Some((classes, public)) => {
                    selection.classes |= classes;
                    selection.public |= public;
                }
                None => selection.identifiers.push(include.to_string()),
            }
        }
        for exclude in excludes {
            let exclude = exclude.as_ref().trim();
            match wildcard(exclude)? {
                Some((classes, public)) => {
                    selection.classes.remove(classes);
                    if public {
                        selection.public = false;
                    }
                }
                None => selection.excludes.push(exclude.to_string()),
            }
        }
        Ok(selection)
    }

    /// Exclude an identifier.
    pub fn with_exclude(mut self, identifier: impl Into<String>) -> Self {
        self.excludes.push(identifier.into());
        self
    }

    /// Add targeted identifiers.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifiers.push(identifier.into());
        self
    }

    /// Selected classes.
    pub fn selected_classes(&self) -> SchemaClass {
        self.classes
    }

    /// Targeted identifiers.
    pub fn targeted(&self) -> &[String] {
        &self.identifiers
    }

    /// Whether the selection names nothing at all.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && !self.public && self.identifiers.is_empty()
    }

    fn excludes_any(&self, mut identifiers: impl Iterator<Item = String>) -> bool {
        identifiers.any(|id| self.excludes.iter().any(|ex| ex.eq_ignore_ascii_case(&id)))
    }
}

fn wildcard(selector: &str) -> TenancyResult<Option<(SchemaClass, bool)>> {
    let parsed = match selector {
        WILDCARD_ALL => (SchemaClass::ALL, true),
        WILDCARD_STATIC => (SchemaClass::STATIC, true),
        WILDCARD_DYNAMIC => (SchemaClass::DYNAMIC, false),
        WILDCARD_CLONE_REFERENCE => (SchemaClass::CLONE_REFERENCE, false),
        WILDCARD_PUBLIC => (SchemaClass::empty(), true),
        s if s.len() > 1 && s.starts_with(':') && s.ends_with(':') => {
            return Err(TenancyError::config(format!("unknown schema wildcard '{s}'")));
        }
        _ => return Ok(None),
    };
    Ok(Some(parsed))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Match {
    Public,
    Static(SchemaName),
    CloneReference,
    Dynamic(TenantRecord),
}

impl Match {
    fn label(&self) -> String {
        match self {
            Self::Public => PUBLIC_SCHEMA.to_string(),
            Self::Static(name) => name.to_string(),
            Self::CloneReference => "clone reference".to_string(),
            Self::Dynamic(record) => record.schema_name.to_string(),
        }
    }
}

#[derive(Default)]
struct Targets {
    public: bool,
    statics: Vec<SchemaName>,
    clone_reference: bool,
    dynamic: BTreeMap<i64, TenantRecord>,
}

/// Read access to every known tenant.
#[derive(Clone)]
pub struct TenantCatalog {
    config: Arc<TenancyConfig>,
    store: Option<Arc<dyn TenantStore>>,
}

impl std::fmt::Debug for TenantCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCatalog")
            .field("static_tenants", &self.config.tenants.len())
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl TenantCatalog {
    /// Catalog over static tenants only.
    pub fn new(config: Arc<TenancyConfig>) -> Self {
        Self {
            config,
            store: None,
        }
    }

    /// Attach the dynamic tenant store.
    pub fn with_store(mut self, store: Arc<dyn TenantStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The configuration.
    pub fn config(&self) -> &Arc<TenancyConfig> {
        &self.config
    }

    /// The dynamic tenant store, if any.
    pub fn store(&self) -> Option<&Arc<dyn TenantStore>> {
        self.store.as_ref()
    }

    /// A one-shot stream over the selected tenants.
    pub async fn iterate(
        &self,
        selection: &SchemaSelection,
    ) -> TenancyResult<BoxStream<'static, TenancyResult<Schema>>> {
        let targets = self.resolve_targets(selection.targeted()).await?;
        let selection = Arc::new(selection.clone());
        let mut head = Vec::new();

        let public = SchemaName::public();
        if (selection.public || targets.public)
            && !selection.excludes_any(self.static_identifiers(&public))
        {
            head.push(self.static_schema(&public));
        }

        for name in self.config.tenants.keys().filter(|name| !name.is_public()) {
            let selected = selection.classes.contains(SchemaClass::STATIC)
                || targets.statics.contains(name);
            if selected && !selection.excludes_any(self.static_identifiers(name)) {
                head.push(self.static_schema(name));
            }
        }

        if let Some(reference) = self.config.clone_reference() {
            let selected = selection.classes.contains(SchemaClass::CLONE_REFERENCE)
                || targets.clone_reference;
            if selected && !selection.excludes_any(std::iter::once(reference.to_string())) {
                head.push(Schema::new(reference.clone(), false));
            }
        }

        let head = stream::iter(head.into_iter().map(Ok));

        let tail: BoxStream<'static, TenancyResult<TenantRecord>> =
            match (&self.store, selection.classes.contains(SchemaClass::DYNAMIC)) {
                (Some(store), true) => batched(Arc::clone(store), self.config.batch_size),
                _ => stream::iter(targets.dynamic.into_values().map(Ok)).boxed(),
            };
        let tail = tail
            .try_filter(move |record| {
                let excluded = selection.excludes.iter().any(|ex| record.matches_identifier(ex));
                future::ready(!excluded)
            })
            .map_ok(|record| record.to_schema());

        Ok(head.chain(tail).boxed())
    }

    /// Collect the selected tenants.
    pub async fn collect(&self, selection: &SchemaSelection) -> TenancyResult<Vec<Schema>> {
        self.iterate(selection).await?.try_collect().await
    }

    async fn resolve_targets(&self, identifiers: &[String]) -> TenancyResult<Targets> {
        let mut targets = Targets::default();
        for identifier in identifiers {
            let mut matches = Vec::new();

            if self
                .static_identifiers(&SchemaName::public())
                .any(|id| id.eq_ignore_ascii_case(identifier))
            {
                matches.push(Match::Public);
            }
            for name in self.config.tenants.keys().filter(|name| !name.is_public()) {
                if self.static_identifiers(name).any(|id| id.eq_ignore_ascii_case(identifier)) {
                    matches.push(Match::Static(name.clone()));
                }
            }
            if self.config.clone_reference().is_some_and(|r| r.as_str() == identifier) {
                matches.push(Match::CloneReference);
            }
            if let Some(store) = &self.store {
                for record in store.find_by_identifier(identifier).await? {
                    matches.push(Match::Dynamic(record));
                }
            }

            match matches.len() {
                0 => {
                    return Err(TenancyError::not_found(format!("identifier '{identifier}'")));
                }
                1 => {}
                _ => {
                    return Err(TenancyError::ambiguous(
                        identifier.clone(),
                        matches.iter().map(Match::label).collect(),
                    ));
                }
            }

            debug!(identifier, matched = %matches[0].label(), "resolved schema identifier");
            match matches.remove(0) {
                Match::Public => targets.public = true,
                Match::Static(name) => targets.statics.push(name),
                Match::CloneReference => targets.clone_reference = true,
                Match::Dynamic(record) => {
                    targets.dynamic.insert(record.id, record);
                }
            }
        }
        Ok(targets)
    }

    /// Schema name followed by configured domains.
    fn static_identifiers(&self, name: &SchemaName) -> impl Iterator<Item = String> + use<> {
        let domains = self
            .config
            .static_tenant(name.as_str())
            .map(|(_, tenant)| {
                tenant
                    .domains
                    .iter()
                    .map(|d| normalize_host(d))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        std::iter::once(name.to_string()).chain(domains)
    }

    fn static_schema(&self, name: &SchemaName) -> Schema {
        let schema = Schema::new(name.clone(), false);
        match self
            .config
            .static_tenant(name.as_str())
            .and_then(|(_, tenant)| tenant.primary_domain())
        {
            Some(domain) => schema.with_routing(RoutingInfo::domain(domain)),
            None => schema,
        }
    }
}

/// Keyset-paginated stream over every dynamic tenant.
fn batched(
    store: Arc<dyn TenantStore>,
    batch_size: usize,
) -> BoxStream<'static, TenancyResult<TenantRecord>> {
    let batch_size = batch_size.max(1);
    // `None` once the last page has been read.
    let start: Option<Option<i64>> = Some(None);
    stream::try_unfold(start, move |cursor| {
        let store = Arc::clone(&store);
        async move {
            let Some(after) = cursor else {
                return Ok::<_, TenancyError>(None);
            };
            let batch = store.fetch_batch(after, batch_size).await?;
            if batch.is_empty() {
                return Ok(None);
            }
            let next = match batch.last() {
                Some(last) if batch.len() >= batch_size => Some(Some(last.id)),
                _ => None,
            };
            debug!(count = batch.len(), after = ?after, "fetched tenant batch");
            Ok(Some((stream::iter(batch.into_iter().map(Ok)), next)))
        }
    })
    .try_flatten()
    .boxed()
}
