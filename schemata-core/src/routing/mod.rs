//! Request routing: which tenant serves a unit of work.
//!
//! Resolvers are a closed set composed in an explicit, ordered
//! [`ResolverChain`]. Every resolver in the chain runs; the last one that
//! matches wins, so a deployment can combine a domain default with session or
//! header overrides. A redirect ends the chain immediately.
//!
//! ```rust,ignore
//! let chain = ResolverChain::new(config)
//!     .with_store(store)
//!     .with_resolver(Resolver::Domain(DomainResolver::new()))
//!     .with_resolver(Resolver::Header);
//!
//! match chain.resolve(&RequestInfo::new("acme.com", "/")).await? {
//!     Resolution::Activate(schema) => with_schema(schema, handler).await,
//!     Resolution::Redirect { location } => redirect(location),
//! }
//! ```

mod domain;
mod prefix;
mod request;
mod token;

use std::sync::Arc;

use tracing::debug;

pub use domain::DomainResolver;
pub use prefix::{PrefixCache, PrefixedRoutes, TenantUrls};
pub use request::{RequestInfo, normalize_host};
pub use token::TokenSource;

use crate::config::TenancyConfig;
use crate::error::{TenancyError, TenancyResult};
use crate::schema::Schema;
use crate::store::TenantStore;

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Run the unit of work with this schema active.
    Activate(Schema),
    /// Answer with a permanent redirect instead of activating a tenant.
    Redirect {
        /// Absolute target URL.
        location: String,
    },
}

/// A routing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolver {
    /// Host and folder.
    Domain(DomainResolver),
    /// Configured session key.
    Session,
    /// Configured request header.
    Header,
}

impl Resolver {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Domain(_) => "domain",
            Self::Session => "session",
            Self::Header => "header",
        }
    }

    /// Run this resolver alone.
    pub async fn resolve(
        &self,
        request: &RequestInfo,
        config: &TenancyConfig,
        store: Option<&dyn TenantStore>,
    ) -> TenancyResult<Option<Resolution>> {
        match self {
            Self::Domain(domain) => domain.resolve(request, config, store).await,
            Self::Session => TokenSource::Session.resolve(request, config, store).await,
            Self::Header => TokenSource::Header.resolve(request, config, store).await,
        }
    }
}

/// Ordered list of resolvers sharing a configuration and a store.
#[derive(Clone)]
pub struct ResolverChain {
    resolvers: Vec<Resolver>,
    config: Arc<TenancyConfig>,
    store: Option<Arc<dyn TenantStore>>,
}

impl std::fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverChain")
            .field("resolvers", &self.resolvers)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl ResolverChain {
    /// Empty chain over `config`.
    pub fn new(config: Arc<TenancyConfig>) -> Self {
        Self {
            resolvers: Vec::new(),
            config,
            store: None,
        }
    }

    /// Attach the dynamic tenant store.
    pub fn with_store(mut self, store: Arc<dyn TenantStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Append a resolver; later resolvers override earlier ones.
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// The resolvers in evaluation order.
    pub fn resolvers(&self) -> &[Resolver] {
        &self.resolvers
    }

    /// The shared configuration.
    pub fn config(&self) -> &Arc<TenancyConfig> {
        &self.config
    }

    /// Resolve `request`, failing with [`TenancyError::NotFound`] when no
    /// resolver matched.
    pub async fn resolve(&self, request: &RequestInfo) -> TenancyResult<Resolution> {
        let store = self.store.as_deref();
        let mut resolved: Option<Schema> = None;

        for resolver in &self.resolvers {
            match resolver.resolve(request, &self.config, store).await? {
                Some(Resolution::Redirect { location }) => {
                    return Ok(Resolution::Redirect { location });
                }
                Some(Resolution::Activate(schema)) => {
                    debug!(resolver = resolver.name(), schema = %schema, "resolver matched");
                    resolved = Some(schema);
                }
                None => {}
            }
        }

        resolved.map(Resolution::Activate).ok_or_else(|| {
            TenancyError::not_found(format!(
                "host '{}' path '{}'",
                request.host(),
                request.path()
            ))
        })
    }
}
