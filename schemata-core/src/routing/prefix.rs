//! Folder prefixes for tenant-relative URLs.
//!
//! Folder-routed tenants are served below `/<folder>`. The router strips that
//! prefix before dispatching and handlers add it back when building links.
//! [`PrefixCache`] keeps one [`PrefixedRoutes`] per `(base urlconf, prefix)`
//! pair and is owned by whoever routes requests; entries are dropped through
//! [`PrefixCache::invalidate`] or [`PrefixCache::clear`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::TenancyConfig;
use crate::schema::Schema;

type PrefixKey = (Option<String>, String);

/// Routes of a base URL configuration mounted below a folder prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixedRoutes {
    base: Option<String>,
    prefix: String,
}

impl PrefixedRoutes {
    /// The base URL configuration these routes derive from.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// The folder prefix, without slashes.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Remove the prefix from `path`. Returns `None` if `path` is not below it.
    pub fn strip(&self, path: &str) -> Option<String> {
        let rest = path.strip_prefix('/')?.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            Some("/".to_string())
        } else if rest.starts_with('/') {
            Some(rest.to_string())
        } else {
            None
        }
    }

    /// Add the prefix to an absolute path.
    pub fn url_for(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            format!("/{}/", self.prefix)
        } else {
            format!("/{}/{}", self.prefix, path)
        }
    }
}

/// Cache of [`PrefixedRoutes`] keyed by base configuration and prefix.
#[derive(Debug, Default)]
pub struct PrefixCache {
    entries: RwLock<HashMap<PrefixKey, Arc<PrefixedRoutes>>>,
}

impl PrefixCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes for `(base, prefix)`, built on first use.
    pub fn get_or_insert(&self, base: Option<&str>, prefix: &str) -> Arc<PrefixedRoutes> {
        let key: PrefixKey = (base.map(str::to_string), prefix.to_string());
        if let Some(routes) = self.entries.read().get(&key) {
            return Arc::clone(routes);
        }

        let mut entries = self.entries.write();
        Arc::clone(entries.entry(key).or_insert_with(|| {
            Arc::new(PrefixedRoutes {
                base: base.map(str::to_string),
                prefix: prefix.to_string(),
            })
        }))
    }

    /// Routes for a resolved schema, or `None` when it is not folder-routed.
    pub fn for_schema(&self, config: &TenancyConfig, schema: &Schema) -> Option<Arc<PrefixedRoutes>> {
        let folder = schema.folder()?;
        Some(self.get_or_insert(urlconf_for(config, schema), folder))
    }

    /// Drop one entry. Returns whether it existed.
    pub fn invalidate(&self, base: Option<&str>, prefix: &str) -> bool {
        let key: PrefixKey = (base.map(str::to_string), prefix.to_string());
        self.entries.write().remove(&key).is_some()
    }

    /// Drop every entry derived from `base`. Returns how many were removed.
    pub fn invalidate_base(&self, base: Option<&str>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(b, _), _| b.as_deref() != base);
        before - entries.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Base URL configuration of a schema: its static tenant's `urlconf`, or the
/// dynamic one.
pub fn urlconf_for<'c>(config: &'c TenancyConfig, schema: &Schema) -> Option<&'c str> {
    if schema.is_dynamic() {
        config.dynamic_urlconf()
    } else {
        config
            .static_tenant(schema.name().as_str())
            .and_then(|(_, tenant)| tenant.urlconf.as_deref())
    }
}

/// URL builder for the active tenant, handed to request handlers.
#[derive(Debug, Clone, Default)]
pub struct TenantUrls {
    routes: Option<Arc<PrefixedRoutes>>,
}

impl TenantUrls {
    /// URLs for a tenant served at the site root.
    pub fn root() -> Self {
        Self::default()
    }

    /// URLs for a folder-routed tenant.
    pub fn prefixed(routes: Arc<PrefixedRoutes>) -> Self {
        Self {
            routes: Some(routes),
        }
    }

    /// The folder, if any.
    pub fn folder(&self) -> Option<&str> {
        self.routes.as_deref().map(PrefixedRoutes::prefix)
    }

    /// Tenant-relative absolute path for `path`.
    pub fn url_for(&self, path: &str) -> String {
        match &self.routes {
            Some(routes) => routes.url_for(path),
            None if path.starts_with('/') => path.to_string(),
            None => format!("/{path}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RoutingInfo, SchemaName};

    #[test]
    fn test_strip_and_url_for() {
        let cache = PrefixCache::new();
        let routes = cache.get_or_insert(Some("tenant_urls"), "acme");

        assert_eq!(routes.strip("/acme/profile").as_deref(), Some("/profile"));
        assert_eq!(routes.strip("/acme").as_deref(), Some("/"));
        assert_eq!(routes.strip("/acmeish/profile"), None);
        assert_eq!(routes.strip("/other"), None);
        assert_eq!(routes.url_for("/profile"), "/acme/profile");
        assert_eq!(routes.url_for("/"), "/acme/");
    }

    #[test]
    fn test_cache_reuses_and_invalidates() {
        let cache = PrefixCache::new();
        let a = cache.get_or_insert(Some("urls"), "acme");
        let b = cache.get_or_insert(Some("urls"), "acme");
        assert!(Arc::ptr_eq(&a, &b));

        cache.get_or_insert(Some("urls"), "globex");
        cache.get_or_insert(None, "acme");
        assert_eq!(cache.len(), 3);

        assert!(cache.invalidate(Some("urls"), "acme"));
        assert!(!cache.invalidate(Some("urls"), "acme"));
        let c = cache.get_or_insert(Some("urls"), "acme");
        assert!(!Arc::ptr_eq(&a, &c));

        assert_eq!(cache.invalidate_base(Some("urls")), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_for_schema() {
        let config = TenancyConfig::new().with_dynamic(crate::config::DynamicTenantConfig {
            urlconf: Some("tenant_urls".into()),
            ..Default::default()
        });
        let cache = PrefixCache::new();
        let name = SchemaName::new("acme").unwrap();

        let folder = Schema::new(name.clone(), true)
            .with_routing(RoutingInfo::domain_folder("tenants.example.com", "acme"));
        let routes = cache.for_schema(&config, &folder).unwrap();
        assert_eq!(routes.base(), Some("tenant_urls"));

        let bare = Schema::new(name, true).with_routing(RoutingInfo::domain("acme.com"));
        assert!(cache.for_schema(&config, &bare).is_none());

        assert_eq!(TenantUrls::prefixed(routes).url_for("orders"), "/acme/orders");
        assert_eq!(TenantUrls::root().url_for("orders"), "/orders");
    }
}
