//! Tenancy configuration.
//!
//! Static tenants are declared in configuration and keep their declaration
//! order. Dynamic tenants live in the database; the `[tenancy.dynamic]`
//! section only describes where their records are stored and which namespace
//! serves as the clone reference.
//!
//! ```toml
//! [tenancy]
//! extra_search_paths = ["shared"]
//! session_key = "tenant"
//! header = "x-tenant"
//!
//! [tenancy.tenants.www]
//! domains = ["example.com"]
//! fallback_domains = ["example.org"]
//!
//! [tenancy.dynamic]
//! clone_reference = "sample"
//! ```

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{TenancyError, TenancyResult};
use crate::routing::normalize_host;
use crate::schema::{SchemaName, validate_schema_name};
use crate::search_path::SearchPathConfig;

/// Key reserved for the dynamic tenant model.
pub const RESERVED_TENANT_KEY: &str = "default";

/// Default session key read by the session resolver.
pub const DEFAULT_SESSION_KEY: &str = "tenant";

/// Default header read by the header resolver.
pub const DEFAULT_HEADER: &str = "x-tenant";

/// Default number of dynamic tenants fetched per storage round trip.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// A tenant declared in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticTenantConfig {
    /// Hosts served by this tenant. The first one is its display identifier.
    pub domains: Vec<String>,
    /// Hosts used only when no other tenant matched.
    pub fallback_domains: Vec<String>,
    /// Session value that selects this tenant.
    pub session_key: Option<String>,
    /// Header value that selects this tenant.
    pub header_key: Option<String>,
    /// Applications installed for this tenant.
    pub apps: Vec<String>,
    /// Base URL configuration used for this tenant's routes.
    pub urlconf: Option<String>,
}

impl StaticTenantConfig {
    /// Create an empty tenant config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    /// Add a fallback domain.
    pub fn with_fallback_domain(mut self, domain: impl Into<String>) -> Self {
        self.fallback_domains.push(domain.into());
        self
    }

    /// Set the session key.
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    /// Set the header key.
    pub fn with_header_key(mut self, key: impl Into<String>) -> Self {
        self.header_key = Some(key.into());
        self
    }

    /// Set the URL configuration.
    pub fn with_urlconf(mut self, urlconf: impl Into<String>) -> Self {
        self.urlconf = Some(urlconf.into());
        self
    }

    /// The display domain.
    pub fn primary_domain(&self) -> Option<&str> {
        self.domains.first().map(String::as_str)
    }

    fn serves(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.domains.iter().any(|d| normalize_host(d) == host)
    }

    fn falls_back_for(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.fallback_domains.iter().any(|d| normalize_host(d) == host)
    }
}

/// Storage and provisioning settings for dynamic tenants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicTenantConfig {
    /// Table holding tenant records.
    pub tenants_table: String,
    /// Table holding domain bindings.
    pub domains_table: String,
    /// Pre-built namespace new tenants are cloned from.
    pub clone_reference: Option<SchemaName>,
    /// Base URL configuration for dynamic tenants.
    pub urlconf: Option<String>,
}

impl Default for DynamicTenantConfig {
    fn default() -> Self {
        Self {
            tenants_table: "tenants".to_string(),
            domains_table: "domains".to_string(),
            clone_reference: None,
            urlconf: None,
        }
    }
}

/// Top-level tenancy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    /// Static tenants in declaration order.
    pub tenants: IndexMap<SchemaName, StaticTenantConfig>,
    /// Dynamic tenant model, if dynamic tenants are enabled.
    pub dynamic: Option<DynamicTenantConfig>,
    /// Namespaces appended to every tenant search path.
    pub extra_search_paths: Vec<SchemaName>,
    /// Re-apply the search path before every statement.
    pub always_apply_search_path: bool,
    /// Session key read by the session resolver.
    pub session_key: String,
    /// Header read by the header resolver.
    pub header: String,
    /// Dynamic tenants fetched per storage round trip.
    pub batch_size: usize,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            tenants: IndexMap::new(),
            dynamic: None,
            extra_search_paths: Vec::new(),
            always_apply_search_path: false,
            session_key: DEFAULT_SESSION_KEY.to_string(),
            header: DEFAULT_HEADER.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    tenancy: TenancyConfig,
}

impl TenancyConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `[tenancy]` section of a TOML document and validate it.
    pub fn from_toml_str(source: &str) -> TenancyResult<Self> {
        let document: ConfigDocument = toml::from_str(source)
            .map_err(|e| TenancyError::config(format!("invalid tenancy configuration: {e}")))?;
        document.tenancy.validate()?;
        Ok(document.tenancy)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> TenancyResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Add a static tenant.
    pub fn with_tenant(mut self, name: SchemaName, tenant: StaticTenantConfig) -> Self {
        self.tenants.insert(name, tenant);
        self
    }

    /// Enable dynamic tenants.
    pub fn with_dynamic(mut self, dynamic: DynamicTenantConfig) -> Self {
        self.dynamic = Some(dynamic);
        self
    }

    /// Set the clone reference, enabling dynamic tenants if needed.
    pub fn with_clone_reference(mut self, name: SchemaName) -> Self {
        self.dynamic.get_or_insert_with(Default::default).clone_reference = Some(name);
        self
    }

    /// Append an extra search path.
    pub fn with_extra_search_path(mut self, name: SchemaName) -> Self {
        self.extra_search_paths.push(name);
        self
    }

    /// Set the session key.
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    /// Set the header name.
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    /// Set the storage batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> TenancyResult<()> {
        if self.tenants.keys().any(|k| k.as_str() == RESERVED_TENANT_KEY) {
            return Err(TenancyError::config(format!(
                "'{RESERVED_TENANT_KEY}' is reserved for the dynamic tenant model and cannot be a static tenant"
            )));
        }

        let mut seen: HashMap<String, &SchemaName> = HashMap::new();
        for (name, tenant) in &self.tenants {
            for domain in &tenant.domains {
                let host = normalize_host(domain);
                if host.is_empty() {
                    return Err(TenancyError::config(format!(
                        "tenant '{name}' declares an empty domain"
                    )));
                }
                match seen.insert(host, name) {
                    Some(other) if other != name => {
                        return Err(TenancyError::config(format!(
                            "domain '{domain}' is declared by both '{other}' and '{name}'"
                        )));
                    }
                    _ => {}
                }
            }
        }

        if let Some(dynamic) = &self.dynamic {
            for table in [&dynamic.tenants_table, &dynamic.domains_table] {
                validate_schema_name(table).map_err(|e| {
                    TenancyError::config(format!("invalid table name '{table}': {e}"))
                })?;
            }
            if let Some(reference) = &dynamic.clone_reference {
                if self.tenants.contains_key(reference) {
                    return Err(TenancyError::config(format!(
                        "clone reference '{reference}' collides with a static tenant"
                    )));
                }
                if reference.is_public() {
                    return Err(TenancyError::config(
                        "the public schema cannot be used as clone reference",
                    ));
                }
            }
        }

        if self.session_key.trim().is_empty() {
            return Err(TenancyError::config("session_key must not be empty"));
        }
        if self.header.trim().is_empty() {
            return Err(TenancyError::config("header must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(TenancyError::config("batch_size must be greater than zero"));
        }
        Ok(())
    }

    /// Whether dynamic tenants are enabled.
    pub fn has_dynamic(&self) -> bool {
        self.dynamic.is_some()
    }

    /// The configured clone reference.
    pub fn clone_reference(&self) -> Option<&SchemaName> {
        self.dynamic.as_ref()?.clone_reference.as_ref()
    }

    /// Base URL configuration for dynamic tenants.
    pub fn dynamic_urlconf(&self) -> Option<&str> {
        self.dynamic.as_ref()?.urlconf.as_deref()
    }

    /// Look up a static tenant by name.
    pub fn static_tenant(&self, name: &str) -> Option<(&SchemaName, &StaticTenantConfig)> {
        self.tenants.get_key_value(name)
    }

    /// Whether `name` is a static tenant, `public` included.
    pub fn is_static(&self, name: &str) -> bool {
        name == crate::schema::PUBLIC_SCHEMA || self.tenants.contains_key(name)
    }

    /// The static tenant serving `host`.
    pub fn find_by_domain(&self, host: &str) -> Option<(&SchemaName, &StaticTenantConfig)> {
        self.tenants.iter().find(|(_, t)| t.serves(host))
    }

    /// The static tenant listing `host` as a fallback domain.
    pub fn find_by_fallback_domain(
        &self,
        host: &str,
    ) -> Option<(&SchemaName, &StaticTenantConfig)> {
        self.tenants.iter().find(|(_, t)| t.falls_back_for(host))
    }

    /// The static tenant whose session key equals `value`.
    pub fn find_by_session_key(&self, value: &str) -> Option<(&SchemaName, &StaticTenantConfig)> {
        self.tenants
            .iter()
            .find(|(_, t)| t.session_key.as_deref() == Some(value))
    }

    /// The static tenant whose header key equals `value`.
    pub fn find_by_header_key(&self, value: &str) -> Option<(&SchemaName, &StaticTenantConfig)> {
        self.tenants
            .iter()
            .find(|(_, t)| t.header_key.as_deref() == Some(value))
    }

    /// Search-path settings derived from this configuration.
    pub fn search_path_config(&self) -> SearchPathConfig {
        SearchPathConfig {
            extra_paths: self.extra_search_paths.clone(),
            always_apply: self.always_apply_search_path,
        }
    }
}
