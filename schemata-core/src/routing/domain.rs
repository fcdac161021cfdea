//! Host and folder based resolution.

use tracing::debug;

use super::{RequestInfo, Resolution};
use crate::config::TenancyConfig;
use crate::error::TenancyResult;
use crate::schema::{RoutingInfo, Schema};
use crate::store::{DomainRecord, TenantRecord, TenantStore};

/// Resolves tenants from the request host and, optionally, its first path
/// segment.
///
/// Matching order:
/// 1. a static tenant listing the host among its domains (folder ignored);
/// 2. a dynamic binding for `(host, folder)`, then `(host, "")`;
/// 3. a static tenant listing the host among its fallback domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainResolver {
    folder_routing: bool,
}

impl Default for DomainResolver {
    fn default() -> Self {
        Self {
            folder_routing: true,
        }
    }
}

impl DomainResolver {
    /// Domain resolver with folder routing enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Domain resolver that never looks at the path.
    pub fn without_folders() -> Self {
        Self {
            folder_routing: false,
        }
    }

    /// Whether the first path segment is considered.
    pub fn folder_routing(&self) -> bool {
        self.folder_routing
    }

    /// Resolve `request`. `Ok(None)` means this resolver did not match.
    pub async fn resolve(
        &self,
        request: &RequestInfo,
        config: &TenancyConfig,
        store: Option<&dyn TenantStore>,
    ) -> TenancyResult<Option<Resolution>> {
        let host = request.host();

        if let Some((name, _)) = config.find_by_domain(host) {
            let schema = Schema::new(name.clone(), false).with_routing(RoutingInfo::domain(host));
            return Ok(Some(Resolution::Activate(schema)));
        }

        if let Some(store) = store {
            if let Some((tenant, binding)) = self.find_binding(request, store).await? {
                return Ok(Some(self.activate_or_redirect(request, tenant, binding)));
            }
        }

        if let Some((name, _)) = config.find_by_fallback_domain(host) {
            debug!(host, schema = %name, "matched fallback domain");
            let schema = Schema::new(name.clone(), false).with_routing(RoutingInfo::domain(host));
            return Ok(Some(Resolution::Activate(schema)));
        }

        Ok(None)
    }

    async fn find_binding(
        &self,
        request: &RequestInfo,
        store: &dyn TenantStore,
    ) -> TenancyResult<Option<(TenantRecord, DomainRecord)>> {
        let host = request.host();
        if self.folder_routing {
            if let Some(folder) = request.first_segment() {
                if let Some(found) = store.find_domain(host, folder).await? {
                    return Ok(Some(found));
                }
            }
        }
        store.find_domain(host, "").await
    }

    fn activate_or_redirect(
        &self,
        request: &RequestInfo,
        tenant: TenantRecord,
        binding: DomainRecord,
    ) -> Resolution {
        if binding.redirect_to_primary {
            if let Some(primary) = tenant.primary_domain().filter(|p| p.id != binding.id) {
                let location = redirect_location(request, &binding, primary);
                debug!(from = %binding.identifier(), to = %location, "redirecting to primary domain");
                return Resolution::Redirect { location };
            }
        }
        let routing = binding.routing();
        Resolution::Activate(Schema::new(tenant.schema_name, true).with_routing(routing))
    }
}

/// `scheme://primary[/folder]` followed by the path left after the matched
/// binding's folder, plus the query string.
fn redirect_location(request: &RequestInfo, matched: &DomainRecord, primary: &DomainRecord) -> String {
    let path = request.path();
    let remaining = if matched.folder.is_empty() {
        path
    } else {
        path.strip_prefix('/')
            .and_then(|p| p.strip_prefix(matched.folder.as_str()))
            .unwrap_or(path)
    };

    let mut location = format!("{}://{}", request.scheme(), primary.domain);
    if !primary.folder.is_empty() {
        location.push('/');
        location.push_str(&primary.folder);
    }
    if remaining.is_empty() {
        location.push('/');
    } else {
        location.push_str(remaining);
    }
    if let Some(query) = request.query() {
        location.push('?');
        location.push_str(query);
    }
    location
}
