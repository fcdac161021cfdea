//! Session and header based resolution.
//!
//! Both resolvers read a single value. It is first matched against the
//! `session_key`/`header_key` of static tenants; otherwise it is taken as the
//! schema name of a dynamic tenant and looked up in the store.

use tracing::debug;

use super::{RequestInfo, Resolution};
use crate::config::{StaticTenantConfig, TenancyConfig};
use crate::error::TenancyResult;
use crate::schema::{RoutingInfo, Schema, SchemaName};
use crate::store::TenantStore;

/// Where a token value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// The configured session key.
    Session,
    /// The configured request header.
    Header,
}

impl TokenSource {
    fn read<'a>(&self, request: &'a RequestInfo, config: &TenancyConfig) -> Option<&'a str> {
        match self {
            Self::Session => request.session_value(&config.session_key),
            Self::Header => request.header(&config.header),
        }
    }

    fn find_static<'c>(
        &self,
        config: &'c TenancyConfig,
        value: &str,
    ) -> Option<(&'c SchemaName, &'c StaticTenantConfig)> {
        match self {
            Self::Session => config.find_by_session_key(value),
            Self::Header => config.find_by_header_key(value),
        }
    }

    fn routing(&self, value: &str) -> RoutingInfo {
        match self {
            Self::Session => RoutingInfo::Session {
                reference: value.to_string(),
            },
            Self::Header => RoutingInfo::Headers {
                reference: value.to_string(),
            },
        }
    }

    /// Resolve the token carried by `request`. `Ok(None)` means absent or
    /// unknown; a value that is not a valid schema name is an error.
    pub async fn resolve(
        &self,
        request: &RequestInfo,
        config: &TenancyConfig,
        store: Option<&dyn TenantStore>,
    ) -> TenancyResult<Option<Resolution>> {
        let Some(value) = self.read(request, config).map(str::trim).filter(|v| !v.is_empty())
        else {
            return Ok(None);
        };

        if let Some((name, _)) = self.find_static(config, value) {
            let schema = Schema::new(name.clone(), false).with_routing(self.routing(value));
            return Ok(Some(Resolution::Activate(schema)));
        }

        let name = SchemaName::new(value)?;
        let Some(store) = store else {
            return Ok(None);
        };
        match store.find_by_schema_name(name.as_str()).await? {
            Some(record) => {
                let schema = Schema::new(record.schema_name, true).with_routing(self.routing(value));
                Ok(Some(Resolution::Activate(schema)))
            }
            None => {
                debug!(source = ?self, value, "token does not name a tenant");
                Ok(None)
            }
        }
    }
}
