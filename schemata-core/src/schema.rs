//! Schema identity and name validation.
//!
//! Namespace identifiers cannot be passed as bound parameters in DDL, so every
//! name that ends up in `SET search_path`, `CREATE SCHEMA` or `DROP SCHEMA`
//! must first pass [`validate_schema_name`]. [`SchemaName`] can only be
//! constructed through the validator, which makes that a type-level property.
//!
//! # Example
//!
//! ```rust
//! use schemata_core::{Schema, SchemaName};
//!
//! assert!(SchemaName::new("tenant_1").is_ok());
//! assert!(SchemaName::new("pg_tenant").is_err());
//!
//! let acme = Schema::new(SchemaName::new("acme").unwrap(), true);
//! assert_eq!(acme.name().as_str(), "acme");
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{TenancyError, TenancyResult};

/// Name of the default namespace.
pub const PUBLIC_SCHEMA: &str = "public";

/// Identifier length bound imposed by PostgreSQL (`NAMEDATALEN - 1`).
pub const MAX_SCHEMA_NAME_LENGTH: usize = 63;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern compiles")
});

static RESERVED_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^pg_").expect("reserved prefix pattern compiles"));

/// Validate a namespace identifier.
///
/// A name is valid iff it is a plain SQL identifier of at most 63 characters
/// and does not start with the reserved `pg_` prefix (case-insensitive).
pub fn validate_schema_name(name: &str) -> TenancyResult<()> {
    if name.is_empty() {
        return Err(TenancyError::invalid_name(name, "name is empty"));
    }
    if name.len() > MAX_SCHEMA_NAME_LENGTH {
        return Err(TenancyError::invalid_name(
            name,
            format!("name exceeds {MAX_SCHEMA_NAME_LENGTH} characters"),
        ));
    }
    if !IDENTIFIER.is_match(name) {
        return Err(TenancyError::invalid_name(
            name,
            "name must start with a letter or underscore and contain only letters, digits and underscores",
        ));
    }
    if RESERVED_PREFIX.is_match(name) {
        return Err(TenancyError::invalid_name(
            name,
            "the 'pg_' prefix is reserved for system schemas",
        ));
    }
    Ok(())
}

/// Check a namespace identifier without building an error.
#[inline]
pub fn is_valid_schema_name(name: &str) -> bool {
    validate_schema_name(name).is_ok()
}

/// A validated namespace identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    /// Validate and wrap a name.
    pub fn new(name: impl Into<String>) -> TenancyResult<Self> {
        let name = name.into();
        validate_schema_name(&name)?;
        Ok(Self(name))
    }

    /// The default `public` namespace.
    pub fn public() -> Self {
        Self(PUBLIC_SCHEMA.to_string())
    }

    /// Get the name as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the default namespace.
    #[inline]
    pub fn is_public(&self) -> bool {
        self.0 == PUBLIC_SCHEMA
    }

    /// Double-quoted form for interpolation into DDL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Consume into the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SchemaName {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SchemaName {
    type Error = TenancyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SchemaName {
    type Error = TenancyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SchemaName> for String {
    fn from(name: SchemaName) -> Self {
        name.0
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SchemaName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// How a tenant was resolved for the current unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingInfo {
    /// Matched by host name and, for folder routing, the first path segment.
    Domain {
        /// Normalized host.
        domain: String,
        /// Folder prefix, if the binding is folder-scoped.
        folder: Option<String>,
    },
    /// Matched by a session value.
    Session {
        /// The session value that matched.
        reference: String,
    },
    /// Matched by a request header.
    Headers {
        /// The header value that matched.
        reference: String,
    },
}

impl RoutingInfo {
    /// Domain routing without a folder.
    pub fn domain(domain: impl Into<String>) -> Self {
        Self::Domain {
            domain: domain.into(),
            folder: None,
        }
    }

    /// Domain routing with an optional folder; empty folders are stored as `None`.
    pub fn domain_folder(domain: impl Into<String>, folder: impl Into<String>) -> Self {
        let folder = folder.into();
        Self::Domain {
            domain: domain.into(),
            folder: (!folder.is_empty()).then_some(folder),
        }
    }
}

/// A tenant identity.
///
/// Equality compares the name and the routing information: two resolutions of
/// the same tenant through different signals are different values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    name: SchemaName,
    is_dynamic: bool,
    routing: Option<RoutingInfo>,
}

impl Schema {
    /// Create a schema without routing information.
    pub fn new(name: SchemaName, is_dynamic: bool) -> Self {
        Self {
            name,
            is_dynamic,
            routing: None,
        }
    }

    /// The default `public` tenant.
    pub fn public() -> Self {
        Self::new(SchemaName::public(), false)
    }

    /// Validate a name and build a static schema from it.
    pub fn parse(name: &str) -> TenancyResult<Self> {
        Ok(Self::new(SchemaName::new(name)?, false))
    }

    /// Attach routing information.
    pub fn with_routing(mut self, routing: RoutingInfo) -> Self {
        self.routing = Some(routing);
        self
    }

    /// The namespace identifier.
    #[inline]
    pub fn name(&self) -> &SchemaName {
        &self.name
    }

    /// Whether the tenant is backed by a database record.
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    /// Whether this is the default namespace.
    #[inline]
    pub fn is_public(&self) -> bool {
        self.name.is_public()
    }

    /// How the tenant was resolved, if it was.
    #[inline]
    pub fn routing(&self) -> Option<&RoutingInfo> {
        self.routing.as_ref()
    }

    /// The folder prefix for folder-routed tenants.
    pub fn folder(&self) -> Option<&str> {
        match &self.routing {
            Some(RoutingInfo::Domain { folder, .. }) => folder.as_deref(),
            _ => None,
        }
    }

    /// Human-facing identifier: `domain/folder`, `domain`, or the schema name.
    pub fn display_identifier(&self) -> String {
        match &self.routing {
            Some(RoutingInfo::Domain {
                domain,
                folder: Some(folder),
            }) => format!("{domain}/{folder}"),
            Some(RoutingInfo::Domain { domain, folder: None }) => domain.clone(),
            _ => self.name.to_string(),
        }
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.routing == other.routing
    }
}

impl Eq for Schema {}

impl Hash for Schema {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.routing.hash(state);
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::public()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_str())
    }
}
