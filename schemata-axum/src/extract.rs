//! Request extensions and extractors.

use std::collections::HashMap;
use std::convert::Infallible;
use std::ops::Deref;

use axum::extract::FromRequestParts;
use http::request::Parts;
use schemata_core::{Schema, TenantUrls, context};

/// The schema the request was resolved to.
///
/// Outside a [`TenancyLayer`](crate::TenancyLayer) this yields whatever schema
/// is active in the current task, `public` by default.
///
/// ```rust,ignore
/// async fn handler(CurrentSchema(schema): CurrentSchema) -> String {
///     schema.display_identifier()
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentSchema(pub Schema);

impl Deref for CurrentSchema {
    type Target = Schema;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S> FromRequestParts<S> for CurrentSchema
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<CurrentSchema>()
            .cloned()
            .unwrap_or_else(|| CurrentSchema(context::current())))
    }
}

/// Tenant-relative URL builder for the request.
#[derive(Debug, Clone, Default)]
pub struct Urls(pub TenantUrls);

impl Deref for Urls {
    type Target = TenantUrls;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Urls
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Urls(parts.extensions.get::<TenantUrls>().cloned().unwrap_or_default()))
    }
}

/// Session values made available to the session resolver.
///
/// A session middleware running before the tenancy layer inserts this into
/// the request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionValues(HashMap<String, String>);

impl SessionValues {
    /// No values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// All values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
