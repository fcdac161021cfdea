//! Axum integration for schemata.
//!
//! [`TenancyLayer`] runs a [`ResolverChain`] for every request and then calls
//! the inner service with the resolved schema active for the whole request,
//! so every `TenantConnection` checked out by a handler is bound to it.
//!
//! - A redirect binding answers `301 Moved Permanently`
//! - No matching tenant answers `404 Not Found`
//! - An invalid tenant token answers `400 Bad Request`
//! - Folder-routed tenants have their folder stripped from the path
//!
//! Wrap the whole router rather than calling `Router::layer`, so the folder
//! is stripped before routing:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use axum::{Router, routing::get};
//! use schemata_axum::{CurrentSchema, TenancyLayer};
//! use schemata_core::{DomainResolver, Resolver, ResolverChain, TenancyConfig};
//! use tower::Layer;
//!
//! async fn whoami(CurrentSchema(schema): CurrentSchema) -> String {
//!     schema.name().to_string()
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TenancyConfig::load("schemata.toml").unwrap();
//!     let chain = ResolverChain::new(Arc::new(config))
//!         .with_resolver(Resolver::Domain(DomainResolver::new()))
//!         .with_resolver(Resolver::Header);
//!
//!     let router = Router::new().route("/whoami", get(whoami));
//!     let app = TenancyLayer::new(chain).layer(router);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, tower::make::Shared::new(app)).await.unwrap();
//! }
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use http::uri::PathAndQuery;
use http::{HeaderValue, Request, StatusCode, Uri, header};
use schemata_core::{
    PrefixCache, RequestInfo, Resolution, ResolverChain, TenancyError, TenantUrls, context,
};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::{debug, error};

mod extract;

pub use extract::{CurrentSchema, SessionValues, Urls};

/// A resolution failure turned into a response.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct TenancyRejection(#[from] pub TenancyError);

impl TenancyRejection {
    /// Status code for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TenancyError::NotFound(_) => StatusCode::NOT_FOUND,
            TenancyError::InvalidName { .. } | TenancyError::Ambiguous { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TenancyRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, code = %self.0.code(), "tenant resolution failed");
            return (status, "tenant resolution failed").into_response();
        }
        debug!(error = %self.0, %status, "rejecting request");
        (status, self.0.to_string()).into_response()
    }
}

/// `301 Moved Permanently` to `location`.
pub fn redirect_response(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, value)]).into_response(),
        Err(_) => TenancyRejection(TenancyError::internal(format!(
            "redirect target '{location}' is not a valid header value"
        )))
        .into_response(),
    }
}

/// The parts of `request` the resolvers need.
pub fn request_info<B>(request: &Request<B>) -> RequestInfo {
    let uri = request.uri();
    let headers = request.headers();
    let host = uri
        .authority()
        .map(|a| a.as_str())
        .or_else(|| headers.get(header::HOST).and_then(|h| h.to_str().ok()))
        .unwrap_or_default();
    let forwarded_https = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));

    let mut info = RequestInfo::new(host, uri.path())
        .with_query(uri.query().unwrap_or_default())
        .with_secure(uri.scheme() == Some(&http::uri::Scheme::HTTPS) || forwarded_https);
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            info = info.with_header(name.as_str(), value);
        }
    }
    if let Some(session) = request.extensions().get::<SessionValues>() {
        for (key, value) in session.iter() {
            info = info.with_session(key, value);
        }
    }
    info
}

fn replace_path<B>(request: &mut Request<B>, path: &str) {
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = PathAndQuery::try_from(path_and_query).ok();
    if let Ok(uri) = Uri::from_parts(parts) {
        *request.uri_mut() = uri;
    }
}

/// Tower layer resolving the tenant of every request.
#[derive(Clone)]
pub struct TenancyLayer {
    chain: Arc<ResolverChain>,
    prefixes: Arc<PrefixCache>,
}

impl std::fmt::Debug for TenancyLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenancyLayer")
            .field("chain", &self.chain)
            .field("prefixes", &self.prefixes.len())
            .finish()
    }
}

impl TenancyLayer {
    /// Create a layer with its own prefix cache.
    pub fn new(chain: ResolverChain) -> Self {
        Self {
            chain: Arc::new(chain),
            prefixes: Arc::new(PrefixCache::new()),
        }
    }

    /// Share a prefix cache, e.g. to invalidate it when tenants change.
    pub fn with_prefix_cache(mut self, prefixes: Arc<PrefixCache>) -> Self {
        self.prefixes = prefixes;
        self
    }

    /// The resolver chain.
    pub fn chain(&self) -> &ResolverChain {
        &self.chain
    }

    /// The prefix cache.
    pub fn prefixes(&self) -> &Arc<PrefixCache> {
        &self.prefixes
    }
}

impl<S> Layer<S> for TenancyLayer {
    type Service = TenancyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TenancyService {
            inner,
            chain: self.chain.clone(),
            prefixes: self.prefixes.clone(),
        }
    }
}

/// Service produced by [`TenancyLayer`].
#[derive(Clone)]
pub struct TenancyService<S> {
    inner: S,
    chain: Arc<ResolverChain>,
    prefixes: Arc<PrefixCache>,
}

impl<S, B> Service<Request<B>> for TenancyService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        // Take the service that was polled ready, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let chain = self.chain.clone();
        let prefixes = self.prefixes.clone();

        Box::pin(async move {
            let info = request_info(&request);
            let schema = match chain.resolve(&info).await {
                Ok(Resolution::Activate(schema)) => schema,
                Ok(Resolution::Redirect { location }) => return Ok(redirect_response(&location)),
                Err(err) => return Ok(TenancyRejection(err).into_response()),
            };

            let urls = match prefixes.for_schema(chain.config(), &schema) {
                Some(routes) => {
                    if let Some(stripped) = routes.strip(request.uri().path()) {
                        replace_path(&mut request, &stripped);
                    }
                    TenantUrls::prefixed(routes)
                }
                None => TenantUrls::root(),
            };
            debug!(schema = %schema, path = %request.uri().path(), "request scoped to tenant");

            request.extensions_mut().insert(CurrentSchema(schema.clone()));
            request.extensions_mut().insert(urls);
            context::with_schema(schema, inner.call(request)).await
        })
    }
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{CurrentSchema, SessionValues, TenancyLayer, TenancyRejection, Urls};
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::routing::get;
    use pretty_assertions::assert_eq;
    use schemata_core::testing::MemoryTenantStore;
    use schemata_core::{
        DomainResolver, NewDomain, Resolver, SchemaName, StaticTenantConfig, TenancyConfig,
    };
    use tower::ServiceExt;

    async fn whoami(CurrentSchema(schema): CurrentSchema) -> String {
        format!("{}|{}", schema.name(), context::current().name())
    }

    async fn link(urls: Urls) -> String {
        urls.url_for("/orders")
    }

    async fn app() -> TenancyService<Router> {
        let config = TenancyConfig::new()
            .with_tenant(
                SchemaName::new("www").unwrap(),
                StaticTenantConfig::new().with_domain("example.com"),
            )
            .with_dynamic(Default::default());

        let store = MemoryTenantStore::new();
        store
            .seed("acme", vec![
                NewDomain::new("tenants.example.com").with_folder("acme").primary(),
                NewDomain::new("acme.com").redirecting(),
            ])
            .await;

        let chain = ResolverChain::new(Arc::new(config))
            .with_store(Arc::new(store))
            .with_resolver(Resolver::Domain(DomainResolver::new()))
            .with_resolver(Resolver::Session)
            .with_resolver(Resolver::Header);

        let router = Router::new()
            .route("/whoami", get(whoami))
            .route("/link", get(link));
        TenancyLayer::new(chain).layer(router)
    }

    fn request(host: &str, path: &str) -> http::request::Builder {
        Request::builder().uri(path).header(header::HOST, host)
    }

    async fn body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_domain_scopes_request() {
        let response = app()
            .await
            .oneshot(request("www.example.com:8080", "/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, "www|www");
        assert!(context::current().is_public());
    }

    #[tokio::test]
    async fn test_folder_is_stripped() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(request("tenants.example.com", "/acme/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body(response).await, "acme|acme");

        let response = app
            .oneshot(request("tenants.example.com", "/acme/link").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body(response).await, "/acme/orders");
    }

    #[tokio::test]
    async fn test_redirect_binding() {
        let response = app()
            .await
            .oneshot(request("acme.com", "/whoami?x=1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "http://tenants.example.com/acme/whoami?x=1"
        );
    }

    #[tokio::test]
    async fn test_unknown_host_is_not_found() {
        let response = app()
            .await
            .oneshot(request("nobody.test", "/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_header_overrides_domain() {
        let response = app()
            .await
            .oneshot(
                request("example.com", "/whoami")
                    .header("x-tenant", "acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body(response).await, "acme|acme");
    }

    #[tokio::test]
    async fn test_session_value() {
        let mut req = request("example.com", "/whoami").body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(SessionValues::new().with("tenant", "acme"));
        let response = app().await.oneshot(req).await.unwrap();
        assert_eq!(body(response).await, "acme|acme");
    }

    #[tokio::test]
    async fn test_invalid_token_is_bad_request() {
        let response = app()
            .await
            .oneshot(
                request("example.com", "/whoami")
                    .header("x-tenant", "pg_catalog")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_request_info() {
        let req = Request::builder()
            .uri("/acme/orders?page=2")
            .header(header::HOST, "WWW.Tenants.Example.com:443")
            .header("x-forwarded-proto", "https")
            .header("X-Tenant", "acme")
            .body(())
            .unwrap();
        let info = request_info(&req);
        assert_eq!(info.host(), "tenants.example.com");
        assert_eq!(info.path(), "/acme/orders");
        assert_eq!(info.query(), Some("page=2"));
        assert_eq!(info.scheme(), "https");
        assert_eq!(info.header("x-tenant"), Some("acme"));
    }

    #[test]
    fn test_rejection_status() {
        let status = |e| TenancyRejection(e).status();
        assert_eq!(status(TenancyError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(status(TenancyError::invalid_name("x", "y")), StatusCode::BAD_REQUEST);
        assert_eq!(status(TenancyError::database("down")), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
