//! Framework-independent view of an inbound request.

use std::collections::HashMap;

/// The parts of a request the resolvers inspect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    host: String,
    path: String,
    query: Option<String>,
    secure: bool,
    session: HashMap<String, String>,
    headers: Vec<(String, String)>,
}

impl RequestInfo {
    /// Create a request for `host` (raw `Host` header value) and `path`.
    pub fn new(host: &str, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            host: normalize_host(host),
            path: if path.starts_with('/') {
                path
            } else {
                format!("/{path}")
            },
            ..Self::default()
        }
    }

    /// Set the query string (without `?`).
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = (!query.is_empty()).then_some(query);
        self
    }

    /// Mark the request as received over TLS.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Add a session value.
    pub fn with_session(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.session.insert(key.into(), value.into());
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    /// Normalized host: lowercase, no port, no leading `www.`.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Request path, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// `https` or `http`.
    pub fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }

    /// First non-empty path segment, the candidate folder.
    pub fn first_segment(&self) -> Option<&str> {
        self.path
            .trim_start_matches('/')
            .split('/')
            .next()
            .filter(|segment| !segment.is_empty())
    }

    /// Session value for `key`.
    pub fn session_value(&self, key: &str) -> Option<&str> {
        self.session.get(key).map(String::as_str)
    }

    /// First value of header `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Lowercase a host, strip its port and a leading `www.`.
pub fn normalize_host(raw: &str) -> String {
    let host = raw.trim().to_ascii_lowercase();
    let without_port = if host.starts_with('[') {
        // Bracketed IPv6 literal.
        host.find(']')
            .map_or_else(|| host.clone(), |end| host[..=end].to_string())
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
            _ => host.clone(),
        }
    };
    if without_port.len() > 4 && without_port.starts_with("www.") {
        without_port[4..].to_string()
    } else {
        without_port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("www.acme.com"), "acme.com");
        assert_eq!(normalize_host("WWW.Acme.com:8000"), "acme.com");
        assert_eq!(normalize_host("acme.com"), "acme.com");
        assert_eq!(normalize_host("[::1]:8080"), "[::1]");
        assert_eq!(normalize_host("localhost:3000"), "localhost");
        assert_eq!(normalize_host("www."), "www.");
    }

    #[test]
    fn test_first_segment() {
        let request = RequestInfo::new("tenants.example.com", "/acme/profile");
        assert_eq!(request.first_segment(), Some("acme"));
        assert_eq!(RequestInfo::new("x.com", "/").first_segment(), None);
        assert_eq!(RequestInfo::new("x.com", "profile").path(), "/profile");
    }

    #[test]
    fn test_headers_case_insensitive() {
        let request = RequestInfo::new("x.com", "/")
            .with_header("X-Tenant", "acme")
            .with_session("tenant", "globex");
        assert_eq!(request.header("x-tenant"), Some("acme"));
        assert_eq!(request.header("X-TENANT"), Some("acme"));
        assert_eq!(request.session_value("tenant"), Some("globex"));
        assert_eq!(request.session_value("missing"), None);
    }
}
