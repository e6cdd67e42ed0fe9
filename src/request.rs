//! The request view every gate inspects.

use axum::http::{HeaderMap, Method};
use std::collections::HashSet;
use std::net::IpAddr;

/// Who is making the request, as established by upstream authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Whether upstream authentication succeeded
    pub is_authenticated: bool,
    /// Username shown in audit lines
    pub display_name: String,
    /// Superuser flag; grants every role
    pub is_elevated: bool,
    /// Names of the groups the user belongs to
    pub groups: HashSet<String>,
}

impl Identity {
    /// An authenticated user with no elevation and no groups.
    pub fn authenticated(display_name: impl Into<String>) -> Self {
        Self {
            is_authenticated: true,
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Add group memberships.
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Mark the user as elevated.
    pub fn elevated(mut self) -> Self {
        self.is_elevated = true;
        self
    }

    /// Whether the user is in any of `groups`.
    pub fn in_any_group<S: AsRef<str>>(&self, groups: &[S]) -> bool {
        groups.iter().any(|g| self.groups.contains(g.as_ref()))
    }
}

/// A request as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    /// Transport-level peer address, when the host knows it
    pub remote_addr: Option<IpAddr>,
    pub identity: Option<Identity>,
}

impl GateRequest {
    /// Create a request with no headers, peer address or identity.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            remote_addr: None,
            identity: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Add a header, skipping names or values that are not valid HTTP.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<axum::http::HeaderName>(),
            value.parse::<axum::http::HeaderValue>(),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// The identity, only if it is authenticated.
    pub fn authenticated_identity(&self) -> Option<&Identity> {
        self.identity.as_ref().filter(|id| id.is_authenticated)
    }

    /// Display name for audit lines, `anonymous` when unauthenticated.
    pub fn username(&self) -> &str {
        self.authenticated_identity()
            .map(|id| id.display_name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("anonymous")
    }
}
