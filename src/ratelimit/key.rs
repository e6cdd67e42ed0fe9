//! Client key derivation.

use crate::request::GateRequest;

/// Namespace for rate limit entries in a shared store.
const SCOPE_PREFIX: &str = "chat_rate_";

/// Address used when a request carries no usable address at all.
const UNKNOWN_ADDR: &str = "0.0.0.0";

/// Identifies one client for rate limiting purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Create a key for a client address.
    pub fn new(addr: &str) -> Self {
        Self(format!("{}{}", SCOPE_PREFIX, addr))
    }

    /// The namespaced store key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The client address without the namespace.
    pub fn addr(&self) -> &str {
        &self.0[SCOPE_PREFIX.len()..]
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives a [`ClientKey`] from a request.
///
/// The leftmost `X-Forwarded-For` entry wins over the transport address,
/// since that is the original client when the service sits behind a proxy.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentifier {
    forwarded_header: Option<String>,
}

impl ClientIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the client address from a different header than `X-Forwarded-For`.
    pub fn with_forwarded_header(header: impl Into<String>) -> Self {
        Self {
            forwarded_header: Some(header.into()),
        }
    }

    pub fn identify(&self, request: &GateRequest) -> ClientKey {
        let header = self.forwarded_header.as_deref().unwrap_or("x-forwarded-for");

        let forwarded = request
            .headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());

        match (forwarded, request.remote_addr) {
            (Some(ip), _) => ClientKey::new(ip),
            (None, Some(addr)) => ClientKey::new(&addr.to_string()),
            (None, None) => ClientKey::new(UNKNOWN_ADDR),
        }
    }
}
