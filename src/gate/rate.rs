//! Rate limiting gate.

use async_trait::async_trait;
use axum::http::Method;
use chrono::{DateTime, Local};
use std::time::Duration;
use tracing::info;

use super::{DenialReason, Gate, Rejection, Verdict};
use crate::config::RateLimitingConfig;
use crate::ratelimit::{ClientIdentifier, Decision, RateLimiter};
use crate::request::GateRequest;

/// Which requests are subject to rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitScope {
    path_prefix: String,
    methods: Vec<Method>,
}

impl RateLimitScope {
    pub fn new(path_prefix: impl Into<String>, methods: Vec<Method>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            methods,
        }
    }

    pub fn applies_to(&self, method: &Method, path: &str) -> bool {
        self.methods.contains(method) && path.starts_with(self.path_prefix.as_str())
    }
}

impl Default for RateLimitScope {
    fn default() -> Self {
        Self::from(&RateLimitingConfig::default())
    }
}

impl From<&RateLimitingConfig> for RateLimitScope {
    /// Method names that are not valid HTTP tokens are skipped.
    fn from(config: &RateLimitingConfig) -> Self {
        let methods = config
            .methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).ok())
            .collect();
        Self::new(config.path_prefix.clone(), methods)
    }
}

/// Applies a [`RateLimiter`] to the requests in its [`RateLimitScope`].
#[derive(Debug, Clone)]
pub struct RateGate {
    limiter: RateLimiter,
    scope: RateLimitScope,
    identifier: ClientIdentifier,
    message: String,
}

impl RateGate {
    pub fn new(limiter: RateLimiter, scope: RateLimitScope, identifier: ClientIdentifier) -> Self {
        let policy = limiter.policy();
        let message = exceeded_message(policy.max_requests, policy.window);
        Self {
            limiter,
            scope,
            identifier,
            message,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

fn exceeded_message(max_requests: u64, window: Duration) -> String {
    let per = match window.as_secs() {
        60 => "minute".to_string(),
        1 => "second".to_string(),
        3600 => "hour".to_string(),
        secs => format!("{} seconds", secs),
    };
    format!("Rate limit exceeded: max {} messages per {}.", max_requests, per)
}

#[async_trait]
impl Gate for RateGate {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn check(&self, request: &GateRequest, now: DateTime<Local>) -> Verdict {
        if !self.scope.applies_to(&request.method, &request.path) {
            return Verdict::Pass;
        }

        let key = self.identifier.identify(request);
        match self.limiter.admit(&key, now).await {
            Decision::Allow => Verdict::Pass,
            Decision::Deny => {
                info!(client = %key.addr(), path = %request.path, "Rate limited request");
                Verdict::Reject(Rejection::new(DenialReason::RateLimited, self.message.clone()))
            }
        }
    }
}
