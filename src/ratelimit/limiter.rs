//! Fixed window rate limiter.

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::key::ClientKey;
use super::store::RateLimitStore;
use crate::config::{FailurePolicy, RateLimitingConfig};

/// Default number of requests admitted per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 5;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Limits applied to every client.
#[derive(Debug, Clone, Copy)]
pub struct LimitPolicy {
    /// Maximum requests admitted in one window
    pub max_requests: u64,
    /// Length of the window
    pub window: Duration,
    /// Decision when the store fails
    pub on_store_error: FailurePolicy,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
            on_store_error: FailurePolicy::Open,
        }
    }
}

impl From<&RateLimitingConfig> for LimitPolicy {
    fn from(config: &RateLimitingConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window(),
            on_store_error: config.on_store_error,
        }
    }
}

/// Snapshot of a client's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Requests counted so far in the window
    pub count: u64,
    /// Requests still admitted before the window resets
    pub remaining: u64,
    /// When the window resets, `None` if the client has no live window
    pub reset_at: Option<DateTime<Local>>,
}

/// Per-client fixed window counter over a shared [`RateLimitStore`].
///
/// Windows are aligned to each client's first request, so a burst straddling
/// a boundary can be admitted up to twice the limit.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: LimitPolicy,
}

impl RateLimiter {
    /// Create a rate limiter over `store` with the default policy.
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self::with_policy(store, LimitPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn RateLimitStore>, policy: LimitPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// Count a request from `key` and decide whether it may proceed.
    ///
    /// Denied requests are counted too, so excess traffic is not forgiven
    /// before the window ends.
    pub async fn admit(&self, key: &ClientKey, now: DateTime<Local>) -> Decision {
        trace!(key = %key, "Checking rate limit");

        let state = match self.store.hit(key, now, self.policy.window).await {
            Ok(state) => state,
            Err(e) => {
                let decision = match self.policy.on_store_error {
                    FailurePolicy::Open => Decision::Allow,
                    FailurePolicy::Closed => Decision::Deny,
                };
                warn!(
                    key = %key,
                    error = %e,
                    decision = ?decision,
                    "Rate limit store unavailable"
                );
                return decision;
            }
        };

        if state.count > self.policy.max_requests {
            debug!(
                key = %key,
                count = state.count,
                limit = self.policy.max_requests,
                reset_at = %state.window_reset_at,
                "Rate limit exceeded"
            );
            Decision::Deny
        } else {
            Decision::Allow
        }
    }

    /// Inspect a client's window without counting a request.
    pub async fn status(&self, key: &ClientKey, now: DateTime<Local>) -> crate::error::Result<RateLimitStatus> {
        let state = self
            .store
            .get(key)
            .await?
            .filter(|state| !state.is_expired(now));

        let count = state.map_or(0, |s| s.count);
        Ok(RateLimitStatus {
            count,
            remaining: self.policy.max_requests.saturating_sub(count),
            reset_at: state.map(|s| s.window_reset_at),
        })
    }
}
