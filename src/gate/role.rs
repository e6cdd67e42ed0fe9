//! Role-based authorization gate.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tracing::debug;

use super::{DenialReason, Gate, Rejection, Verdict};
use crate::config::RoleConfig;
use crate::request::{GateRequest, Identity};

const ROLE_REQUIRED_MESSAGE: &str = "Forbidden: admin/moderator role required.";

/// Restricts protected path prefixes to elevated users or members of a
/// privileged group. Everything else passes.
#[derive(Debug, Clone)]
pub struct RoleGate {
    protected_prefixes: Vec<String>,
    privileged_groups: Vec<String>,
}

impl RoleGate {
    pub fn new(protected_prefixes: Vec<String>, privileged_groups: Vec<String>) -> Self {
        Self {
            protected_prefixes,
            privileged_groups,
        }
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// A missing or unauthenticated identity never reaches a protected path.
    pub fn allow(&self, identity: Option<&Identity>, path: &str) -> bool {
        if !self.is_protected(path) {
            return true;
        }

        match identity {
            Some(id) if id.is_authenticated => {
                id.is_elevated || id.in_any_group(self.privileged_groups.as_slice())
            }
            _ => false,
        }
    }
}

impl Default for RoleGate {
    fn default() -> Self {
        Self::from(&RoleConfig::default())
    }
}

impl From<&RoleConfig> for RoleGate {
    fn from(config: &RoleConfig) -> Self {
        Self::new(
            config.protected_prefixes.clone(),
            config.privileged_groups.clone(),
        )
    }
}

#[async_trait]
impl Gate for RoleGate {
    fn name(&self) -> &'static str {
        "role"
    }

    async fn check(&self, request: &GateRequest, _now: DateTime<Local>) -> Verdict {
        if self.allow(request.identity.as_ref(), &request.path) {
            return Verdict::Pass;
        }

        debug!(
            path = %request.path,
            user = %request.username(),
            "Privileged role required"
        );
        Verdict::Reject(Rejection::new(
            DenialReason::RoleRequired,
            ROLE_REQUIRED_MESSAGE,
        ))
    }
}
