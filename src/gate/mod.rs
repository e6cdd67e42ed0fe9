//! Request gates.
//!
//! A gate looks at one request and either lets it through or rejects it with
//! a human readable message. Gates never fail: backend trouble is turned into
//! a verdict inside the gate.

mod audit;
mod rate;
mod role;
mod time;

pub use audit::{FanoutSink, FileSink, LogSink, MemorySink, RequestLogger, TracingSink};
pub use rate::{RateGate, RateLimitScope};
pub use role::RoleGate;
pub use time::TimeGate;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt::Debug;

use crate::request::GateRequest;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// Outside opening hours
    Closed,
    /// Client exceeded its request quota
    RateLimited,
    /// Path needs a privileged user
    RoleRequired,
}

/// A rejection to send back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: DenialReason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: DenialReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Result of running one gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// One stage of the request pipeline.
#[async_trait]
pub trait Gate: Send + Sync + Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Decide on `request`, using `now` as the current time.
    async fn check(&self, request: &GateRequest, now: DateTime<Local>) -> Verdict;
}
