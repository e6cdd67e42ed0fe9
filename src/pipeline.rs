//! Ordered gate pipeline.
//!
//! Every request is first recorded by the [`RequestLogger`], then runs through
//! the gates in order. The first rejection ends the run; a request that passes
//! every gate is forwarded to the downstream handler.

use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::ChatGateConfig;
use crate::error::Result;
use crate::gate::{
    FanoutSink, FileSink, Gate, LogSink, RateGate, RateLimitScope, Rejection, RequestLogger,
    RoleGate, TimeGate, TracingSink, Verdict,
};
use crate::ratelimit::{ClientIdentifier, LimitPolicy, RateLimitStore, RateLimiter};
use crate::request::GateRequest;

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every gate passed; hand the request to the downstream handler.
    Forwarded,
    /// A gate turned the request away.
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Outcome::Forwarded)
    }
}

/// The logger plus an ordered list of gates.
#[derive(Debug)]
pub struct RequestPipeline {
    logger: RequestLogger,
    gates: Vec<Box<dyn Gate>>,
    clock: Arc<dyn Clock>,
}

impl RequestPipeline {
    /// A pipeline with no gates; every request is forwarded.
    pub fn new(logger: RequestLogger, clock: Arc<dyn Clock>) -> Self {
        Self {
            logger,
            gates: Vec::new(),
            clock,
        }
    }

    /// Append a gate after the existing ones.
    pub fn with_gate<G: Gate + 'static>(mut self, gate: G) -> Self {
        self.gates.push(Box::new(gate));
        self
    }

    /// The standard chain: time, rate limit, role.
    pub fn standard(
        config: &ChatGateConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        logger: RequestLogger,
    ) -> Self {
        let limiter = RateLimiter::with_policy(store, LimitPolicy::from(&config.rate_limiting));
        let rate_gate = RateGate::new(
            limiter,
            RateLimitScope::from(&config.rate_limiting),
            ClientIdentifier::new(),
        );

        Self::new(logger, clock)
            .with_gate(TimeGate::from(&config.access_hours))
            .with_gate(rate_gate)
            .with_gate(RoleGate::from(&config.roles))
    }

    /// Build the standard chain, logging to the console and the configured file.
    pub fn from_config(
        config: &ChatGateConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let sink: Box<dyn LogSink> = match &config.request_log.file {
            Some(path) => {
                info!(path = %path.display(), "Writing request log file");
                Box::new(FanoutSink::new(vec![
                    Box::new(TracingSink),
                    Box::new(FileSink::open(path)?),
                ]))
            }
            None => Box::new(TracingSink),
        };

        Ok(Self::standard(config, store, clock, RequestLogger::new(sink)))
    }

    /// Names of the gates in the order they run.
    pub fn gate_names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|g| g.name()).collect()
    }

    /// Run `request` through the logger and every gate.
    ///
    /// The clock is read once, so all stages see the same instant.
    pub async fn evaluate(&self, request: &GateRequest) -> Outcome {
        let now = self.clock.now();
        self.logger.observe(request, now);

        for gate in &self.gates {
            match gate.check(request, now).await {
                Verdict::Pass => {
                    debug!(gate = gate.name(), path = %request.path, "Gate passed");
                }
                Verdict::Reject(rejection) => {
                    info!(
                        gate = gate.name(),
                        method = %request.method,
                        path = %request.path,
                        reason = ?rejection.reason,
                        "Request rejected"
                    );
                    return Outcome::Rejected(rejection);
                }
            }
        }

        Outcome::Forwarded
    }
}
