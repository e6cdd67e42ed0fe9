//! Opening hours gate.

use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike};

use super::{DenialReason, Gate, Rejection, Verdict};
use crate::config::AccessHoursConfig;
use crate::request::GateRequest;

const CLOSED_MESSAGE: &str = "Chat is closed. Please come back during allowed hours.";

/// Admits requests only while the local hour is in `[start_hour, end_hour)`.
#[derive(Debug, Clone)]
pub struct TimeGate {
    start_hour: u32,
    end_hour: u32,
}

impl TimeGate {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn allow<T: Timelike>(&self, now: &T) -> bool {
        (self.start_hour..self.end_hour).contains(&now.hour())
    }
}

impl Default for TimeGate {
    fn default() -> Self {
        Self::from(&AccessHoursConfig::default())
    }
}

impl From<&AccessHoursConfig> for TimeGate {
    fn from(config: &AccessHoursConfig) -> Self {
        Self::new(config.start_hour, config.end_hour)
    }
}

#[async_trait]
impl Gate for TimeGate {
    fn name(&self) -> &'static str {
        "time"
    }

    async fn check(&self, _request: &GateRequest, now: DateTime<Local>) -> Verdict {
        if self.allow(&now) {
            Verdict::Pass
        } else {
            Verdict::Reject(Rejection::new(DenialReason::Closed, CLOSED_MESSAGE))
        }
    }
}
