//! Time sources for the gates.

use chrono::{DateTime, Duration, Local};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

/// Source of the current local time.
///
/// Every gate reads time through this trait so tests can pin or advance it.
pub trait Clock: Send + Sync + Debug {
    /// Get the current local time.
    fn now(&self) -> DateTime<Local>;
}

/// Wall clock of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give
/// another to the pipeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Local>>>,
}

impl ManualClock {
    /// Create a clock pinned at `start`.
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += by;
    }

    /// Jump to a specific time.
    pub fn set(&self, to: DateTime<Local>) {
        *self.current.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.current.lock()
    }
}
