//! Fixed window state for one client.

use chrono::{DateTime, Local};
use std::time::Duration;

use crate::error::{ChatGateError, Result};

/// Requests seen from one client in the current fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Requests counted in this window, denied ones included
    pub count: u64,
    /// When this window ends
    pub window_reset_at: DateTime<Local>,
}

impl WindowState {
    /// An empty window starting at `now`.
    pub fn fresh(now: DateTime<Local>, window: Duration) -> Result<Self> {
        Ok(Self {
            count: 0,
            window_reset_at: expiry_after(now, window)?,
        })
    }

    /// A window is over once `now` reaches its reset time.
    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        now >= self.window_reset_at
    }

    /// Count one more request on top of `previous`.
    ///
    /// A missing or expired window is replaced by a fresh one before counting,
    /// so the result always has `count >= 1`.
    pub fn record_hit(
        previous: Option<WindowState>,
        now: DateTime<Local>,
        window: Duration,
    ) -> Result<Self> {
        let mut state = match previous {
            Some(state) if !state.is_expired(now) => state,
            _ => Self::fresh(now, window)?,
        };
        state.count = state.count.saturating_add(1);
        Ok(state)
    }

    /// Time left until the window resets.
    pub fn duration_until_reset(&self, now: DateTime<Local>) -> Duration {
        (self.window_reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// `now + ttl`, or a store error when the result leaves chrono's range.
pub(crate) fn expiry_after(now: DateTime<Local>, ttl: Duration) -> Result<DateTime<Local>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| {
            ChatGateError::Store(format!(
                "window of {}s from {} is out of range",
                ttl.as_secs(),
                now
            ))
        })
}
