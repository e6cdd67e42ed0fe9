//! Storage for per-client window state.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::key::ClientKey;
use super::window::{expiry_after, WindowState};
use crate::clock::Clock;
use crate::error::Result;

/// Key-value store of window state with per-entry expiry.
///
/// Implementations may sit in process or in front of an external cache; the
/// latter report connectivity problems as [`crate::error::ChatGateError::Store`].
#[async_trait]
pub trait RateLimitStore: Send + Sync + Debug {
    /// Current state for `key`, or `None` if unknown or past its time-to-live.
    async fn get(&self, key: &ClientKey) -> Result<Option<WindowState>>;

    /// Install `state` for `key`, valid for at most `ttl`.
    async fn put(&self, key: &ClientKey, state: WindowState, ttl: Duration) -> Result<()>;

    /// Drop the entry for `key`.
    async fn remove(&self, key: &ClientKey) -> Result<()>;

    /// Count one request for `key` and return the resulting state.
    ///
    /// The default is a plain `get` then `put`: two concurrent callers for the
    /// same key may both read the old count and one increment is lost. Stores
    /// with an atomic read-modify-write should override this.
    async fn hit(&self, key: &ClientKey, now: DateTime<Local>, window: Duration) -> Result<WindowState> {
        let previous = self.get(key).await?;
        let state = WindowState::record_hit(previous, now, window)?;
        self.put(key, state, window).await?;
        Ok(state)
    }

    /// Number of stored entries, including expired ones not yet evicted.
    async fn len(&self) -> Result<usize>;

    /// Evict entries whose time-to-live has passed. Returns how many were evicted.
    async fn sweep(&self, _now: DateTime<Local>) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct StoredEntry {
    state: WindowState,
    expires_at: DateTime<Local>,
}

impl StoredEntry {
    fn new(state: WindowState, now: DateTime<Local>, ttl: Duration) -> Result<Self> {
        Ok(Self {
            state,
            expires_at: expiry_after(now, ttl)?,
        })
    }

    fn live_state(&self, now: DateTime<Local>) -> Option<WindowState> {
        (now < self.expires_at).then_some(self.state)
    }
}

/// In-process store backed by a sharded [`DashMap`].
///
/// Each key lives in one shard, so clients only contend when they hash to the
/// same shard and never on a store-wide lock. [`RateLimitStore::hit`] runs the
/// whole read-modify-write while holding the shard lock.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: DashMap<ClientKey, StoredEntry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Create an empty store; `clock` drives time-to-live expiry on `get`/`put`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn get(&self, key: &ClientKey) -> Result<Option<WindowState>> {
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(key) {
            if let Some(state) = entry.live_state(now) {
                return Ok(Some(state));
            }
        }

        if self.entries.remove_if(key, |_, e| e.live_state(now).is_none()).is_some() {
            trace!(key = %key, "Expired rate limit entry on read");
        }
        Ok(None)
    }

    async fn put(&self, key: &ClientKey, state: WindowState, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        self.entries.insert(key.clone(), StoredEntry::new(state, now, ttl)?);
        Ok(())
    }

    async fn remove(&self, key: &ClientKey) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn hit(&self, key: &ClientKey, now: DateTime<Local>, window: Duration) -> Result<WindowState> {
        let state = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.get().live_state(now);
                let state = WindowState::record_hit(previous, now, window)?;
                occupied.insert(StoredEntry::new(state, now, window)?);
                state
            }
            Entry::Vacant(vacant) => {
                debug!(key = %key, "Creating new rate limit window");
                let state = WindowState::record_hit(None, now, window)?;
                vacant.insert(StoredEntry::new(state, now, window)?);
                state
            }
        };
        Ok(state)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }

    async fn sweep(&self, now: DateTime<Local>) -> Result<usize> {
        let mut evicted = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.live_state(now).is_some();
            if !keep {
                evicted += 1;
            }
            keep
        });
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "Swept expired rate limit entries");
        }
        Ok(evicted)
    }
}
