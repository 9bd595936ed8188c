// In-process lock store
// Same per-key atomicity as the Redis store; expired entries count as absent

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

use super::LockStore;
use crate::error::Result;

const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(1);

struct MemoryEntry {
    token: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn new(token: &str, ttl: Duration) -> Self {
        Self {
            token: token.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn is_live_with(&self, token: &str, now: Instant) -> bool {
        !self.is_expired(now) && self.token == token
    }
}

/// Lock store kept in process memory.
///
/// Only coordinates callers inside one process; useful for tests and
/// single-node deployments. Every primitive runs under the key's shard lock.
pub struct MemoryLockStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
    cleanup_handle: Option<tokio::task::JoinHandle<()>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            cleanup_handle: None,
        }
    }

    /// Start a background task that evicts expired entries every `interval`.
    ///
    /// Intervals below 1ms are raised to 1ms. Must be called inside a tokio
    /// runtime.
    pub fn with_cleanup(self, interval: Duration) -> Self {
        let entries = self.entries.clone();
        let interval = interval.max(MIN_CLEANUP_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let before = entries.len();
                entries.retain(|_, entry| !entry.is_expired(now));
                let evicted = before.saturating_sub(entries.len());
                if evicted > 0 {
                    debug!(count = evicted, "Evicted expired lock entries");
                }
            }
        });

        // Dropping `self` aborts any previous cleanup task
        Self {
            entries: self.entries.clone(),
            cleanup_handle: Some(handle),
        }
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryLockStore {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_set(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(MemoryEntry::new(token, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new(token, ttl));
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, entry| entry.is_live_with(token, now))
            .is_some())
    }

    async fn compare_and_extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key)
            && entry.is_live_with(token, now)
        {
            entry.expires_at = now + ttl;
            return Ok(true);
        }
        Ok(false)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at - now))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
