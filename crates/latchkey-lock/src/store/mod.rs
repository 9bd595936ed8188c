//! Lock store adapters
//!
//! A `LockStore` runs each lock primitive as one atomic round-trip against an
//! external key-value store. Implementations never retry; retry policy
//! belongs to the lock engine's callers.

mod memory;
mod redis;
mod scripts;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryLockStore;
pub use self::redis::{RedisConfig, RedisLockStore};

/// Primitive operations a distributed lock needs from its store
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create `key = token` with the given expiry only if `key` does not exist.
    ///
    /// Returns whether the key was created.
    async fn try_set(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if its value equals `token`.
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool>;

    /// Reset the expiry of `key` to `ttl` from now only if its value equals `token`.
    async fn compare_and_extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Whether `key` currently exists. The answer may be stale by the time it
    /// is read and must not be used as permission to act.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remaining time before `key` expires, `None` if absent or without expiry.
    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Round-trip health probe
    async fn ping(&self) -> Result<()>;
}

/// TTL in whole milliseconds, never below 1ms so sub-millisecond TTLs still expire
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().clamp(1, u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(5)), 5000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_millis(1500)), 1500);
    }
}
