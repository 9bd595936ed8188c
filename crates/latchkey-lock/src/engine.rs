//! Distributed lock engine
//!
//! `StoreLock` issues tokens, polls for contended locks, and performs
//! ownership-checked release and extension through a `LockStore`.
//! Correctness is enforced by the store; the local ownership table only
//! remembers which token this instance used for each name.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{LockError, Result};
use crate::metrics as lock_metrics;
use crate::model::{AcquireOptions, LockConfig, LockStats, LockStatsCollector, LockToken};
use crate::store::LockStore;

/// Capability set of a distributed lock
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to take the lock on `name`.
    ///
    /// Returns `false` when the lock is held elsewhere and `options` has no
    /// timeout, or when the timeout ran out before an attempt succeeded.
    async fn acquire(&self, name: &str, options: &AcquireOptions) -> Result<bool>;

    /// Release a lock previously acquired through this instance.
    ///
    /// Returns `false` if the lock had already expired (and may now belong to
    /// someone else). Fails with `NotHeld` if this instance never acquired it.
    async fn release(&self, name: &str) -> Result<bool>;

    /// Reset the lock's TTL to `ttl` from now.
    ///
    /// Returns `false` if ownership was already lost; the caller should abandon
    /// its critical section. Fails with `NotHeld` if this instance never acquired it.
    async fn extend(&self, name: &str, ttl: Duration) -> Result<bool>;

    /// Whether anyone currently holds `name`.
    ///
    /// Advisory only: the answer can change before the caller acts on it.
    async fn is_locked(&self, name: &str) -> Result<bool>;
}

/// Lock engine backed by a `LockStore`
pub struct StoreLock {
    store: Arc<dyn LockStore>,
    config: LockConfig,
    /// name -> token of the acquisition this instance believes it holds
    held: DashMap<String, LockToken>,
    stats: LockStatsCollector,
}

impl StoreLock {
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        Self {
            store,
            config,
            held: DashMap::new(),
            stats: LockStatsCollector::default(),
        }
    }

    pub fn with_defaults(store: Arc<dyn LockStore>) -> Self {
        Self::new(store, LockConfig::default())
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Whether this instance has a local record for `name`.
    ///
    /// The record may be stale if the TTL lapsed.
    pub fn holds(&self, name: &str) -> bool {
        self.held.contains_key(name)
    }

    /// Token of the current local record for `name`
    pub fn token(&self, name: &str) -> Option<LockToken> {
        self.held.get(name).map(|t| t.value().clone())
    }

    /// Names with a local record, in no particular order
    pub fn held_names(&self) -> Vec<String> {
        self.held.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stats(&self) -> LockStats {
        self.stats.snapshot(self.held.len() as u64)
    }

    /// Remaining TTL of the lock record for `name`, if it exists
    pub async fn remaining_ttl(&self, name: &str) -> Result<Option<Duration>> {
        validate_name(name)?;
        self.store.remaining_ttl(&self.config.key_for(name)).await
    }

    /// Store health probe
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    /// `acquire`, abandoned as soon as `cancel` resolves.
    ///
    /// Returns `false` on cancellation, without any attempt when `cancel` has
    /// already resolved. An attempt already in flight when the signal fires
    /// may still have taken the lock; that record then expires after its TTL.
    pub async fn acquire_until<F>(
        &self,
        name: &str,
        options: &AcquireOptions,
        cancel: F,
    ) -> Result<bool>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                debug!(name = %name, "Lock acquisition cancelled");
                Ok(false)
            }
            result = self.acquire(name, options) => result,
        }
    }

    async fn try_acquire_once(&self, name: &str, key: &str, ttl: Duration) -> Result<bool> {
        let token = LockToken::generate();
        if !self.store.try_set(key, token.as_str(), ttl).await? {
            return Ok(false);
        }

        if self.held.insert(name.to_string(), token).is_none() {
            lock_metrics::held_increment();
        }
        LockStatsCollector::incr(&self.stats.total_acquisitions);
        lock_metrics::record_acquire("acquired");
        Ok(true)
    }

    /// Drop the local record for `name` if it still holds `token`
    fn forget(&self, name: &str, token: &LockToken) {
        if self.held.remove_if(name, |_, held| held == token).is_some() {
            lock_metrics::held_decrement();
        }
    }

    fn local_token(&self, name: &str) -> Result<LockToken> {
        self.token(name)
            .ok_or_else(|| LockError::NotHeld(name.to_string()))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LockError::InvalidArgument(
            "lock name must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl DistributedLock for StoreLock {
    async fn acquire(&self, name: &str, options: &AcquireOptions) -> Result<bool> {
        validate_name(name)?;
        options.validate()?;

        let key = self.config.key_for(name);
        let started = Instant::now();
        let deadline = options
            .timeout
            .filter(|t| !t.is_zero())
            .map(|t| started + t);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            // Every attempt carries a fresh token
            if self.try_acquire_once(name, &key, options.ttl).await? {
                debug!(
                    name = %name,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Lock acquired"
                );
                return Ok(true);
            }

            let Some(deadline) = deadline else {
                LockStatsCollector::incr(&self.stats.failed_acquisitions);
                lock_metrics::record_acquire("busy");
                debug!(name = %name, "Lock is held elsewhere");
                return Ok(false);
            };

            let now = Instant::now();
            if now >= deadline {
                LockStatsCollector::incr(&self.stats.failed_acquisitions);
                LockStatsCollector::incr(&self.stats.acquire_timeouts);
                lock_metrics::record_acquire("timeout");
                debug!(name = %name, attempts, "Lock acquisition timed out");
                return Ok(false);
            }

            tokio::time::sleep(options.retry_interval.min(deadline - now)).await;
        }
    }

    async fn release(&self, name: &str) -> Result<bool> {
        let token = self.local_token(name)?;
        let key = self.config.key_for(name);

        // On store errors the record is kept so the caller can retry the release
        let released = self.store.compare_and_delete(&key, token.as_str()).await?;
        self.forget(name, &token);

        if released {
            LockStatsCollector::incr(&self.stats.total_releases);
            lock_metrics::record_release("released");
            debug!(name = %name, "Lock released");
        } else {
            LockStatsCollector::incr(&self.stats.lost_locks);
            lock_metrics::record_release("lost");
            warn!(name = %name, "Lock was lost before release (expired or taken over)");
        }
        Ok(released)
    }

    async fn extend(&self, name: &str, ttl: Duration) -> Result<bool> {
        let token = self.local_token(name)?;
        if ttl.is_zero() {
            return Err(LockError::InvalidArgument(
                "ttl must be greater than zero".to_string(),
            ));
        }
        let key = self.config.key_for(name);

        let extended = self
            .store
            .compare_and_extend(&key, token.as_str(), ttl)
            .await?;

        if extended {
            LockStatsCollector::incr(&self.stats.total_extensions);
            lock_metrics::record_extend("extended");
            debug!(name = %name, ttl_ms = ttl.as_millis() as u64, "Lock extended");
        } else {
            self.forget(name, &token);
            LockStatsCollector::incr(&self.stats.lost_locks);
            lock_metrics::record_extend("lost");
            warn!(name = %name, "Lock was lost before extend (expired or taken over)");
        }
        Ok(extended)
    }

    async fn is_locked(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        self.store.exists(&self.config.key_for(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLockStore;

    /// Store whose every operation fails as if the server were down
    struct UnreachableStore;

    #[async_trait]
    impl LockStore for UnreachableStore {
        async fn try_set(&self, _key: &str, _token: &str, _ttl: Duration) -> Result<bool> {
            Err(LockError::StoreUnavailable("connection refused".to_string()))
        }

        async fn compare_and_delete(&self, _key: &str, _token: &str) -> Result<bool> {
            Err(LockError::StoreUnavailable("connection refused".to_string()))
        }

        async fn compare_and_extend(&self, _key: &str, _token: &str, _ttl: Duration) -> Result<bool> {
            Err(LockError::StoreUnavailable("connection refused".to_string()))
        }

        async fn exists(&self, _key: &str) -> Result<bool> {
            Err(LockError::StoreUnavailable("connection refused".to_string()))
        }

        async fn remaining_ttl(&self, _key: &str) -> Result<Option<Duration>> {
            Err(LockError::StoreUnavailable("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<()> {
            Err(LockError::StoreUnavailable("connection refused".to_string()))
        }
    }

    fn ttl_opts(ms: u64) -> AcquireOptions {
        AcquireOptions::new(Duration::from_millis(ms))
    }

    fn memory_lock(store: &Arc<MemoryLockStore>) -> StoreLock {
        StoreLock::with_defaults(store.clone())
    }

    #[tokio::test]
    async fn test_acquire_records_token_under_prefixed_key() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = memory_lock(&store);

        assert!(lock.acquire("orders", &ttl_opts(5000)).await.unwrap());
        assert!(lock.holds("orders"));
        assert!(store.exists("lock:orders").await.unwrap());
        assert!(!store.exists("orders").await.unwrap());
        assert_eq!(lock.held_names(), vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_acquire_is_not_reentrant() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = memory_lock(&store);

        assert!(lock.acquire("orders", &ttl_opts(5000)).await.unwrap());
        let first = lock.token("orders").unwrap();

        assert!(!lock.acquire("orders", &ttl_opts(5000)).await.unwrap());
        // The failed attempt must not disturb the existing record
        assert_eq!(lock.token("orders").unwrap(), first);
        assert!(lock.release("orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_reacquire_uses_new_token() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = memory_lock(&store);

        assert!(lock.acquire("orders", &ttl_opts(5000)).await.unwrap());
        let first = lock.token("orders").unwrap();
        assert!(lock.release("orders").await.unwrap());

        assert!(lock.acquire("orders", &ttl_opts(5000)).await.unwrap());
        assert_ne!(lock.token("orders").unwrap(), first);
    }

    #[tokio::test]
    async fn test_release_without_acquire_is_not_held() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = memory_lock(&store);

        let err = lock.release("never").await.unwrap_err();
        assert!(matches!(err, LockError::NotHeld(ref n) if n == "never"));

        let err = lock.extend("never", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, LockError::NotHeld(_)));
    }

    #[tokio::test]
    async fn test_release_after_takeover_reports_lost() {
        let store = Arc::new(MemoryLockStore::new());
        let a = memory_lock(&store);
        let b = memory_lock(&store);

        assert!(a.acquire("job", &ttl_opts(5000)).await.unwrap());
        // Simulate expiry followed by another holder taking over
        let key = a.config().key_for("job");
        let token = a.token("job").unwrap();
        assert!(store.compare_and_delete(&key, token.as_str()).await.unwrap());
        assert!(b.acquire("job", &ttl_opts(5000)).await.unwrap());

        assert!(!a.release("job").await.unwrap());
        assert!(!a.holds("job"));
        // b's record is untouched
        assert!(a.is_locked("job").await.unwrap());
        assert!(b.release("job").await.unwrap());

        let stats = a.stats();
        assert_eq!(stats.lost_locks, 1);
        assert_eq!(stats.total_releases, 0);
        assert_eq!(stats.held_locks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_keeps_lock_alive() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = memory_lock(&store);

        assert!(lock.acquire("job", &ttl_opts(100)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(lock.extend("job", Duration::from_millis(100)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;

        // 120ms after acquire, still alive thanks to the extension
        assert!(lock.is_locked("job").await.unwrap());
        assert!(lock.release("job").await.unwrap());
        assert_eq!(lock.stats().total_extensions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_extend_clears_local_record() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = memory_lock(&store);

        assert!(lock.acquire("job", &ttl_opts(50)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(!lock.extend("job", Duration::from_secs(1)).await.unwrap());
        assert!(!lock.holds("job"));
        assert!(matches!(
            lock.release("job").await,
            Err(LockError::NotHeld(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = memory_lock(&store);

        assert!(matches!(
            lock.acquire("", &ttl_opts(1000)).await,
            Err(LockError::InvalidArgument(_))
        ));
        assert!(matches!(
            lock.acquire("x", &AcquireOptions::new(Duration::ZERO)).await,
            Err(LockError::InvalidArgument(_))
        ));
        assert!(matches!(
            lock.is_locked("").await,
            Err(LockError::InvalidArgument(_))
        ));

        assert!(lock.acquire("x", &ttl_opts(1000)).await.unwrap());
        assert!(matches!(
            lock.extend("x", Duration::ZERO).await,
            Err(LockError::InvalidArgument(_))
        ));
        assert!(lock.holds("x"));
    }

    #[tokio::test]
    async fn test_store_unavailable_propagates() {
        let lock = StoreLock::with_defaults(Arc::new(UnreachableStore));

        let err = lock.acquire("x", &ttl_opts(1000)).await.unwrap_err();
        assert!(err.is_store_unavailable());
        assert!(!lock.holds("x"));

        assert!(lock.is_locked("x").await.unwrap_err().is_store_unavailable());
        assert!(lock.ping().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_unavailable_aborts_wait() {
        let lock = StoreLock::with_defaults(Arc::new(UnreachableStore));
        let opts = ttl_opts(1000).with_timeout(Duration::from_secs(10));

        let started = Instant::now();
        let err = lock.acquire("x", &opts).await.unwrap_err();
        assert!(err.is_store_unavailable());
        assert!(started.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_counts() {
        let store = Arc::new(MemoryLockStore::new());
        let holder = memory_lock(&store);
        let waiter = memory_lock(&store);

        assert!(holder.acquire("x", &ttl_opts(60_000)).await.unwrap());

        let opts = ttl_opts(1000)
            .with_timeout(Duration::from_millis(250))
            .with_retry_interval(Duration::from_millis(100));
        let started = Instant::now();
        assert!(!waiter.acquire("x", &opts).await.unwrap());

        // Attempts at 0, 100, 200 and a final one clipped to the 250ms deadline
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(250));
        assert!(elapsed < Duration::from_millis(260));
        let stats = waiter.stats();
        assert_eq!(stats.acquire_timeouts, 1);
        assert_eq!(stats.failed_acquisitions, 1);
        assert_eq!(stats.total_acquisitions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_until_cancelled() {
        let store = Arc::new(MemoryLockStore::new());
        let holder = memory_lock(&store);
        let waiter = memory_lock(&store);

        assert!(holder.acquire("x", &ttl_opts(60_000)).await.unwrap());

        let opts = ttl_opts(1000).with_timeout(Duration::from_secs(30));
        let started = Instant::now();
        let acquired = waiter
            .acquire_until("x", &opts, tokio::time::sleep(Duration::from_millis(350)))
            .await
            .unwrap();

        assert!(!acquired);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!waiter.holds("x"));
    }

    #[tokio::test]
    async fn test_acquire_until_already_cancelled_takes_nothing() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = memory_lock(&store);

        let opts = ttl_opts(1000).with_timeout(Duration::from_secs(5));
        let acquired = lock
            .acquire_until("x", &opts, std::future::ready(()))
            .await
            .unwrap();

        assert!(!acquired);
        assert!(!lock.holds("x"));
        assert!(!store.exists("lock:x").await.unwrap());
    }

    #[tokio::test]
    async fn test_remaining_ttl() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = memory_lock(&store);

        assert_eq!(lock.remaining_ttl("x").await.unwrap(), None);
        assert!(lock.acquire("x", &ttl_opts(10_000)).await.unwrap());
        let remaining = lock.remaining_ttl("x").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining > Duration::from_secs(9));
    }
}
