//! Scoped lock acquisition
//!
//! `with_lock` runs a critical section and releases the lock on every exit
//! path: normal completion, an error returned by the body, a panic, or the
//! future being dropped mid-way. `LockGuard` is the RAII handle underneath.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::engine::DistributedLock;
use crate::error::Result;
use crate::model::AcquireOptions;

/// Handle to an acquired lock.
///
/// Prefer calling [`LockGuard::release`]. A guard dropped without it schedules
/// a best-effort release on the current tokio runtime; outside a runtime the
/// lock is left to expire after its TTL.
pub struct LockGuard {
    lock: Arc<dyn DistributedLock>,
    name: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    /// Acquire `name` and wrap it in a guard; `None` if it was not acquired
    pub async fn acquire(
        lock: Arc<dyn DistributedLock>,
        name: impl Into<String>,
        options: &AcquireOptions,
    ) -> Result<Option<Self>> {
        let name = name.into();
        if !lock.acquire(&name, options).await? {
            return Ok(None);
        }
        Ok(Some(Self {
            lock,
            name,
            released: false,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reset the lock's TTL; `false` means the lock is already lost
    pub async fn extend(&self, ttl: Duration) -> Result<bool> {
        self.lock.extend(&self.name, ttl).await
    }

    /// Release the lock; `false` means it had already been lost.
    ///
    /// If this future is dropped before the store answers, the guard falls
    /// back to the background release done on drop.
    pub async fn release(mut self) -> Result<bool> {
        let result = self.lock.release(&self.name).await;
        self.released = true;
        result
    }

    /// Release, logging instead of returning a lost lock or store error
    async fn release_quietly(self) {
        let name = self.name.clone();
        match self.release().await {
            Ok(true) => {}
            Ok(false) => {
                warn!(name = %name, "Lock expired before the scoped section finished")
            }
            Err(e) => warn!(name = %name, error = %e, "Failed to release scoped lock"),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let lock = self.lock.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(name = %name, "Lock guard dropped; releasing in background");
                handle.spawn(async move {
                    if let Err(e) = lock.release(&name).await {
                        warn!(name = %name, error = %e, "Background lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    name = %name,
                    "Lock guard dropped outside a runtime; lock will expire after its TTL"
                );
            }
        }
    }
}

/// Run `body` while holding `name`.
///
/// Returns `Ok(None)` without running `body` if the lock was not acquired.
/// Whatever `body` returns (including its own `Result`) is passed through
/// unchanged; a lost lock at release time is logged, never reported over it.
/// A panic inside `body` releases the lock and then resumes unwinding.
pub async fn with_lock<F, Fut, T>(
    lock: Arc<dyn DistributedLock>,
    name: &str,
    options: &AcquireOptions,
    body: F,
) -> Result<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let Some(guard) = LockGuard::acquire(lock, name, options).await? else {
        return Ok(None);
    };

    let outcome = AssertUnwindSafe(body()).catch_unwind().await;
    guard.release_quietly().await;

    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
