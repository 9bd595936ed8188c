// Background lock renewal
// Extends a held lock periodically until stopped or until ownership is lost

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::engine::DistributedLock;

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(1);

/// Keeps a lock alive by extending it every `ttl / 3`.
///
/// Stop the renewal before releasing the lock; a renewal that fires after the
/// release sees `NotHeld` and reports the lock as lost.
pub struct AutoRenewal {
    name: String,
    interval: Duration,
    stop_tx: mpsc::Sender<()>,
    lost_rx: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

impl AutoRenewal {
    /// Start renewing `name` with `ttl`, at a third of the TTL.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(lock: Arc<dyn DistributedLock>, name: impl Into<String>, ttl: Duration) -> Self {
        Self::with_interval(lock, name, ttl, ttl / 3)
    }

    /// Start renewing `name` with `ttl` every `interval`
    pub fn with_interval(
        lock: Arc<dyn DistributedLock>,
        name: impl Into<String>,
        ttl: Duration,
        interval: Duration,
    ) -> Self {
        let name = name.into();
        let interval = interval.max(MIN_RENEW_INTERVAL);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let (lost_tx, lost_rx) = watch::channel(false);

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => {
                        debug!(name = %task_name, "Lock renewal stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match lock.extend(&task_name, ttl).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!(name = %task_name, "Lock renewal failed: ownership lost");
                                let _ = lost_tx.send(true);
                                break;
                            }
                            Err(e) => {
                                error!(name = %task_name, error = %e, "Lock renewal error");
                                let _ = lost_tx.send(true);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            name,
            interval,
            stop_tx,
            lost_rx,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a renewal has failed
    pub fn is_lost(&self) -> bool {
        *self.lost_rx.borrow()
    }

    /// Resolves once the lock is lost (`true`), or once renewal ends without
    /// losing it (`false`)
    pub async fn lost(&self) -> bool {
        let mut rx = self.lost_rx.clone();
        rx.wait_for(|lost| *lost).await.is_ok()
    }

    /// Stop renewing; the lock itself stays held until released or expired
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Stop renewing and wait for an in-flight extension to finish.
    ///
    /// Returns whether the lock was lost. Call this before releasing the lock.
    pub async fn shutdown(&mut self) -> bool {
        self.stop();
        if !self.handle.is_finished()
            && let Err(e) = (&mut self.handle).await
        {
            error!(name = %self.name, error = %e, "Lock renewal task failed");
        }
        self.is_lost()
    }

    /// Whether the renewal task has ended
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for AutoRenewal {
    fn drop(&mut self) {
        self.stop();
    }
}
