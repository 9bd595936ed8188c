//! Lock data model
//!
//! Tokens, acquisition options, engine configuration and statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use latchkey_common::{DEFAULT_KEY_PREFIX, DEFAULT_RETRY_INTERVAL_MS, DEFAULT_TTL_MS};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LockError, Result};

/// Proof of ownership for one acquisition.
///
/// A new token is generated for every acquisition attempt, so a token never
/// identifies more than one holding of a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a fresh random token
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters for a single `acquire` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    /// How long the lock record lives in the store unless extended
    pub ttl: Duration,
    /// Maximum time to keep retrying (`None` or zero = single attempt)
    pub timeout: Option<Duration>,
    /// Delay between attempts while waiting
    pub retry_interval: Duration,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(DEFAULT_TTL_MS),
            timeout: None,
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        }
    }
}

impl AcquireOptions {
    /// Non-blocking options with the given TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Whether acquisition will wait for a held lock
    pub fn is_blocking(&self) -> bool {
        self.timeout.is_some_and(|t| !t.is_zero())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(LockError::InvalidArgument(
                "ttl must be greater than zero".to_string(),
            ));
        }
        if self.is_blocking() && self.retry_interval.is_zero() {
            return Err(LockError::InvalidArgument(
                "retry interval must be greater than zero when waiting".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a lock engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    /// Prefix prepended to resource names to form store keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// TTL used when callers do not pick one (default: 30000ms)
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Retry cadence used when callers do not pick one (default: 100ms)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_ttl_ms() -> u64 {
    DEFAULT_TTL_MS
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            default_ttl_ms: DEFAULT_TTL_MS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
        }
    }
}

impl LockConfig {
    pub fn new(key_prefix: impl Into<String>, default_ttl_ms: u64, retry_interval_ms: u64) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            default_ttl_ms,
            retry_interval_ms,
        }
    }

    /// Store key for a resource name
    pub fn key_for(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Non-blocking options built from the configured defaults
    pub fn default_options(&self) -> AcquireOptions {
        AcquireOptions {
            ttl: self.default_ttl(),
            timeout: None,
            retry_interval: self.retry_interval(),
        }
    }
}

/// Lock statistics for one engine instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    /// Successful acquisitions
    pub total_acquisitions: u64,
    /// Acquire calls that returned false (including timeouts)
    pub failed_acquisitions: u64,
    /// Blocking acquire calls that ran out of time
    pub acquire_timeouts: u64,
    /// Successful releases
    pub total_releases: u64,
    /// Successful extensions
    pub total_extensions: u64,
    /// Release/extend calls that found the token replaced or expired
    pub lost_locks: u64,
    /// Names this instance currently believes it holds
    pub held_locks: u64,
}

#[derive(Default)]
pub(crate) struct LockStatsCollector {
    pub total_acquisitions: AtomicU64,
    pub failed_acquisitions: AtomicU64,
    pub acquire_timeouts: AtomicU64,
    pub total_releases: AtomicU64,
    pub total_extensions: AtomicU64,
    pub lost_locks: AtomicU64,
}

impl LockStatsCollector {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, held_locks: u64) -> LockStats {
        LockStats {
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            failed_acquisitions: self.failed_acquisitions.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            total_releases: self.total_releases.load(Ordering::Relaxed),
            total_extensions: self.total_extensions.load(Ordering::Relaxed),
            lost_locks: self.lost_locks.load(Ordering::Relaxed),
            held_locks,
        }
    }
}
