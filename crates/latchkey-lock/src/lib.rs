//! Latchkey Lock - store-backed distributed locking
//!
//! This crate provides:
//! - The `LockStore` adapter over an external key-value store (Redis, or an
//!   in-process memory store)
//! - The `DistributedLock` capability set and its store-backed engine `StoreLock`
//! - Scoped acquisition (`with_lock`, `LockGuard`) that releases on every exit path
//! - Background lock renewal (`AutoRenewal`)
//!
//! Ownership is enforced by the store: every acquisition writes a fresh random
//! token with `SET NX PX`, and release/extend run compare-then-act scripts
//! server-side so no client ever acts on a lock it no longer holds.
//!
//! There is no fencing token. A holder whose TTL lapsed while it was still
//! working can still write to the protected resource; long critical sections
//! must extend (or use `AutoRenewal`) well before the TTL elapses.

mod engine;
mod error;
mod guard;
mod metrics;
mod model;
mod renewal;
pub mod store;

pub use engine::{DistributedLock, StoreLock};
pub use error::{LockError, Result};
pub use guard::{LockGuard, with_lock};
pub use crate::metrics::describe_lock_metrics;
pub use model::{AcquireOptions, LockConfig, LockStats, LockToken};
pub use renewal::AutoRenewal;
pub use store::{LockStore, MemoryLockStore, RedisConfig, RedisLockStore};
