//! Latchkey Common - Shared types, constants, and utilities
//!
//! This crate provides the foundational pieces used across all Latchkey components:
//! - Application error type
//! - Duration parsing and formatting helpers
//! - Common constants (defaults shared by the lock engine and the CLI)

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::LatchkeyError;
pub use utils::{format_duration, parse_duration};

/// Default prefix prepended to every resource name to form its store key
pub const DEFAULT_KEY_PREFIX: &str = "lock:";

/// Default lock time-to-live in milliseconds
pub const DEFAULT_TTL_MS: u64 = 30_000;

/// Default interval between acquisition attempts while waiting, in milliseconds
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 100;

/// Default bound on a single store round-trip, in milliseconds
pub const DEFAULT_OP_TIMEOUT_MS: u64 = 3_000;

/// Default timeout for establishing the store connection, in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default Redis port
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Exit code used when a lock could not be acquired (sysexits EX_TEMPFAIL)
pub const EXIT_LOCK_NOT_ACQUIRED: i32 = 75;

/// Exit code used when the lock store could not be reached (sysexits EX_UNAVAILABLE)
pub const EXIT_STORE_UNAVAILABLE: i32 = 69;

/// Exit code used when the run was interrupted by Ctrl+C or SIGTERM
pub const EXIT_INTERRUPTED: i32 = 130;
