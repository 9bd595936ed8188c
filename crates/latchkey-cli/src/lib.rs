//! Latchkey CLI - run commands under a distributed lock
//!
//! Configuration loading, logging setup, signal handling and the
//! `ping` / `status` / `exec` subcommands of the `latchkey` binary.

pub mod command;
pub mod config;
pub mod startup;

use std::sync::Arc;

use latchkey_common::EXIT_STORE_UNAVAILABLE;
use latchkey_lock::{LockError, RedisLockStore, StoreLock, describe_lock_metrics};
use tracing::info;

pub use config::{Cli, Command, Configuration};

/// Load configuration, connect to the store and run the parsed subcommand.
///
/// Returns the process exit code.
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let configuration = Configuration::new(&cli)?;
    let _logging_guard = startup::init_logging(&configuration.logging_config()?)?;
    describe_lock_metrics();

    let redis_config = configuration.redis_config()?;
    let lock_config = configuration.lock_config()?;
    info!(
        redis = %redis_config.display_addr(),
        key_prefix = %lock_config.key_prefix,
        "Starting latchkey"
    );

    let store = RedisLockStore::connect(&redis_config).await?;
    let lock = Arc::new(StoreLock::new(Arc::new(store), lock_config));
    let shutdown = startup::listen_for_shutdown();

    command::execute(lock, cli.command, &shutdown).await
}

/// Exit code for an error that escaped `run`
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<LockError>() {
        Some(e) if e.is_store_unavailable() => EXIT_STORE_UNAVAILABLE,
        _ => 1,
    }
}
