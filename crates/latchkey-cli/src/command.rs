//! `latchkey` subcommands

use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use latchkey_common::{
    EXIT_INTERRUPTED, EXIT_LOCK_NOT_ACQUIRED, LatchkeyError, format_duration, parse_duration,
};
use latchkey_lock::{AcquireOptions, AutoRenewal, DistributedLock, LockConfig, StoreLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Command;
use crate::startup::ShutdownSignal;

/// Result of `latchkey status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    pub name: String,
    pub key: String,
    pub locked: bool,
    /// Remaining TTL; absent when unlocked or when the record has no expiry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.locked, self.ttl_ms) {
            (false, _) => write!(f, "{}: free", self.name),
            (true, Some(ms)) => write!(
                f,
                "{}: locked (expires in {})",
                self.name,
                format_duration(Duration::from_millis(ms))
            ),
            (true, None) => write!(f, "{}: locked (no expiry)", self.name),
        }
    }
}

/// Run one parsed subcommand against `lock`; returns the process exit code
pub async fn execute(
    lock: Arc<StoreLock>,
    command: Command,
    shutdown: &ShutdownSignal,
) -> anyhow::Result<i32> {
    match command {
        Command::Ping => {
            lock.ping().await?;
            println!("PONG");
            Ok(0)
        }
        Command::Status { name, json } => {
            let status = lock_status(&lock, &name).await?;
            if json {
                println!("{}", serde_json::to_string(&status)?);
            } else {
                println!("{}", status);
            }
            Ok(0)
        }
        Command::Exec {
            name,
            ttl,
            wait,
            retry_interval,
            command,
        } => {
            let options = exec_options(
                lock.config(),
                ttl.as_deref(),
                wait.as_deref(),
                retry_interval.as_deref(),
            )?;
            exec(lock, &name, &options, &command, shutdown).await
        }
    }
}

pub async fn lock_status(lock: &StoreLock, name: &str) -> anyhow::Result<LockStatus> {
    let locked = lock.is_locked(name).await?;
    let ttl_ms = if locked {
        lock.remaining_ttl(name)
            .await?
            .map(|ttl| ttl.as_millis() as u64)
    } else {
        None
    };

    Ok(LockStatus {
        name: name.to_string(),
        key: lock.config().key_for(name),
        locked,
        ttl_ms,
    })
}

/// Acquire options for `exec`; flags fall back to the configured defaults
pub fn exec_options(
    config: &LockConfig,
    ttl: Option<&str>,
    wait: Option<&str>,
    retry_interval: Option<&str>,
) -> Result<AcquireOptions, LatchkeyError> {
    let ttl = match ttl {
        Some(v) => parse_duration(v)?,
        None => config.default_ttl(),
    };
    let retry_interval = match retry_interval {
        Some(v) => parse_duration(v)?,
        None => config.retry_interval(),
    };

    let mut options = AcquireOptions::new(ttl).with_retry_interval(retry_interval);
    if let Some(v) = wait {
        options = options.with_timeout(parse_duration(v)?);
    }
    Ok(options)
}

/// Run `command` while holding `name`, renewing the lock in the background.
///
/// Returns the child's exit code, `EXIT_LOCK_NOT_ACQUIRED` when the lock was
/// busy or lost mid-run (the child is killed), and `EXIT_INTERRUPTED` on
/// Ctrl+C/SIGTERM.
pub async fn exec(
    lock: Arc<StoreLock>,
    name: &str,
    options: &AcquireOptions,
    command: &[String],
    shutdown: &ShutdownSignal,
) -> anyhow::Result<i32> {
    let Some((program, args)) = command.split_first() else {
        bail!("no command given");
    };

    if !lock.acquire_until(name, options, shutdown.cancelled()).await? {
        if shutdown.is_shutdown() {
            info!(name = %name, "Interrupted while waiting for lock");
            return Ok(EXIT_INTERRUPTED);
        }
        warn!(name = %name, "Lock is held elsewhere; command not run");
        return Ok(EXIT_LOCK_NOT_ACQUIRED);
    }
    info!(name = %name, ttl = %format_duration(options.ttl), "Lock acquired");

    let mut renewal = AutoRenewal::start(lock.clone(), name, options.ttl);
    let outcome = run_child(program, args, &renewal, shutdown).await;
    renewal.shutdown().await;

    match lock.release(name).await {
        Ok(true) => debug!(name = %name, "Lock released"),
        Ok(false) => warn!(name = %name, "Lock was lost before release"),
        Err(e) => warn!(
            name = %name,
            error = %e,
            "Failed to release lock; it will expire after its TTL"
        ),
    }

    outcome
}

async fn run_child(
    program: &str,
    args: &[String],
    renewal: &AutoRenewal,
    shutdown: &ShutdownSignal,
) -> anyhow::Result<i32> {
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start '{}'", program))?;
    debug!(program = %program, pid = ?child.id(), "Command started");

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("failed to wait for '{}'", program))?;
            Ok(exit_code_of(status))
        }
        true = renewal.lost() => {
            error!(name = %renewal.name(), "Lock lost while the command was running; stopping it");
            child.kill().await?;
            Ok(EXIT_LOCK_NOT_ACQUIRED)
        }
        _ = shutdown.cancelled() => {
            warn!(program = %program, "Interrupted; stopping command");
            child.kill().await?;
            Ok(EXIT_INTERRUPTED)
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
