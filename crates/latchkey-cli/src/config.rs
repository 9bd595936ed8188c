//! Configuration management for the `latchkey` binary
//!
//! Sources, lowest to highest precedence: built-in defaults, the YAML file
//! (`conf/latchkey.yml` or `--config`), `LATCHKEY_` environment variables
//! (`__` separates nesting, e.g. `LATCHKEY_REDIS__HOST`), then CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use latchkey_common::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_KEY_PREFIX, DEFAULT_OP_TIMEOUT_MS, DEFAULT_REDIS_PORT,
    DEFAULT_RETRY_INTERVAL_MS, DEFAULT_TTL_MS, LatchkeyError, parse_duration,
};
use latchkey_lock::{LockConfig, RedisConfig};

use crate::startup::{LogFormat, LogRotation, LoggingConfig};

/// Configuration file read when `--config` is not given; optional
pub const DEFAULT_CONFIG_FILE: &str = "conf/latchkey.yml";

const ENV_PREFIX: &str = "LATCHKEY";

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "latchkey", version, about = "Run commands under a distributed lock")]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Redis connection URL, e.g. redis://:password@127.0.0.1:6379/0
    #[arg(long = "redis-url", global = true)]
    pub redis_url: Option<String>,

    /// Prefix prepended to lock names to form store keys
    #[arg(long = "key-prefix", global = true)]
    pub key_prefix: Option<String>,

    /// Log level directive (overridden by RUST_LOG)
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check that the lock store is reachable
    Ping,

    /// Show whether a lock is held and its remaining TTL
    Status {
        name: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run a command while holding a lock
    Exec {
        name: String,

        /// Lock TTL, renewed automatically while the command runs
        #[arg(long)]
        ttl: Option<String>,

        /// How long to wait for the lock; fail immediately when omitted
        #[arg(long)]
        wait: Option<String>,

        /// Interval between acquisition attempts while waiting
        #[arg(long = "retry-interval")]
        retry_interval: Option<String>,

        /// Command and arguments to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

/// Application configuration loaded from file, environment and flags
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

fn config_error(e: impl std::fmt::Display) -> LatchkeyError {
    LatchkeyError::ConfigError(e.to_string())
}

impl Configuration {
    pub fn new(cli: &Cli) -> Result<Self, LatchkeyError> {
        let file = match &cli.config {
            Some(path) => File::from(path.as_path()).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("redis.url", cli.redis_url.clone())
            .map_err(config_error)?
            .set_override_option("lock.key_prefix", cli.key_prefix.clone())
            .map_err(config_error)?
            .set_override_option("log.level", cli.log_level.clone())
            .map_err(config_error)?
            .build()
            .map_err(config_error)?;

        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Configuration { config }
    }

    fn string(&self, key: &str) -> Option<String> {
        self.config.get_string(key).ok().filter(|v| !v.is_empty())
    }

    fn duration(&self, key: &str, default_ms: u64) -> Result<Duration, LatchkeyError> {
        match self.string(key) {
            Some(v) => parse_duration(&v)
                .map_err(|e| LatchkeyError::ConfigError(format!("{}: {}", key, e))),
            None => Ok(Duration::from_millis(default_ms)),
        }
    }

    // ========================================================================
    // Redis Configuration
    // ========================================================================

    pub fn redis_config(&self) -> Result<RedisConfig, LatchkeyError> {
        let port = self
            .config
            .get_int("redis.port")
            .unwrap_or(DEFAULT_REDIS_PORT.into());
        let port = u16::try_from(port)
            .map_err(|_| LatchkeyError::ConfigError(format!("redis.port: invalid port {}", port)))?;

        Ok(RedisConfig {
            url: self.string("redis.url"),
            host: self
                .string("redis.host")
                .unwrap_or_else(|| RedisConfig::default().host),
            port,
            db: self.config.get_int("redis.db").unwrap_or(0),
            username: self.string("redis.username"),
            password: self.string("redis.password"),
            connect_timeout_ms: self
                .duration("redis.connect_timeout", DEFAULT_CONNECT_TIMEOUT_MS)?
                .as_millis() as u64,
            op_timeout_ms: self
                .duration("redis.op_timeout", DEFAULT_OP_TIMEOUT_MS)?
                .as_millis() as u64,
        })
    }

    // ========================================================================
    // Lock Configuration
    // ========================================================================

    pub fn lock_config(&self) -> Result<LockConfig, LatchkeyError> {
        let key_prefix = self
            .config
            .get_string("lock.key_prefix")
            .unwrap_or(DEFAULT_KEY_PREFIX.to_string());

        Ok(LockConfig::new(
            key_prefix,
            self.duration("lock.default_ttl", DEFAULT_TTL_MS)?.as_millis() as u64,
            self.duration("lock.retry_interval", DEFAULT_RETRY_INTERVAL_MS)?
                .as_millis() as u64,
        ))
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> Result<LoggingConfig, LatchkeyError> {
        let defaults = LoggingConfig::default();
        Ok(LoggingConfig {
            level: self.string("log.level").unwrap_or(defaults.level),
            format: match self.string("log.format") {
                Some(v) => v.parse::<LogFormat>()?,
                None => defaults.format,
            },
            file: self.string("log.file").map(PathBuf::from),
            rotation: match self.string("log.rotation") {
                Some(v) => v.parse::<LogRotation>()?,
                None => defaults.rotation,
            },
        })
    }
}
