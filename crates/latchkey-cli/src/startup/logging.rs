//! Logging initialization for the `latchkey` binary.
//!
//! Console output goes to stderr so command output on stdout stays clean.
//! Optionally a rolling log file receives the same events without colors.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use latchkey_common::LatchkeyError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

const APP_NAME: &str = "latchkey";

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Console,
    /// Bunyan JSON records
    Json,
}

impl FromStr for LogFormat {
    type Err = LatchkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "text" => Ok(Self::Console),
            "json" | "bunyan" => Ok(Self::Json),
            _ => Err(LatchkeyError::ConfigError(format!(
                "unknown log format '{}'",
                s
            ))),
        }
    }
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Daily,
    Hourly,
    /// Single file, never rotated
    Never,
}

impl FromStr for LogRotation {
    type Err = LatchkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "hourly" => Ok(Self::Hourly),
            "never" => Ok(Self::Never),
            _ => Err(LatchkeyError::ConfigError(format!(
                "unknown log rotation '{}'",
                s
            ))),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level directive used when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
    /// Optional log file; its parent directory is created if missing
    pub file: Option<PathBuf>,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Console,
            file: None,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Guard that keeps the logging system alive.
///
/// Holds the file appender worker guard; dropping it flushes buffered output.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Split a log file path into the directory and file name the appender needs
fn split_log_path(path: &Path) -> Result<(PathBuf, String), LatchkeyError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            LatchkeyError::ConfigError(format!("invalid log file path '{}'", path.display()))
        })?
        .to_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level for every layer.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    match config.format {
        LogFormat::Console => {
            let console_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(config.filter());
            layers.push(Box::new(console_layer));
        }
        LogFormat::Json => {
            layers.push(Box::new(JsonStorageLayer));
            let bunyan_layer = BunyanFormattingLayer::new(APP_NAME.to_string(), std::io::stderr)
                .with_filter(config.filter());
            layers.push(Box::new(bunyan_layer));
        }
    }

    if let Some(path) = &config.file {
        let (dir, file_name) = split_log_path(path)?;
        std::fs::create_dir_all(&dir)?;

        let appender = RollingFileAppender::new(config.rotation.into(), &dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(config.filter());
        layers.push(Box::new(file_layer));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if let Some(path) = &config.file {
        tracing::debug!(file = %path.display(), rotation = ?config.rotation, "File logging initialized");
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("console".parse::<LogFormat>().unwrap(), LogFormat::Console);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_rotation_from_str() {
        assert_eq!("daily".parse::<LogRotation>().unwrap(), LogRotation::Daily);
        assert_eq!("Hourly".parse::<LogRotation>().unwrap(), LogRotation::Hourly);
        assert_eq!("never".parse::<LogRotation>().unwrap(), LogRotation::Never);
        assert!("weekly".parse::<LogRotation>().is_err());
    }

    #[test]
    fn test_split_log_path() {
        let (dir, name) = split_log_path(Path::new("/var/log/latchkey/latchkey.log")).unwrap();
        assert_eq!(dir, PathBuf::from("/var/log/latchkey"));
        assert_eq!(name, "latchkey.log");

        let (dir, name) = split_log_path(Path::new("latchkey.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, "latchkey.log");

        assert!(split_log_path(Path::new("/")).is_err());
    }
}
