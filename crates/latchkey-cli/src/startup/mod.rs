//! Process startup: logging and signal handling

pub mod logging;
pub mod shutdown;

pub use logging::{LogFormat, LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{ShutdownSignal, listen_for_shutdown};
