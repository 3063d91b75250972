//! Logging system initialization.
//!
//! Sets up the tracing subscriber from the logging configuration. If the
//! configured log file cannot be opened the subscriber falls back to stdout
//! and the failure is reported as a warning string (logging itself is not
//! up yet at that point).

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Result of logging initialization.
pub struct LoggingInitResult {
    /// Keep alive for the lifetime of the program; dropping it stops the
    /// non-blocking writer.
    pub guard: WorkerGuard,
    /// Set when the configured destination was unusable and stdout was used
    /// instead.
    pub warning: Option<String>,
}

/// Initialize the global tracing subscriber. Call once, before any other
/// daemon setup that wants to log.
pub fn init_logging(config: &LoggingConfig) -> LoggingInitResult {
    let (writer, warning): (Box<dyn std::io::Write + Send + Sync>, Option<String>) =
        match &config.file {
            Some(path) if !path.is_empty() => {
                match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                    Ok(file) => (Box::new(file), None),
                    Err(e) => (
                        Box::new(std::io::stdout()),
                        Some(format!(
                            "Failed to open log file '{path}': {e}. Falling back to stdout."
                        )),
                    ),
                }
            }
            _ => (Box::new(std::io::stdout()), None),
        };

    let ansi = config.ansi && config.file.is_none();
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(writer);
    let filter = EnvFilter::new(config.level.clone());

    tracing_subscriber::fmt()
        .with_writer(non_blocking_writer)
        .with_env_filter(filter)
        .with_level(true)
        .with_ansi(ansi)
        .init();

    LoggingInitResult { guard, warning }
}
