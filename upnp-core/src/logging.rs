//! Logging infrastructure for the UPnP SDK
//!
//! Centralized tracing setup so embedding applications can pick an output
//! style once, before initializing the SDK session.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output for development
    Development,
    /// Verbose diagnostics with source locations
    Debug,
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),
}

/// Initialize logging with the specified mode
///
/// Call early in the application lifecycle, before constructing the SDK
/// session.
///
/// # Environment Variables
///
/// - `UPNP_LOG_LEVEL`: Override log level (error, warn, info, debug, trace)
/// - `RUST_LOG`: Standard tracing filter, used when `UPNP_LOG_LEVEL` is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let subscriber = Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .with(env_filter("info"));

            subscriber
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let subscriber = Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(env_filter("debug"));

            subscriber
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from the `UPNP_LOG_MODE` environment variable
///
/// Recognized values are "development" and "debug"; anything else (or an
/// unset variable) selects silent mode.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var("UPNP_LOG_MODE").as_deref() {
        Ok("development") => LoggingMode::Development,
        Ok("debug") => LoggingMode::Debug,
        _ => LoggingMode::Silent,
    };

    init_logging(mode)
}

fn env_filter(default_level: &str) -> EnvFilter {
    if let Ok(level) = std::env::var("UPNP_LOG_LEVEL") {
        EnvFilter::new(level)
    } else if let Ok(rust_log) = std::env::var("RUST_LOG") {
        EnvFilter::new(rust_log)
    } else {
        EnvFilter::new(default_level)
    }
}
