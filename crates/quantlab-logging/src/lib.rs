//! Shared logging infrastructure for QuantLab tools.
//!
//! Unified setup over the `tracing` ecosystem: environment-driven
//! configuration, stderr output, and optional daily-rotated file logging.
//!
//! # Usage
//!
//! ```rust,ignore
//! use quantlab_logging::{init_logging, LogConfig};
//!
//! let _guard = init_logging(&LogConfig::from_env());
//! tracing::info!("backtest starting");
//! ```

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Configuration for QuantLab logging.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Enable logging output.
    pub enabled: bool,
    /// Log level filter (e.g., "info", "quantlab_core=debug").
    pub filter: String,
    /// Directory for log files; `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
    /// Enable daily log rotation for file output.
    pub rotate_daily: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filter: "info,quantlab_core=debug".to_string(),
            log_dir: None,
            rotate_daily: true,
        }
    }
}

impl LogConfig {
    /// Create an enabled LogConfig with the specified filter.
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            enabled: true,
            filter: filter.into(),
            ..Default::default()
        }
    }

    /// Create LogConfig from environment variables.
    ///
    /// Reads:
    /// - `QUANTLAB_LOG_ENABLED`: "1" or "true" to enable
    /// - `QUANTLAB_LOG_FILTER`: filter string (default "info,quantlab_core=debug")
    /// - `QUANTLAB_LOG_DIR`: log directory (stderr only when unset)
    pub fn from_env() -> Self {
        let enabled = std::env::var("QUANTLAB_LOG_ENABLED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let filter = std::env::var("QUANTLAB_LOG_FILTER")
            .unwrap_or_else(|_| "info,quantlab_core=debug".to_string());

        let log_dir = std::env::var("QUANTLAB_LOG_DIR").ok().map(PathBuf::from);

        Self {
            enabled,
            filter,
            log_dir,
            rotate_daily: true,
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Guard that flushes buffered log entries on drop. Keep it alive for the
/// duration of logging.
pub struct LogGuard {
    _worker_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl LogGuard {
    fn new(worker_guard: Option<tracing_appender::non_blocking::WorkerGuard>) -> Self {
        Self {
            _worker_guard: worker_guard,
        }
    }

    /// Create an empty guard (no-op).
    pub fn empty() -> Self {
        Self {
            _worker_guard: None,
        }
    }
}

/// Initialize global logging. Returns a guard that must be kept alive;
/// calling twice is a no-op (the second registry fails to install).
pub fn init_logging(config: &LogConfig) -> LogGuard {
    if !config.enabled {
        return LogGuard::empty();
    }

    let env_filter = EnvFilter::try_new(&config.filter)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(false);

    match &config.log_dir {
        Some(dir) => {
            let rotation = if config.rotate_daily {
                Rotation::DAILY
            } else {
                Rotation::NEVER
            };
            let appender = RollingFileAppender::new(rotation, dir, "quantlab.log");
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .boxed();
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            LogGuard::new(Some(worker_guard))
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .try_init();
            LogGuard::empty()
        }
    }
}
