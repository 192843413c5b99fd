//! Logging initialization for binaries embedding the session.
//!
//! Thin wrapper over `tracing-subscriber`: console output, an optional
//! non-blocking file writer, and `RUST_LOG` passthrough when no explicit
//! level is set.

use std::fs::{self, File};
use std::path::PathBuf;

use chrono::Local;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{LoggingError, LoggingResult};

/// Keep this guard alive for the life of the process; dropping it flushes
/// buffered log entries.
#[derive(Debug)]
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Logging output selection.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level filter; falls back to `RUST_LOG`, then INFO.
    pub level: Option<LevelFilter>,
    /// Write to stderr.
    pub console: bool,
    /// Also write to a dated file in this directory.
    pub log_dir: Option<PathBuf>,
}

/// Console-only logging at the given level.
pub fn init_console_logging(level: LevelFilter) -> LoggingResult<LoggingGuard> {
    init_logging(LoggingConfig {
        level: Some(level),
        console: true,
        log_dir: None,
    })
}

/// Initialize the global tracing subscriber from `config`.
///
/// With neither console nor file output enabled, tracing macros become
/// no-ops and initialization still succeeds.
pub fn init_logging(config: LoggingConfig) -> LoggingResult<LoggingGuard> {
    if !config.console && config.log_dir.is_none() {
        return Ok(LoggingGuard {
            _worker_guard: None,
        });
    }

    let env_filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    };

    let (file_layer, guard) = match config.log_dir {
        Some(log_dir) => {
            fs::create_dir_all(&log_dir)?;
            let name = format!("header-sync.{}.log", Local::now().format("%Y-%m-%d.%H%M%S"));
            let file = File::create(log_dir.join(name))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer().with_target(true).with_ansi(false).with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = config.console.then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| LoggingError::SubscriberInit(err.to_string()))?;

    Ok(LoggingGuard {
        _worker_guard: guard,
    })
}
