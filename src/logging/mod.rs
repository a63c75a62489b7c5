//! Logging for mod-warden
//!
//! Installs the global `tracing` subscriber: an `EnvFilter`, a console layer
//! and a non-blocking rolling file layer, then keeps the log directory
//! bounded.
//!
//! Every subsystem logs under its own target (`process`, `sync`, `watcher`,
//! `monitor`, `console`); captured server output is logged under `server`.

mod config;
mod rotation;


pub use config::{LogFormat, LogLevel, LogOutput, LoggingConfig, DEFAULT_FILE_PREFIX};
pub use rotation::{LogFile, LogPruner, RetentionConfig, RotationPeriod};

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to install subscriber: {0}")]
    Init(String),

    #[error("Cannot create log directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Log cleanup failed: {0}")]
    Rotation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type LoggingResult<T> = Result<T, LoggingError>;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installed logging; dropping it flushes and closes the log file
pub struct LoggingSystem {
    level: LogLevel,
    pruner: Option<Mutex<LogPruner>>,
    _guard: Option<WorkerGuard>,
}

impl LoggingSystem {
    /// Install the global subscriber. Relative log directories are resolved
    /// against `config_dir`. `RUST_LOG`, when set, replaces the configured
    /// levels.
    pub fn init(config: &LoggingConfig, config_dir: &Path) -> LoggingResult<Self> {
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;
        let mut pruner = None;

        if config.output.to_console() {
            layers.push(console_layer(config));
        }

        if config.output.to_file() {
            let directory = config.resolve_directory(config_dir);
            std::fs::create_dir_all(&directory).map_err(|source| LoggingError::Directory {
                path: directory.clone(),
                source,
            })?;

            let appender = RollingFileAppender::new(
                config.retention.period.appender_rotation(),
                &directory,
                &config.file_prefix,
            );
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(config.thread_names);
            layers.push(match config.format {
                LogFormat::Json => layer.json().boxed(),
                LogFormat::Text => layer.boxed(),
            });

            guard = Some(file_guard);
            pruner = Some(LogPruner::new(
                directory,
                config.file_prefix.clone(),
                config.retention.clone(),
            ));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter(config))
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))?;

        let system = Self {
            level: config.level,
            pruner: pruner.map(Mutex::new),
            _guard: guard,
        };
        if let Err(e) = system.prune_logs() {
            tracing::warn!("Initial log cleanup failed: {}", e);
        }
        Ok(system)
    }

    /// Delete old log files now
    pub fn prune_logs(&self) -> LoggingResult<usize> {
        match &self.pruner {
            Some(pruner) => pruner.lock().prune(),
            None => Ok(0),
        }
    }

    /// Prune only when a new rotation period has started
    pub fn prune_if_due(&self) -> LoggingResult<usize> {
        match &self.pruner {
            Some(pruner) => {
                let mut pruner = pruner.lock();
                if pruner.is_due() {
                    pruner.prune()
                } else {
                    Ok(0)
                }
            }
            None => Ok(0),
        }
    }

    /// Directory holding the log files, if file output is enabled
    pub fn log_directory(&self) -> Option<PathBuf> {
        self.pruner.as_ref().map(|p| p.lock().directory().to_path_buf())
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }
}

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    let layer = fmt::layer().with_thread_names(config.thread_names);
    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Text => layer.boxed(),
    }
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut filter = EnvFilter::new("");
    for directive in config.directives() {
        match directive.parse::<Directive>() {
            Ok(parsed) => filter = filter.add_directive(parsed),
            Err(e) => eprintln!("Ignoring invalid log directive {}: {}", directive, e),
        }
    }
    filter
}
