//! Logging configuration, stored in the `logging` section of `config.json`

use super::rotation::RetentionConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default file name prefix of the rolling log files
pub const DEFAULT_FILE_PREFIX: &str = "warden.log";

/// Log verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    /// Suppress the target entirely
    Off,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Console,
    File,
    #[default]
    Both,
}

impl LogOutput {
    pub fn to_console(&self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    pub fn to_file(&self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for everything without a more specific entry
    #[serde(default)]
    pub level: LogLevel,

    /// Level for lines captured from the server's console (target `server`)
    #[serde(default)]
    pub server_output: LogLevel,

    /// Per-target overrides, e.g. `"watcher": "debug"`
    #[serde(default)]
    pub targets: BTreeMap<String, LogLevel>,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log directory. Relative paths are resolved against the directory
    /// holding `config.json`; an empty value selects the per-user data dir.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// File name prefix; the rolling appender appends the period suffix
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Prefix console lines with the emitting thread's name
    #[serde(default)]
    pub thread_names: bool,

    /// How many old log files are kept
    #[serde(default)]
    pub retention: RetentionConfig,
}

fn default_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_file_prefix() -> String {
    DEFAULT_FILE_PREFIX.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            server_output: LogLevel::Info,
            targets: BTreeMap::new(),
            format: LogFormat::Text,
            output: LogOutput::Both,
            directory: default_directory(),
            file_prefix: default_file_prefix(),
            thread_names: false,
            retention: RetentionConfig::default(),
        }
    }
}

impl LoggingConfig {
    /// Raise the global level to debug, leaving captured server output alone
    pub fn verbose(mut self) -> Self {
        self.level = self.level.min(LogLevel::Debug);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>, level: LogLevel) -> Self {
        self.targets.insert(target.into(), level);
        self
    }

    /// `EnvFilter` directives in application order
    pub fn directives(&self) -> Vec<String> {
        let mut directives = Vec::with_capacity(self.targets.len() + 2);
        directives.push(self.level.as_str().to_string());
        directives.push(format!("server={}", self.server_output));
        directives.extend(
            self.targets
                .iter()
                .filter(|(target, _)| !target.trim().is_empty())
                .map(|(target, level)| format!("{}={}", target.trim(), level)),
        );
        directives
    }

    /// Absolute log directory for a configuration living in `config_dir`
    pub fn resolve_directory(&self, config_dir: &Path) -> PathBuf {
        if self.directory.as_os_str().is_empty() {
            return fallback_directory();
        }
        if self.directory.is_absolute() {
            self.directory.clone()
        } else {
            config_dir.join(&self.directory)
        }
    }
}

fn fallback_directory() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("mod-warden").join("logs"))
        .unwrap_or_else(default_directory)
}
