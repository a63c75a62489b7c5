//! Log file rotation and retention
//!
//! The rolling appender opens a new file every period; the pruner deletes
//! old files so the log directory stays bounded by count, age and size.

use super::LoggingError;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::Rotation;

/// How often the appender starts a new file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPeriod {
    #[default]
    Daily,
    Hourly,
    /// One file forever
    Never,
}

impl RotationPeriod {
    pub(crate) fn appender_rotation(&self) -> Rotation {
        match self {
            RotationPeriod::Daily => Rotation::DAILY,
            RotationPeriod::Hourly => Rotation::HOURLY,
            RotationPeriod::Never => Rotation::NEVER,
        }
    }
}

/// Retention limits for old log files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub period: RotationPeriod,

    /// Files kept, newest first
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Files older than this are deleted
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// Upper bound for the directory total, in megabytes
    #[serde(default = "default_max_total_mb")]
    pub max_total_mb: u64,
}

fn default_max_files() -> usize {
    7
}

fn default_max_age_days() -> u32 {
    30
}

fn default_max_total_mb() -> u64 {
    100
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            period: RotationPeriod::Daily,
            max_files: default_max_files(),
            max_age_days: default_max_age_days(),
            max_total_mb: default_max_total_mb(),
        }
    }
}

impl RetentionConfig {
    fn max_total_bytes(&self) -> u64 {
        self.max_total_mb.saturating_mul(1024 * 1024)
    }
}

/// A log file found in the log directory
#[derive(Debug, Clone)]
pub struct LogFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Indices into `files` (sorted oldest first) that exceed the limits.
///
/// Age is applied first, then count, then total size. The newest file is
/// never selected by the size rule since the appender may still be writing it.
pub(crate) fn plan_removals(
    files: &[LogFile],
    config: &RetentionConfig,
    max_total_bytes: u64,
    now: DateTime<Utc>,
) -> Vec<usize> {
    let cutoff = now - Duration::days(i64::from(config.max_age_days));

    let mut remove: Vec<usize> = files
        .iter()
        .enumerate()
        .filter(|(_, file)| file.modified < cutoff)
        .map(|(i, _)| i)
        .collect();

    let mut kept: Vec<usize> = (0..files.len()).filter(|i| !remove.contains(i)).collect();

    if kept.len() > config.max_files {
        let excess = kept.len() - config.max_files;
        remove.extend(kept.drain(..excess));
    }

    let mut total: u64 = kept.iter().map(|&i| files[i].size).sum();
    while total > max_total_bytes && kept.len() > 1 {
        let oldest = kept.remove(0);
        total -= files[oldest].size;
        remove.push(oldest);
    }

    remove.sort_unstable();
    remove
}

/// Deletes log files beyond the retention limits
pub struct LogPruner {
    directory: PathBuf,
    prefix: String,
    config: RetentionConfig,
    last_run: Option<DateTime<Utc>>,
}

impl LogPruner {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>, config: RetentionConfig) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            config,
            last_run: None,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Log files carrying our prefix, oldest first
    pub fn scan(&self) -> Result<Vec<LogFile>, LoggingError> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.directory)?.flatten() {
            let path = entry.path();
            let ours = path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(&self.prefix));
            if !ours {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            files.push(LogFile {
                path,
                size: metadata.len(),
                modified: metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            });
        }

        files.sort_by(|a, b| a.modified.cmp(&b.modified));
        Ok(files)
    }

    /// Delete files beyond the limits, returning how many were removed
    pub fn prune(&mut self) -> Result<usize, LoggingError> {
        let files = self.scan()?;
        let now = Utc::now();
        let plan = plan_removals(&files, &self.config, self.config.max_total_bytes(), now);

        let mut removed = 0;
        for index in plan {
            let file = &files[index];
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    tracing::debug!(path = %file.path.display(), "Removed old log file");
                    removed += 1;
                }
                Err(e) => {
                    return Err(LoggingError::Rotation(format!(
                        "cannot remove {}: {}",
                        file.path.display(),
                        e
                    )))
                }
            }
        }

        self.last_run = Some(now);
        Ok(removed)
    }

    /// Whether a new rotation period started since the last prune
    pub fn is_due(&self) -> bool {
        let Some(last) = self.last_run else {
            return true;
        };

        let now = Utc::now();
        match self.config.period {
            RotationPeriod::Never => now - last >= Duration::days(1),
            RotationPeriod::Daily => now.date_naive() != last.date_naive(),
            RotationPeriod::Hourly => now.date_naive() != last.date_naive() || now.hour() != last.hour(),
        }
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }
}
