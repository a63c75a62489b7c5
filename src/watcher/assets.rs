//! Assets Watcher
//!
//! Restarts the server after every asset archive change in the assets
//! directory, once every archive has stopped growing. A replaced archive of
//! the same size still restarts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{EventBatch, WatchSource, WatchSourceConfig};
use crate::core::error::RegistryError;
use crate::sync::SuppressionRegistry;
use crate::watchdog::{is_asset_archive, list_asset_archives, ProcessControl};

type ArchiveSnapshot = Vec<(PathBuf, u64)>;

/// Assets watcher tuning
#[derive(Debug, Clone)]
pub struct AssetsWatcherConfig {
    /// Give up waiting for archives to settle after this long
    pub settle_timeout: Duration,
    /// Interval between size polls
    pub poll_interval: Duration,
}

impl Default for AssetsWatcherConfig {
    fn default() -> Self {
        Self {
            settle_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Watches the assets directory and restarts the process on archive changes
pub struct AssetsWatcher {
    source: WatchSource,
}

impl AssetsWatcher {
    /// Start watching `dir`, creating it if missing
    pub fn spawn(
        dir: &Path,
        suppression: Arc<SuppressionRegistry>,
        process: Arc<dyn ProcessControl>,
        config: AssetsWatcherConfig,
        source_config: WatchSourceConfig,
    ) -> Result<Self, RegistryError> {
        fs::create_dir_all(dir).map_err(|e| RegistryError::Prepare {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let reloader = AssetsReloader {
            dir: dir.to_path_buf(),
            process,
            config,
        };

        let source = WatchSource::spawn(dir, suppression, source_config, move |batch: EventBatch| {
            reloader.handle(&batch);
        })?;

        Ok(Self { source })
    }

    pub fn dir(&self) -> &Path {
        self.source.root()
    }

    pub fn stop(&mut self) {
        self.source.stop();
    }
}

pub(crate) struct AssetsReloader {
    pub(crate) dir: PathBuf,
    pub(crate) process: Arc<dyn ProcessControl>,
    pub(crate) config: AssetsWatcherConfig,
}

impl AssetsReloader {
    /// React to one batch. Returns true if the process was restarted.
    pub(crate) fn handle(&self, batch: &EventBatch) -> bool {
        let touches_archive = batch.has_overflow()
            || batch.events.iter().any(|event| is_asset_archive(&event.path));
        if !touches_archive {
            return false;
        }

        let Some(snapshot) = wait_archives_stable(&self.dir, &self.config) else {
            tracing::warn!(
                target: "watcher",
                dir = %self.dir.display(),
                "Asset archives did not settle in time, not restarting"
            );
            return false;
        };

        tracing::info!(target: "watcher", archives = snapshot.len(), "Asset archives changed, restarting server");
        if let Err(e) = self.process.restart() {
            tracing::error!(target: "watcher", "Restart after asset change failed: {}", e);
        }
        true
    }
}

/// Poll archive sizes until two consecutive polls agree, or the timeout elapses
pub(crate) fn wait_archives_stable(dir: &Path, config: &AssetsWatcherConfig) -> Option<ArchiveSnapshot> {
    let start = Instant::now();
    let mut previous: Option<ArchiveSnapshot> = None;

    loop {
        let current = archive_sizes(dir);
        if previous.as_ref() == Some(&current) {
            return Some(current);
        }
        previous = Some(current);

        if start.elapsed() >= config.settle_timeout {
            return None;
        }
        std::thread::sleep(config.poll_interval);
    }
}

fn archive_sizes(dir: &Path) -> ArchiveSnapshot {
    let mut sizes: ArchiveSnapshot = list_asset_archives(dir)
        .into_iter()
        .filter_map(|path| fs::metadata(&path).ok().map(|m| (path, m.len())))
        .collect();
    sizes.sort();
    sizes
}
