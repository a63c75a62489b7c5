//! Watcher Registry
//!
//! Owns every active watch source together with its update job. The local
//! mirror of the server's mod directory is wired at construction with
//! [`SyncPolicy::MirrorRestart`]; directories added later merge into that
//! mirror, or cascade through it when they look like build output.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;
use parking_lot::Mutex;
use serde::Serialize;

use super::job::{SyncPolicy, UpdateJob};
use super::{EventBatch, WatchSource, WatchSourceConfig};
use crate::core::error::RegistryError;
use crate::core::utils::normalize_path;
use crate::sync::TreeSynchronizer;
use crate::watchdog::ProcessControl;

/// Default glob patterns identifying build-output directories
pub const DEFAULT_BUILD_PATTERNS: &[&str] = &["**/build/libs", "**/target"];

/// Fixed directories the registry is built around
#[derive(Debug, Clone)]
pub struct RegistryLayout {
    /// Local staging mirror of the server's mod directory
    pub local_mirror: PathBuf,
    /// The server's live mod directory
    pub live_target: PathBuf,
    /// Glob patterns for build-output directories
    pub build_patterns: Vec<String>,
}

impl RegistryLayout {
    pub fn new(local_mirror: impl Into<PathBuf>, live_target: impl Into<PathBuf>) -> Self {
        Self {
            local_mirror: local_mirror.into(),
            live_target: live_target.into(),
            build_patterns: DEFAULT_BUILD_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Snapshot of one registered watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEntry {
    pub source: PathBuf,
    pub target: PathBuf,
    pub policy: SyncPolicy,
    /// Wired by the registry itself; cannot be removed
    pub builtin: bool,
}

struct WatchHandle {
    entry: WatchEntry,
    job: UpdateJob,
    source: WatchSource,
}

/// Registry of active watch sources
pub struct WatcherRegistry {
    local_mirror: PathBuf,
    live_target: PathBuf,
    build_patterns: Vec<Pattern>,
    synchronizer: Arc<TreeSynchronizer>,
    process: Arc<dyn ProcessControl>,
    source_config: WatchSourceConfig,
    handles: Mutex<HashMap<PathBuf, WatchHandle>>,
}

impl WatcherRegistry {
    /// Build the registry, mirror the local mirror into the live target and
    /// start watching the local mirror.
    pub fn new(
        layout: RegistryLayout,
        synchronizer: Arc<TreeSynchronizer>,
        process: Arc<dyn ProcessControl>,
        source_config: WatchSourceConfig,
    ) -> Result<Self, RegistryError> {
        let build_patterns = layout
            .build_patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| RegistryError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let registry = Self {
            local_mirror: normalize_path(&layout.local_mirror),
            live_target: normalize_path(&layout.live_target),
            build_patterns,
            synchronizer,
            process,
            source_config,
            handles: Mutex::new(HashMap::new()),
        };

        registry.wire_local_mirror()?;
        Ok(registry)
    }

    pub fn local_mirror(&self) -> &Path {
        &self.local_mirror
    }

    pub fn live_target(&self) -> &Path {
        &self.live_target
    }

    fn wire_local_mirror(&self) -> Result<(), RegistryError> {
        let source = self.local_mirror.clone();
        let target = self.live_target.clone();
        for dir in [&source, &target] {
            fs::create_dir_all(dir).map_err(|e| RegistryError::Prepare {
                path: dir.clone(),
                source: e,
            })?;
        }

        match self.synchronizer.mirror_replace(&source, &target) {
            Ok(report) => tracing::info!(
                target: "watcher",
                copied = report.copied,
                deleted = report.deleted,
                "Initial mod sync completed"
            ),
            Err(e) => tracing::error!(target: "watcher", "Initial mod sync failed: {}", e),
        }

        let entry = WatchEntry {
            source,
            target,
            policy: SyncPolicy::MirrorRestart,
            builtin: true,
        };
        let handle = self.spawn_handle(entry)?;
        self.handles.lock().insert(handle.entry.source.clone(), handle);
        Ok(())
    }

    /// Register a new watch directory.
    ///
    /// The directory is created if missing and its top-level content is
    /// imported into the local mirror before watching starts.
    pub fn add_watcher(&self, path: &Path) -> Result<WatchEntry, RegistryError> {
        let source = normalize_path(path);
        if source.file_name().is_none() {
            return Err(RegistryError::InvalidPath { path: source });
        }
        if self.is_reserved(&source) {
            return Err(RegistryError::Reserved { path: source });
        }

        if self.handles.lock().contains_key(&source) {
            return Err(RegistryError::Duplicate { path: source });
        }

        // Import and watcher startup can take seconds; the map stays unlocked
        if !source.exists() {
            fs::create_dir_all(&source).map_err(|e| RegistryError::Prepare {
                path: source.clone(),
                source: e,
            })?;
            tracing::info!(target: "watcher", source = %source.display(), "Created watch directory");
        }

        let policy = self.classify(&source);
        let target = self.local_mirror.clone();

        match self.synchronizer.merge_top_level_if_absent(&source, &target) {
            Ok(report) => tracing::info!(
                target: "watcher",
                source = %source.display(),
                copied = report.copied,
                "Initial import completed"
            ),
            Err(e) => tracing::error!(target: "watcher", source = %source.display(), "Initial import failed: {}", e),
        }

        let entry = WatchEntry {
            source: source.clone(),
            target,
            policy,
            builtin: false,
        };
        let handle = self.spawn_handle(entry.clone())?;

        let duplicate = match self.handles.lock().entry(source) {
            Entry::Vacant(slot) => {
                slot.insert(handle);
                None
            }
            Entry::Occupied(_) => Some(handle),
        };
        if let Some(mut handle) = duplicate {
            handle.source.stop();
            return Err(RegistryError::Duplicate { path: entry.source });
        }

        tracing::info!(
            target: "watcher",
            source = %entry.source.display(),
            target_dir = %entry.target.display(),
            policy = %entry.policy,
            "Watcher added"
        );
        Ok(entry)
    }

    /// Stop and remove a watcher. Returns false if none was registered for `path`.
    pub fn remove_watcher(&self, path: &Path) -> Result<bool, RegistryError> {
        let source = normalize_path(path);

        let mut handle = {
            let mut handles = self.handles.lock();
            match handles.get(&source) {
                None => {
                    tracing::info!(target: "watcher", source = %source.display(), "No watcher registered");
                    return Ok(false);
                }
                Some(handle) if handle.entry.builtin => {
                    return Err(RegistryError::Reserved { path: source });
                }
                Some(_) => {}
            }
            match handles.remove(&source) {
                Some(handle) => handle,
                None => return Ok(false),
            }
        };

        handle.source.stop();
        tracing::info!(target: "watcher", source = %source.display(), "Watcher removed");
        Ok(true)
    }

    /// Snapshot of the registered watchers, sorted by source
    pub fn list_watchers(&self) -> Vec<WatchEntry> {
        let mut entries: Vec<WatchEntry> = self
            .handles
            .lock()
            .values()
            .map(|handle| handle.entry.clone())
            .collect();
        entries.sort_by(|a, b| a.source.cmp(&b.source));
        entries
    }

    /// Update job for a registered source
    pub fn job(&self, path: &Path) -> Option<UpdateJob> {
        self.handles
            .lock()
            .get(&normalize_path(path))
            .map(|handle| handle.job.clone())
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Stop every watcher: signal all first, then join each with a bounded wait
    pub fn shutdown_all(&self) {
        let mut handles: Vec<WatchHandle> = self.handles.lock().drain().map(|(_, h)| h).collect();
        if handles.is_empty() {
            return;
        }

        tracing::info!(target: "watcher", count = handles.len(), "Shutting down watchers");
        for handle in &handles {
            handle.source.signal_stop();
        }
        for handle in &mut handles {
            handle.source.stop();
        }
        tracing::info!(target: "watcher", "All watchers stopped");
    }

    /// Pick the sync policy for a user-supplied directory
    pub fn classify(&self, source: &Path) -> SyncPolicy {
        if self.is_build_output(source) {
            SyncPolicy::CascadeThroughStaging {
                live: self.live_target.clone(),
            }
        } else {
            SyncPolicy::IncrementalMerge
        }
    }

    fn is_build_output(&self, path: &Path) -> bool {
        self.build_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    /// Paths inside or above the managed directories would feed back into themselves
    fn is_reserved(&self, path: &Path) -> bool {
        [&self.local_mirror, &self.live_target]
            .iter()
            .any(|managed| path.starts_with(managed) || managed.starts_with(path))
    }

    fn spawn_handle(&self, entry: WatchEntry) -> Result<WatchHandle, RegistryError> {
        let job = UpdateJob::new(
            entry.source.clone(),
            entry.target.clone(),
            entry.policy.clone(),
            Arc::clone(&self.synchronizer),
            Arc::clone(&self.process),
        );

        let worker = job.clone();
        let source = WatchSource::spawn(
            &entry.source,
            Arc::clone(self.synchronizer.suppression()),
            self.source_config.clone(),
            move |batch: EventBatch| {
                worker.trigger(batch.events);
            },
        )?;

        Ok(WatchHandle { entry, job, source })
    }
}

impl Drop for WatcherRegistry {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
