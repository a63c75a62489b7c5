//! Tree Synchronizer
//!
//! Mirror, incremental-apply and merge-copy algorithms between a source and a
//! target directory. Every filesystem mutation is registered with the
//! suppression registry first so the watcher observing the target ignores it.
//! Per-item failures are logged and collected; the operation carries on with
//! the remaining items.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::event::{SyncEvent, SyncEventKind};
use super::stability::{wait_file_stable, wait_tree_stable, Stability, StabilityConfig};
use super::suppression::SuppressionRegistry;
use crate::core::utils::normalize_path;

/// Synchronizer tuning
#[derive(Debug, Clone, Copy)]
pub struct SynchronizerConfig {
    /// How long a written path stays suppressed
    pub suppress_window: Duration,
    /// Stability wait parameters
    pub stability: StabilityConfig,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            suppress_window: Duration::from_millis(2000),
            stability: StabilityConfig::default(),
        }
    }
}

/// Outcome of a synchronization pass
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Files copied into the target
    pub copied: usize,
    /// Paths removed from the target
    pub deleted: usize,
    /// Source paths skipped because they vanished mid-operation
    pub skipped: Vec<PathBuf>,
    /// Per-item failures
    pub errors: Vec<(PathBuf, String)>,
}

impl SyncReport {
    /// Check if anything was written or removed
    pub fn has_changes(&self) -> bool {
        self.copied > 0 || self.deleted > 0
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn absorb(&mut self, other: SyncReport) {
        self.copied += other.copied;
        self.deleted += other.deleted;
        self.skipped.extend(other.skipped);
        self.errors.extend(other.errors);
    }

    fn record_error(&mut self, path: &Path, err: &io::Error) {
        tracing::warn!(target: "sync", path = %path.display(), "Sync item failed: {}", err);
        self.errors.push((path.to_path_buf(), err.to_string()));
    }

    fn record_skip(&mut self, path: &Path) {
        tracing::debug!(target: "sync", path = %path.display(), "Source vanished, skipping");
        self.skipped.push(path.to_path_buf());
    }
}

/// Directory synchronization algorithms
pub struct TreeSynchronizer {
    suppression: Arc<SuppressionRegistry>,
    config: SynchronizerConfig,
}

impl TreeSynchronizer {
    /// Create a synchronizer that reports its writes to `suppression`
    pub fn new(suppression: Arc<SuppressionRegistry>, config: SynchronizerConfig) -> Self {
        Self {
            suppression,
            config,
        }
    }

    /// The shared suppression registry
    pub fn suppression(&self) -> &Arc<SuppressionRegistry> {
        &self.suppression
    }

    pub fn config(&self) -> &SynchronizerConfig {
        &self.config
    }

    /// Make `target` an exact copy of `source`.
    ///
    /// A missing source empties the target. Existing target children are
    /// deleted before the source is copied in.
    pub fn mirror_replace(&self, source: &Path, target: &Path) -> io::Result<SyncReport> {
        check_disjoint(source, target)?;
        let mut report = SyncReport::default();

        if !source.exists() {
            if target.exists() {
                self.delete_children(target, &mut report)?;
            } else {
                self.create_dir_all(target)?;
            }
            tracing::info!(
                target: "sync",
                source = %source.display(),
                target_dir = %target.display(),
                "Source missing, target cleared"
            );
            return Ok(report);
        }

        self.create_dir_all(target)?;
        self.delete_children(target, &mut report)?;

        for entry in fs::read_dir(source)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report.record_error(source, &e);
                    continue;
                }
            };
            let dest = target.join(entry.file_name());
            self.copy_entry_stable(&entry.path(), &dest, &mut report);
        }

        tracing::info!(
            target: "sync",
            source = %source.display(),
            target_dir = %target.display(),
            copied = report.copied,
            deleted = report.deleted,
            errors = report.errors.len(),
            "Mirror sync completed"
        );
        Ok(report)
    }

    /// Apply a batch of observed events from `source` onto `target`.
    ///
    /// An overflow anywhere in the batch replaces the whole batch with a full
    /// mirror. Otherwise only the named paths are touched.
    pub fn apply_events(
        &self,
        source: &Path,
        target: &Path,
        events: &[SyncEvent],
    ) -> io::Result<SyncReport> {
        if events.iter().any(SyncEvent::is_overflow) {
            tracing::info!(
                target: "sync",
                source = %source.display(),
                "Event overflow, falling back to full mirror"
            );
            return self.mirror_replace(source, target);
        }

        check_disjoint(source, target)?;
        self.create_dir_all(target)?;
        let mut report = SyncReport::default();

        for event in events {
            if !is_safe_relative(&event.path) {
                tracing::debug!(target: "sync", path = %event.path.display(), "Ignoring unsafe event path");
                continue;
            }

            let src = source.join(&event.path);
            let dest = target.join(&event.path);

            match event.kind {
                SyncEventKind::Delete => {
                    if fs::symlink_metadata(&dest).is_ok() {
                        self.delete_recursively(&dest, &mut report);
                    }
                }
                SyncEventKind::Create | SyncEventKind::Modify => match fs::metadata(&src) {
                    Ok(metadata) if metadata.is_dir() => {
                        if dest.exists() {
                            if wait_tree_stable(&src, &self.config.stability) == Stability::Vanished {
                                report.record_skip(&src);
                            } else {
                                self.copy_tree(&src, &dest, &mut report);
                            }
                        } else {
                            match self.mirror_replace(&src, &dest) {
                                Ok(sub) => report.absorb(sub),
                                Err(e) => report.record_error(&src, &e),
                            }
                        }
                    }
                    Ok(_) => self.copy_file(&src, &dest, true, &mut report),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => report.record_skip(&src),
                    Err(e) => report.record_error(&src, &e),
                },
                SyncEventKind::Overflow => {}
            }
        }

        tracing::info!(
            target: "sync",
            source = %source.display(),
            target_dir = %target.display(),
            events = events.len(),
            copied = report.copied,
            deleted = report.deleted,
            "Incremental sync completed"
        );
        Ok(report)
    }

    /// Copy top-level entries of `source` that do not yet exist in `target`.
    ///
    /// Existing target content is never overwritten or removed.
    pub fn merge_top_level_if_absent(&self, source: &Path, target: &Path) -> io::Result<SyncReport> {
        self.copy_top_level(source, target, false)
    }

    /// Copy every top-level entry of `source` into `target`, replacing
    /// same-named entries and leaving all others alone.
    pub fn overlay_top_level(&self, source: &Path, target: &Path) -> io::Result<SyncReport> {
        self.copy_top_level(source, target, true)
    }

    fn copy_top_level(&self, source: &Path, target: &Path, overwrite: bool) -> io::Result<SyncReport> {
        check_disjoint(source, target)?;
        self.create_dir_all(target)?;
        let mut report = SyncReport::default();

        if !source.exists() {
            return Ok(report);
        }

        for entry in fs::read_dir(source)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report.record_error(source, &e);
                    continue;
                }
            };
            let dest = target.join(entry.file_name());
            let exists = fs::symlink_metadata(&dest).is_ok();

            if exists && !overwrite {
                continue;
            }
            if exists && dest.is_dir() {
                self.delete_recursively(&dest, &mut report);
            }
            self.copy_entry_stable(&entry.path(), &dest, &mut report);
        }

        tracing::info!(
            target: "sync",
            source = %source.display(),
            target_dir = %target.display(),
            copied = report.copied,
            overwrite,
            "Top-level copy completed"
        );
        Ok(report)
    }

    /// Copy a file or subtree after waiting for it to settle
    fn copy_entry_stable(&self, src: &Path, dest: &Path, report: &mut SyncReport) {
        let metadata = match fs::metadata(src) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                report.record_skip(src);
                return;
            }
            Err(e) => {
                report.record_error(src, &e);
                return;
            }
        };

        if metadata.is_dir() {
            if wait_tree_stable(src, &self.config.stability) == Stability::Vanished {
                report.record_skip(src);
                return;
            }
            self.copy_tree(src, dest, report);
        } else {
            self.copy_file(src, dest, true, report);
        }
    }

    /// Recursively copy `src_dir` into `dest_dir` without deleting anything
    fn copy_tree(&self, src_dir: &Path, dest_dir: &Path, report: &mut SyncReport) {
        if let Err(e) = self.create_dir_all(dest_dir) {
            report.record_error(dest_dir, &e);
            return;
        }

        let entries = match fs::read_dir(src_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                report.record_skip(src_dir);
                return;
            }
            Err(e) => {
                report.record_error(src_dir, &e);
                return;
            }
        };

        for entry in entries.flatten() {
            let src = entry.path();
            let dest = dest_dir.join(entry.file_name());
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => self.copy_tree(&src, &dest, report),
                Ok(_) => self.copy_file(&src, &dest, false, report),
                Err(e) => report.record_error(&src, &e),
            }
        }
    }

    fn copy_file(&self, src: &Path, dest: &Path, wait: bool, report: &mut SyncReport) {
        if wait && wait_file_stable(src, &self.config.stability) == Stability::Vanished {
            report.record_skip(src);
            return;
        }

        if let Some(parent) = dest.parent() {
            if let Err(e) = self.create_dir_all(parent) {
                report.record_error(parent, &e);
                return;
            }
        }

        self.suppress(dest);
        match fs::copy(src, dest) {
            Ok(_) => {
                report.copied += 1;
                preserve_modified(src, dest);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && !src.exists() => report.record_skip(src),
            Err(e) => report.record_error(src, &e),
        }
    }

    fn delete_children(&self, dir: &Path, report: &mut SyncReport) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            match entry {
                Ok(entry) => self.delete_recursively(&entry.path(), report),
                Err(e) => report.record_error(dir, &e),
            }
        }
        Ok(())
    }

    fn delete_recursively(&self, path: &Path, report: &mut SyncReport) {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return,
        };

        if metadata.is_dir() {
            if let Ok(entries) = fs::read_dir(path) {
                for entry in entries.flatten() {
                    self.delete_recursively(&entry.path(), report);
                }
            }
            self.suppress(path);
            match fs::remove_dir(path) {
                Ok(()) => report.deleted += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => report.record_error(path, &e),
            }
        } else {
            self.suppress(path);
            match fs::remove_file(path) {
                Ok(()) => report.deleted += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => report.record_error(path, &e),
            }
        }
    }

    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        if dir.is_dir() {
            return Ok(());
        }
        self.suppress(dir);
        fs::create_dir_all(dir)
    }

    fn suppress(&self, path: &Path) {
        self.suppression.suppress(path, self.config.suppress_window);
    }
}

/// Refuse to sync a directory into itself or into one of its ancestors
fn check_disjoint(source: &Path, target: &Path) -> io::Result<()> {
    let source = normalize_path(source);
    let target = normalize_path(target);
    if source.starts_with(&target) || target.starts_with(&source) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "source {} and target {} overlap",
                source.display(),
                target.display()
            ),
        ));
    }
    Ok(())
}

fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

fn preserve_modified(src: &Path, dest: &Path) {
    let modified = match fs::metadata(src).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return,
    };
    if let Ok(file) = fs::OpenOptions::new().write(true).open(dest) {
        let _ = file.set_modified(modified);
    }
}
