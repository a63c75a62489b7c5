//! Update Job
//!
//! Per-source single-flight worker. A trigger arriving while a previous run
//! is still in progress is dropped, not queued; syncing is idempotent so the
//! next notification converges the target.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};

use crate::sync::{SyncEvent, TreeSynchronizer};
use crate::watchdog::ProcessControl;

/// How a watch source propagates its changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Stop the process, mirror source onto target, start the process
    MirrorRestart,
    /// Apply the observed events onto target; no restart
    IncrementalMerge,
    /// Overlay source onto the staging target, then mirror staging into
    /// `live` around a stop/start of the process
    CascadeThroughStaging { live: PathBuf },
}

impl SyncPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            SyncPolicy::MirrorRestart => "mirror-restart",
            SyncPolicy::IncrementalMerge => "incremental-merge",
            SyncPolicy::CascadeThroughStaging { .. } => "cascade",
        }
    }

    /// Whether running this policy restarts the process
    pub fn restarts_process(&self) -> bool {
        !matches!(self, SyncPolicy::IncrementalMerge)
    }
}

impl fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct JobInner {
    source: PathBuf,
    target: PathBuf,
    policy: SyncPolicy,
    synchronizer: Arc<TreeSynchronizer>,
    process: Arc<dyn ProcessControl>,
    in_flight: AtomicBool,
    completed: AtomicU64,
}

/// Single-flight sync worker bound to one source/target pair
#[derive(Clone)]
pub struct UpdateJob {
    inner: Arc<JobInner>,
}

/// Clears the in-flight flag when the worker finishes, panics included
struct FlightGuard(Arc<JobInner>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

impl UpdateJob {
    pub fn new(
        source: PathBuf,
        target: PathBuf,
        policy: SyncPolicy,
        synchronizer: Arc<TreeSynchronizer>,
        process: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            inner: Arc::new(JobInner {
                source,
                target,
                policy,
                synchronizer,
                process,
                in_flight: AtomicBool::new(false),
                completed: AtomicU64::new(0),
            }),
        }
    }

    pub fn source(&self) -> &Path {
        &self.inner.source
    }

    pub fn target(&self) -> &Path {
        &self.inner.target
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.inner.policy
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Number of finished runs
    pub fn completed_runs(&self) -> u64 {
        self.inner.completed.load(Ordering::SeqCst)
    }

    /// Start a background run for `events`.
    ///
    /// Returns `None` when a run is already in flight and the trigger was dropped.
    pub fn trigger(&self, events: Vec<SyncEvent>) -> Option<JoinHandle<()>> {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(
                target: "watcher",
                source = %self.inner.source.display(),
                "Sync already in progress, dropping trigger"
            );
            return None;
        }

        let guard = FlightGuard(Arc::clone(&self.inner));
        let name = self
            .inner
            .source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let spawned = thread::Builder::new()
            .name(format!("update-{}", name))
            .spawn(move || {
                let inner = Arc::clone(&guard.0);
                run(&inner, &events);
                inner.completed.fetch_add(1, Ordering::SeqCst);
                drop(guard);
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                // The closure and its guard were dropped, so the flag is already clear.
                tracing::error!(target: "watcher", "Failed to spawn update worker: {}", e);
                None
            }
        }
    }
}

fn run(job: &JobInner, events: &[SyncEvent]) {
    let source = job.source.as_path();
    let target = job.target.as_path();

    match &job.policy {
        SyncPolicy::MirrorRestart => {
            tracing::info!(target: "watcher", source = %source.display(), "Changes detected, restarting server");
            job.process.stop();
            match job.synchronizer.mirror_replace(source, target) {
                Ok(report) => tracing::info!(target: "watcher", copied = report.copied, deleted = report.deleted, "Mirror completed"),
                Err(e) => tracing::error!(target: "watcher", source = %source.display(), "Mirror failed: {}", e),
            }
            start_process(job);
        }
        SyncPolicy::IncrementalMerge => {
            tracing::info!(
                target: "watcher",
                source = %source.display(),
                events = events.len(),
                "Changes detected, merging into staging"
            );
            if let Err(e) = job.synchronizer.apply_events(source, target, events) {
                tracing::error!(target: "watcher", source = %source.display(), "Incremental sync failed: {}", e);
            }
        }
        SyncPolicy::CascadeThroughStaging { live } => {
            tracing::info!(target: "watcher", source = %source.display(), "Build output changed, staging and restarting");
            if let Err(e) = job.synchronizer.overlay_top_level(source, target) {
                tracing::error!(target: "watcher", source = %source.display(), "Staging failed: {}", e);
                return;
            }
            job.process.stop();
            if let Err(e) = job.synchronizer.mirror_replace(target, live) {
                tracing::error!(target: "watcher", live = %live.display(), "Mirror into live failed: {}", e);
            }
            start_process(job);
        }
    }
}

fn start_process(job: &JobInner) {
    match job.process.start() {
        Ok(()) => tracing::info!(target: "watcher", "Server restarted"),
        Err(e) => tracing::error!(target: "watcher", "Server failed to start after sync: {}", e),
    }
}
