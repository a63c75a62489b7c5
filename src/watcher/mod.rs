//! File Watcher Module
//!
//! One [`WatchSource`] per monitored directory: a long-lived thread polls
//! notify-rs events, batches them, drops events for paths the synchronizer
//! is currently writing, and hands the remaining batch to a handler
//! (normally an [`UpdateJob`]).

pub mod assets;
pub mod job;
pub mod registry;

pub use assets::{AssetsWatcher, AssetsWatcherConfig};
pub use job::{SyncPolicy, UpdateJob};
pub use registry::{RegistryLayout, WatchEntry, WatcherRegistry, DEFAULT_BUILD_PATTERNS};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use uuid::Uuid;

use crate::core::error::RegistryError;
use crate::core::utils::{join_with_timeout, normalize_path};
use crate::sync::{SuppressionRegistry, SyncEvent};

/// Batch of sync events collected in one polling round
#[derive(Debug, Clone)]
pub struct EventBatch {
    /// Unique batch ID
    pub id: Uuid,
    /// Events in arrival order
    pub events: Vec<SyncEvent>,
    /// Timestamp when batch was created
    pub created_at: Instant,
}

impl EventBatch {
    fn new(events: Vec<SyncEvent>) -> Self {
        Self {
            id: Uuid::now_v7(),
            events,
            created_at: Instant::now(),
        }
    }

    /// Whether any event signals lost notifications
    pub fn has_overflow(&self) -> bool {
        self.events.iter().any(SyncEvent::is_overflow)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Configuration for a WatchSource
#[derive(Debug, Clone)]
pub struct WatchSourceConfig {
    /// How long one poll waits for the first event (default: 1s)
    pub poll_timeout: Duration,
    /// Quiet window used to gather follow-up events into the same batch
    pub batch_window: Duration,
    /// Maximum batch size before forcing a flush
    pub max_batch_size: usize,
    /// Bounded join when the source is stopped
    pub join_timeout: Duration,
}

impl Default for WatchSourceConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            batch_window: Duration::from_millis(100),
            max_batch_size: 1000,
            join_timeout: Duration::from_millis(2000),
        }
    }
}

type RawEvent = notify::Result<Event>;

/// A watched directory and its polling thread
pub struct WatchSource {
    root: PathBuf,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    join_timeout: Duration,
    _watcher: RecommendedWatcher,
}

impl WatchSource {
    /// Start watching `root` recursively, delivering filtered batches to `handler`
    pub fn spawn<F>(
        root: &Path,
        suppression: Arc<SuppressionRegistry>,
        config: WatchSourceConfig,
        handler: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(EventBatch) + Send + 'static,
    {
        let root = normalize_path(root);
        let watch_failed = |e: notify::Error| RegistryError::WatchFailed {
            path: root.clone(),
            reason: e.to_string(),
        };

        let (tx, rx) = mpsc::channel::<RawEvent>();
        let mut watcher = notify::recommended_watcher(tx).map_err(watch_failed)?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(watch_failed)?;

        let running = Arc::new(AtomicBool::new(true));
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());

        let poller = Poller {
            root: root.clone(),
            canonical_root: root.canonicalize().ok(),
            suppression,
            config: config.clone(),
            running: Arc::clone(&running),
        };

        let thread = thread::Builder::new()
            .name(format!("watch-{}", name))
            .spawn(move || poller.run(rx, handler))
            .map_err(|e| RegistryError::WatchFailed {
                path: root.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(target: "watcher", root = %root.display(), "Watcher active");

        Ok(Self {
            root,
            running,
            thread: Some(thread),
            join_timeout: config.join_timeout,
            _watcher: watcher,
        })
    }

    /// The watched directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Ask the polling thread to exit without waiting for it
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop the polling thread and join it with a bounded wait
    pub fn stop(&mut self) {
        self.signal_stop();
        if let Some(thread) = self.thread.take() {
            join_with_timeout(thread, self.join_timeout);
            tracing::info!(target: "watcher", root = %self.root.display(), "Watcher stopped");
        }
    }
}

impl Drop for WatchSource {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Poller {
    root: PathBuf,
    canonical_root: Option<PathBuf>,
    suppression: Arc<SuppressionRegistry>,
    config: WatchSourceConfig,
    running: Arc<AtomicBool>,
}

impl Poller {
    fn run<F>(self, rx: Receiver<RawEvent>, handler: F)
    where
        F: Fn(EventBatch),
    {
        while self.running.load(Ordering::SeqCst) {
            let first = match rx.recv_timeout(self.config.poll_timeout) {
                Ok(raw) => raw,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let mut events = self.translate(first);
            while events.len() < self.config.max_batch_size {
                match rx.recv_timeout(self.config.batch_window) {
                    Ok(raw) => events.extend(self.translate(raw)),
                    Err(_) => break,
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if let Some(events) = filter_suppressed(&self.root, events, &self.suppression) {
                let batch = EventBatch::new(events);
                tracing::debug!(
                    target: "watcher",
                    root = %self.root.display(),
                    batch = %batch.id,
                    events = batch.len(),
                    "Forwarding event batch"
                );
                handler(batch);
            }
        }

        tracing::debug!(target: "watcher", root = %self.root.display(), "Watch loop finished");
    }

    fn translate(&self, raw: RawEvent) -> Vec<SyncEvent> {
        match raw {
            Ok(event) => translate_event(&self.root, self.canonical_root.as_deref(), &event),
            Err(e) => {
                tracing::warn!(target: "watcher", root = %self.root.display(), "Watch error, forcing resync: {}", e);
                vec![SyncEvent::overflow()]
            }
        }
    }
}

/// Drop events for suppressed paths.
///
/// A batch containing an overflow is returned whole. Returns `None` when
/// nothing is left to forward.
pub(crate) fn filter_suppressed(
    root: &Path,
    events: Vec<SyncEvent>,
    suppression: &SuppressionRegistry,
) -> Option<Vec<SyncEvent>> {
    if events.is_empty() {
        return None;
    }
    if events.iter().any(SyncEvent::is_overflow) {
        return Some(events);
    }

    let remaining: Vec<SyncEvent> = events
        .into_iter()
        .filter(|event| !suppression.is_suppressed(&event.absolute(root)))
        .collect();

    if remaining.is_empty() {
        None
    } else {
        Some(remaining)
    }
}

/// Map one notify event to sync events relative to `root`
pub(crate) fn translate_event(root: &Path, canonical_root: Option<&Path>, event: &Event) -> Vec<SyncEvent> {
    if event.need_rescan() {
        return vec![SyncEvent::overflow()];
    }

    let relative: Vec<PathBuf> = event
        .paths
        .iter()
        .filter_map(|path| relativize(root, canonical_root, path))
        .collect();

    match event.kind {
        EventKind::Create(_) => relative.into_iter().map(SyncEvent::create).collect(),
        EventKind::Remove(_) => relative.into_iter().map(SyncEvent::delete).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => relative.into_iter().map(SyncEvent::delete).collect(),
            RenameMode::To => relative.into_iter().map(SyncEvent::create).collect(),
            RenameMode::Both => {
                let mut events = Vec::with_capacity(2);
                let mut iter = relative.into_iter();
                if let Some(from) = iter.next() {
                    events.push(SyncEvent::delete(from));
                }
                events.extend(iter.map(SyncEvent::create));
                events
            }
            _ => relative
                .into_iter()
                .map(|rel| {
                    if root.join(&rel).exists() {
                        SyncEvent::create(rel)
                    } else {
                        SyncEvent::delete(rel)
                    }
                })
                .collect(),
        },
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            relative.into_iter().map(SyncEvent::modify).collect()
        }
        EventKind::Access(_) => Vec::new(),
    }
}

fn relativize(root: &Path, canonical_root: Option<&Path>, path: &Path) -> Option<PathBuf> {
    let rel = path
        .strip_prefix(root)
        .ok()
        .or_else(|| canonical_root.and_then(|canonical| path.strip_prefix(canonical).ok()))?;
    if rel.as_os_str().is_empty() {
        None
    } else {
        Some(rel.to_path_buf())
    }
}
