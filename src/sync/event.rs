//! Sync events consumed by the tree synchronizer.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Kind of change observed on a watched directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    Create,
    Modify,
    Delete,
    /// The notification channel lost events; only a full resync is safe
    Overflow,
}

/// A change relative to the watched root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    /// Path relative to the watched root (empty for overflow)
    pub path: PathBuf,
}

impl SyncEvent {
    pub fn new(kind: SyncEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self::new(SyncEventKind::Create, path)
    }

    pub fn modify(path: impl Into<PathBuf>) -> Self {
        Self::new(SyncEventKind::Modify, path)
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self::new(SyncEventKind::Delete, path)
    }

    pub fn overflow() -> Self {
        Self::new(SyncEventKind::Overflow, PathBuf::new())
    }

    pub fn is_overflow(&self) -> bool {
        self.kind == SyncEventKind::Overflow
    }

    /// Absolute path of this event under `root`
    pub fn absolute(&self, root: &Path) -> PathBuf {
        root.join(&self.path)
    }
}
