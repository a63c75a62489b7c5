//! Watch Event Suppression
//!
//! Table of absolute path -> expiry instant used to mute watch events caused
//! by the synchronizer's own writes. One registry is shared by every
//! synchronizer and watch source of a warden instance.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::core::utils::normalize_path;

/// Suppression table keyed by normalized absolute path
#[derive(Debug, Default)]
pub struct SuppressionRegistry {
    entries: DashMap<PathBuf, Instant>,
}

impl SuppressionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress events for `path` for `duration` from now.
    ///
    /// Extends an existing entry; an expiry never moves backwards.
    pub fn suppress(&self, path: &Path, duration: Duration) {
        self.suppress_until(path, Instant::now() + duration);
    }

    /// Suppress events for `path` until `until`
    pub fn suppress_until(&self, path: &Path, until: Instant) {
        let key = normalize_path(path);
        self.entries
            .entry(key)
            .and_modify(|expiry| {
                if until > *expiry {
                    *expiry = until;
                }
            })
            .or_insert(until);
    }

    /// Whether `path` is currently suppressed
    pub fn is_suppressed(&self, path: &Path) -> bool {
        self.is_suppressed_at(path, Instant::now())
    }

    /// Whether `path` is suppressed at instant `now`.
    ///
    /// An entry whose expiry is at or before `now` is evicted.
    pub fn is_suppressed_at(&self, path: &Path, now: Instant) -> bool {
        let key = normalize_path(path);
        let expiry = match self.entries.get(&key) {
            Some(entry) => *entry,
            None => return false,
        };

        if now < expiry {
            return true;
        }

        // Only evict if nobody extended the entry in the meantime.
        self.entries.remove_if(&key, |_, current| *current <= now);
        false
    }

    /// Number of entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
