//! Periodic restart marker
//!
//! A text file holding the epoch-millis time of the last periodic restart.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the marker, placed next to the config file
pub const MARKER_FILE_NAME: &str = "monitor.last_restart";

#[derive(Debug, Clone)]
pub struct PeriodicMarker {
    path: PathBuf,
}

impl PeriodicMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker stored in `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(MARKER_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last periodic restart in epoch millis; 0 when absent or unreadable
    pub fn read(&self) -> i64 {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(target: "monitor", path = %self.path.display(), "Failed to read restart marker: {}", e);
                return 0;
            }
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return 0;
        }
        trimmed.parse().unwrap_or_else(|_| {
            tracing::warn!(target: "monitor", path = %self.path.display(), "Unparsable restart marker, treating as never");
            0
        })
    }

    pub fn write(&self, epoch_millis: i64) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, epoch_millis.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_marker_reads_zero() {
        let temp = TempDir::new().unwrap();
        assert_eq!(PeriodicMarker::in_dir(temp.path()).read(), 0);
    }

    #[test]
    fn test_marker_write_then_read() {
        let temp = TempDir::new().unwrap();
        let marker = PeriodicMarker::in_dir(&temp.path().join("state"));
        marker.write(1_700_000_000_123).unwrap();

        assert_eq!(marker.read(), 1_700_000_000_123);
        assert_eq!(
            fs::read_to_string(temp.path().join("state").join(MARKER_FILE_NAME)).unwrap(),
            "1700000000123"
        );
    }

    #[test]
    fn test_garbage_marker_reads_zero() {
        let temp = TempDir::new().unwrap();
        let marker = PeriodicMarker::in_dir(temp.path());
        fs::write(marker.path(), "yesterday").unwrap();
        assert_eq!(marker.read(), 0);

        fs::write(marker.path(), "  \n").unwrap();
        assert_eq!(marker.read(), 0);

        fs::write(marker.path(), " 42\n").unwrap();
        assert_eq!(marker.read(), 42);
    }
}
