//! Stability Wait
//!
//! Timed polling that waits for a file or a directory tree to stop changing
//! before it is copied, so partially written files are not mirrored.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Polling parameters for stability waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityConfig {
    /// Interval between size polls
    pub poll_interval: Duration,
    /// Quiet period after which a single file counts as stable
    pub file_quiet: Duration,
    /// Upper bound on waiting for a single file
    pub file_ceiling: Duration,
    /// Quiet period required of every file in a tree
    pub tree_quiet: Duration,
    /// Upper bound on waiting for a tree
    pub tree_ceiling: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            file_quiet: Duration::from_millis(500),
            file_ceiling: Duration::from_secs(5),
            tree_quiet: Duration::from_millis(1000),
            tree_ceiling: Duration::from_secs(15),
        }
    }
}

impl StabilityConfig {
    /// No waiting at all; every path is immediately stable
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            file_quiet: Duration::ZERO,
            file_ceiling: Duration::ZERO,
            tree_quiet: Duration::ZERO,
            tree_ceiling: Duration::ZERO,
        }
    }
}

/// Outcome of a stability wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Size stopped changing for the quiet period
    Stable,
    /// The ceiling elapsed while the path was still changing
    TimedOut,
    /// The path disappeared while waiting
    Vanished,
}

/// Wait until the size of the file at `path` has been unchanged for the quiet period.
pub fn wait_file_stable(path: &Path, config: &StabilityConfig) -> Stability {
    let start = Instant::now();
    let mut last_size = match file_size(path) {
        Ok(size) => size,
        Err(_) => return Stability::Vanished,
    };
    let mut last_change = start;

    loop {
        let now = Instant::now();
        if now.duration_since(last_change) >= config.file_quiet {
            return Stability::Stable;
        }
        if now.duration_since(start) >= config.file_ceiling {
            tracing::debug!(target: "sync", path = %path.display(), "File still changing, proceeding");
            return Stability::TimedOut;
        }

        std::thread::sleep(config.poll_interval);

        match file_size(path) {
            Ok(size) if size != last_size => {
                last_size = size;
                last_change = Instant::now();
            }
            Ok(_) => {}
            Err(_) => return Stability::Vanished,
        }
    }
}

/// Wait until every regular file under `root` has kept its size for the tree
/// quiet period, with no files appearing or disappearing in that window.
pub fn wait_tree_stable(root: &Path, config: &StabilityConfig) -> Stability {
    let start = Instant::now();
    let mut previous: Option<HashMap<PathBuf, u64>> = None;
    let mut last_change = start;

    loop {
        let snapshot = match snapshot_sizes(root) {
            Ok(snapshot) => snapshot,
            Err(_) => return Stability::Vanished,
        };
        let now = Instant::now();

        if previous.as_ref().is_some_and(|previous| *previous != snapshot) {
            last_change = now;
        }
        previous = Some(snapshot);

        if now.duration_since(last_change) >= config.tree_quiet {
            return Stability::Stable;
        }
        if now.duration_since(start) >= config.tree_ceiling {
            tracing::debug!(target: "sync", root = %root.display(), "Tree still changing, proceeding");
            return Stability::TimedOut;
        }

        std::thread::sleep(config.poll_interval);
    }
}

fn file_size(path: &Path) -> io::Result<u64> {
    let metadata = fs::metadata(path)?;
    if metadata.is_file() {
        Ok(metadata.len())
    } else {
        Err(io::Error::new(io::ErrorKind::Other, "not a regular file"))
    }
}

fn snapshot_sizes(root: &Path) -> io::Result<HashMap<PathBuf, u64>> {
    let mut sizes = HashMap::new();
    collect_sizes(root, &mut sizes)?;
    Ok(sizes)
}

fn collect_sizes(dir: &Path, out: &mut HashMap<PathBuf, u64>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };

        if metadata.is_dir() {
            // A subdirectory vanishing mid-walk only shrinks the snapshot.
            let _ = collect_sizes(&path, out);
        } else if metadata.is_file() {
            out.insert(path, metadata.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fast() -> StabilityConfig {
        StabilityConfig {
            poll_interval: Duration::from_millis(10),
            file_quiet: Duration::from_millis(30),
            file_ceiling: Duration::from_millis(300),
            tree_quiet: Duration::from_millis(30),
            tree_ceiling: Duration::from_millis(300),
        }
    }

    #[test]
    fn test_file_stable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.jar");
        fs::write(&path, b"content").unwrap();

        assert_eq!(wait_file_stable(&path, &fast()), Stability::Stable);
    }

    #[test]
    fn test_missing_file_vanished() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.jar");
        assert_eq!(wait_file_stable(&path, &fast()), Stability::Vanished);
    }

    #[test]
    fn test_growing_file_times_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("growing.jar");
        fs::write(&path, b"x").unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            for i in 0..40 {
                let data = vec![b'x'; i + 2];
                let _ = fs::write(&writer_path, data);
                std::thread::sleep(Duration::from_millis(10));
            }
        });

        let config = StabilityConfig {
            file_quiet: Duration::from_millis(100),
            file_ceiling: Duration::from_millis(150),
            ..fast()
        };
        assert_eq!(wait_file_stable(&path, &config), Stability::TimedOut);
        writer.join().unwrap();
    }

    #[test]
    fn test_tree_stable() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("nested")).unwrap();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();
        fs::write(temp.path().join("nested/b.txt"), b"b").unwrap();

        assert_eq!(wait_tree_stable(temp.path(), &fast()), Stability::Stable);
    }

    #[test]
    fn test_immediate_config() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();

        let config = StabilityConfig::immediate();
        assert_eq!(wait_tree_stable(temp.path(), &config), Stability::Stable);
        assert_eq!(
            wait_file_stable(&temp.path().join("a.txt"), &config),
            Stability::Stable
        );
    }
}
