//! Utility functions for mod-warden
//!
//! Common helper functions used throughout the application.

use std::path::{Component, Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Normalize a path to an absolute, lexically cleaned form.
///
/// Does not touch the filesystem, so it works for paths that no longer exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Split a command line into arguments, honoring single and double quotes.
///
/// Quote characters are stripped; whitespace inside quotes is preserved.
pub fn split_args(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut in_double = false;
    let mut in_single = false;

    for c in line.chars() {
        match c {
            '"' if !in_single => in_double = !in_double,
            '\'' if !in_double => in_single = !in_single,
            c if c.is_whitespace() && !in_double && !in_single => {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        result.push(current);
    }

    result
}

/// Join a thread, giving up after `timeout`.
///
/// Returns true if the thread finished and was joined. A thread that is still
/// running after the timeout is detached.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!(
                thread = handle.thread().name().unwrap_or("<unnamed>"),
                "Thread did not finish within {:?}, detaching",
                timeout
            );
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    if handle.join().is_err() {
        tracing::warn!("Joined thread had panicked");
    }
    true
}

/// Current wall-clock time as epoch milliseconds
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/srv/game/./mods/../assets")),
            PathBuf::from("/srv/game/assets")
        );
        assert!(normalize_path(Path::new("relative/dir")).is_absolute());
    }

    #[test]
    fn test_split_args() {
        assert_eq!(
            split_args("--assets ../Assets.zip --backup"),
            vec!["--assets", "../Assets.zip", "--backup"]
        );
        assert_eq!(
            split_args(r#"--name "My Server" --motd 'hello world'  -x"#),
            vec!["--name", "My Server", "--motd", "hello world", "-x"]
        );
        assert_eq!(split_args(r#"--quote "it's""#), vec!["--quote", "it's"]);
        assert!(split_args("   ").is_empty());
    }

    #[test]
    fn test_join_with_timeout() {
        let quick = std::thread::spawn(|| {});
        assert!(join_with_timeout(quick, Duration::from_secs(1)));

        let slow = std::thread::spawn(|| std::thread::sleep(Duration::from_millis(500)));
        assert!(!join_with_timeout(slow, Duration::from_millis(50)));
    }

    proptest! {
        /// Unquoted tokens without whitespace survive a join/split cycle
        #[test]
        fn split_args_plain_tokens(tokens in prop::collection::vec("[a-zA-Z0-9_./=-]{1,12}", 0..8)) {
            let line = tokens.join(" ");
            prop_assert_eq!(split_args(&line), tokens);
        }
    }
}
