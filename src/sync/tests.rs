//! Tests for the sync module
//!
//! Includes property-based tests for the suppression window and tree convergence.

use super::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use proptest::prelude::*;
use tempfile::TempDir;

fn synchronizer() -> TreeSynchronizer {
    TreeSynchronizer::new(
        Arc::new(SuppressionRegistry::new()),
        SynchronizerConfig {
            suppress_window: Duration::from_millis(2000),
            stability: StabilityConfig::immediate(),
        },
    )
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Relative path -> contents for every regular file under `root`
fn tree(root: &Path) -> BTreeMap<String, String> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, String>) {
        for entry in fs::read_dir(dir).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                out.insert(rel, fs::read_to_string(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    if root.exists() {
        walk(root, root, &mut out);
    }
    out
}

// ============================================================================
// Suppression Registry
// ============================================================================

#[test]
fn test_suppression_window() {
    let registry = SuppressionRegistry::new();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("mods/a.jar");

    let now = Instant::now();
    registry.suppress_until(&path, now + Duration::from_millis(2000));

    assert!(registry.is_suppressed_at(&path, now));
    assert!(registry.is_suppressed_at(&path, now + Duration::from_millis(1999)));
    assert!(!registry.is_suppressed_at(&path, now + Duration::from_millis(2000)));
}

#[test]
fn test_suppression_unknown_path() {
    let registry = SuppressionRegistry::new();
    assert!(!registry.is_suppressed(Path::new("/nowhere/x.jar")));
    assert!(registry.is_empty());
}

#[test]
fn test_suppression_extends_never_shrinks() {
    let registry = SuppressionRegistry::new();
    let path = Path::new("/srv/mods/a.jar");
    let now = Instant::now();

    registry.suppress_until(path, now + Duration::from_secs(5));
    registry.suppress_until(path, now + Duration::from_secs(1));

    assert!(registry.is_suppressed_at(path, now + Duration::from_secs(3)));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_suppression_expired_entry_evicted() {
    let registry = SuppressionRegistry::new();
    let path = Path::new("/srv/mods/a.jar");
    let now = Instant::now();

    registry.suppress_until(path, now + Duration::from_millis(10));
    assert!(!registry.is_suppressed_at(path, now + Duration::from_millis(20)));
    assert!(registry.is_empty());
}

#[test]
fn test_suppression_normalizes_paths() {
    let registry = SuppressionRegistry::new();
    registry.suppress(Path::new("/srv/mods/./sub/../a.jar"), Duration::from_secs(2));
    assert!(registry.is_suppressed(Path::new("/srv/mods/a.jar")));
}

proptest! {
    #[test]
    fn prop_suppressed_exactly_until_expiry(window_ms in 1u64..10_000, probe_ms in 0u64..20_000) {
        let registry = SuppressionRegistry::new();
        let path = Path::new("/srv/mods/p.jar");
        let now = Instant::now();
        registry.suppress_until(path, now + Duration::from_millis(window_ms));

        let suppressed = registry.is_suppressed_at(path, now + Duration::from_millis(probe_ms));
        prop_assert_eq!(suppressed, probe_ms < window_ms);
    }

    #[test]
    fn prop_expiry_is_max_of_requests(a in 1u64..5_000, b in 1u64..5_000) {
        let registry = SuppressionRegistry::new();
        let path = Path::new("/srv/mods/q.jar");
        let now = Instant::now();
        registry.suppress_until(path, now + Duration::from_millis(a));
        registry.suppress_until(path, now + Duration::from_millis(b));

        let max = a.max(b);
        prop_assert!(registry.is_suppressed_at(path, now + Duration::from_millis(max - 1)));
        prop_assert!(!registry.is_suppressed_at(path, now + Duration::from_millis(max)));
    }
}

// ============================================================================
// Mirror Replace
// ============================================================================

#[test]
fn test_mirror_replace_converges() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");

    write(&source, "a.jar", "A");
    write(&source, "b.jar", "B");
    write(&target, "a.jar", "old A");
    write(&target, "c.jar", "C");

    let sync = synchronizer();
    let report = sync.mirror_replace(&source, &target).unwrap();

    assert_eq!(tree(&target), tree(&source));
    assert!(!report.has_errors());
    assert_eq!(report.copied, 2);
}

#[test]
fn test_mirror_replace_nested_tree() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");

    write(&source, "pack/config/settings.json", "{}");
    write(&source, "pack/lib.jar", "L");
    write(&target, "stale/old.txt", "x");

    synchronizer().mirror_replace(&source, &target).unwrap();

    assert_eq!(tree(&target), tree(&source));
    assert!(!target.join("stale").exists());
}

#[test]
fn test_mirror_replace_missing_source_clears_target() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("absent");
    let target = temp.path().join("dst");
    write(&target, "a.jar", "A");
    write(&target, "sub/b.jar", "B");

    synchronizer().mirror_replace(&source, &target).unwrap();

    assert!(target.is_dir());
    assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
}

#[test]
fn test_mirror_replace_creates_target() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("deep/dst");
    write(&source, "a.jar", "A");

    synchronizer().mirror_replace(&source, &target).unwrap();
    assert_eq!(tree(&target), tree(&source));
}

#[test]
fn test_mirror_replace_rejects_overlap() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    write(&source, "a.jar", "A");

    let result = synchronizer().mirror_replace(&source, &source.join("inner"));
    assert!(result.is_err());
    assert!(source.join("a.jar").exists());
}

#[test]
fn test_mirror_replace_suppresses_written_paths() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");
    write(&source, "a.jar", "A");
    write(&target, "c.jar", "C");

    let sync = synchronizer();
    sync.mirror_replace(&source, &target).unwrap();

    assert!(sync.suppression().is_suppressed(&target.join("a.jar")));
    assert!(sync.suppression().is_suppressed(&target.join("c.jar")));
}

#[test]
fn test_mirror_replace_preserves_mtime() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");
    write(&source, "a.jar", "A");

    let old = std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    fs::OpenOptions::new()
        .write(true)
        .open(source.join("a.jar"))
        .unwrap()
        .set_modified(old)
        .unwrap();

    synchronizer().mirror_replace(&source, &target).unwrap();

    let copied = fs::metadata(target.join("a.jar")).unwrap().modified().unwrap();
    assert_eq!(copied, old);
}

// Scenario: a source holding {a.jar, b.jar} against a target holding {a.jar, c.jar}.
#[test]
fn test_mirror_replace_file_sets() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("mods");
    let target = temp.path().join("server/mods");
    write(&source, "a.jar", "new");
    write(&source, "b.jar", "b");
    write(&target, "a.jar", "old");
    write(&target, "c.jar", "c");

    synchronizer().mirror_replace(&source, &target).unwrap();

    let result = tree(&target);
    assert_eq!(result.keys().cloned().collect::<Vec<_>>(), vec!["a.jar", "b.jar"]);
    assert_eq!(result["a.jar"], "new");
}

// ============================================================================
// Apply Events
// ============================================================================

#[test]
fn test_apply_events_create_and_modify() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");
    write(&source, "a.jar", "A2");
    write(&source, "b.jar", "B");
    write(&target, "a.jar", "A1");
    write(&target, "keep.jar", "K");

    let events = vec![SyncEvent::modify("a.jar"), SyncEvent::create("b.jar")];
    let report = synchronizer().apply_events(&source, &target, &events).unwrap();

    let result = tree(&target);
    assert_eq!(result["a.jar"], "A2");
    assert_eq!(result["b.jar"], "B");
    assert_eq!(result["keep.jar"], "K");
    assert_eq!(report.copied, 2);
}

#[test]
fn test_apply_events_delete() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    write(&target, "gone.jar", "G");
    write(&target, "dir/inner.txt", "I");

    let events = vec![SyncEvent::delete("gone.jar"), SyncEvent::delete("dir")];
    let report = synchronizer().apply_events(&source, &target, &events).unwrap();

    assert!(tree(&target).is_empty());
    assert!(!target.join("dir").exists());
    assert_eq!(report.deleted, 3);
}

#[test]
fn test_apply_events_delete_missing_is_noop() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();

    let report = synchronizer()
        .apply_events(&source, &target, &[SyncEvent::delete("never.jar")])
        .unwrap();
    assert!(!report.has_changes());
    assert!(!report.has_errors());
}

#[test]
fn test_apply_events_vanished_source_is_benign() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");
    fs::create_dir_all(&source).unwrap();

    let report = synchronizer()
        .apply_events(&source, &target, &[SyncEvent::create("temp.part")])
        .unwrap();

    assert!(!report.has_errors());
    assert_eq!(report.skipped.len(), 1);
    assert!(!target.join("temp.part").exists());
}

#[test]
fn test_apply_events_new_directory_mirrored() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");
    write(&source, "pack/a.txt", "a");
    write(&source, "pack/sub/b.txt", "b");

    synchronizer()
        .apply_events(&source, &target, &[SyncEvent::create("pack")])
        .unwrap();

    assert_eq!(tree(&target), tree(&source));
}

#[test]
fn test_apply_events_existing_directory_merged() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");
    write(&source, "pack/a.txt", "a2");
    write(&target, "pack/a.txt", "a1");
    write(&target, "pack/local.txt", "mine");

    synchronizer()
        .apply_events(&source, &target, &[SyncEvent::modify("pack")])
        .unwrap();

    let result = tree(&target);
    assert_eq!(result["pack/a.txt"], "a2");
    assert_eq!(result["pack/local.txt"], "mine");
}

#[test]
fn test_apply_events_ignores_escaping_paths() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");
    write(&source, "a.jar", "A");
    write(temp.path(), "outside.txt", "O");

    let events = vec![SyncEvent::delete("../outside.txt"), SyncEvent::create("a.jar")];
    synchronizer().apply_events(&source, &target, &events).unwrap();

    assert!(temp.path().join("outside.txt").exists());
    assert!(target.join("a.jar").exists());
}

// Scenario: an overflow marker anywhere in a batch forces a full mirror.
#[test]
fn test_apply_events_overflow_full_mirror() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");
    write(&source, "a.jar", "A");
    write(&source, "b.jar", "B");
    write(&target, "stale.jar", "S");

    let events = vec![SyncEvent::create("a.jar"), SyncEvent::overflow()];
    synchronizer().apply_events(&source, &target, &events).unwrap();

    assert_eq!(tree(&target), tree(&source));
}

// ============================================================================
// Top-level Merge
// ============================================================================

#[test]
fn test_merge_if_absent_is_non_destructive() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    let target = temp.path().join("dst");
    write(&source, "a.jar", "from source");
    write(&source, "b.jar", "B");
    write(&target, "a.jar", "local");
    write(&target, "c.jar", "C");

    let report = synchronizer().merge_top_level_if_absent(&source, &target).unwrap();

    let result = tree(&target);
    assert_eq!(result["a.jar"], "local");
    assert_eq!(result["b.jar"], "B");
    assert_eq!(result["c.jar"], "C");
    assert_eq!(report.copied, 1);
    assert_eq!(report.deleted, 0);
}

#[test]
fn test_merge_if_absent_missing_source() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("dst");
    write(&target, "c.jar", "C");

    let report = synchronizer()
        .merge_top_level_if_absent(&temp.path().join("absent"), &target)
        .unwrap();
    assert!(!report.has_changes());
    assert!(target.join("c.jar").exists());
}

#[test]
fn test_overlay_replaces_same_named_entries() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("build");
    let target = temp.path().join("staging");
    write(&source, "mod.jar", "v2");
    write(&source, "assets/new.png", "n");
    write(&target, "mod.jar", "v1");
    write(&target, "assets/old.png", "o");
    write(&target, "other.jar", "X");

    synchronizer().overlay_top_level(&source, &target).unwrap();

    let result = tree(&target);
    assert_eq!(result["mod.jar"], "v2");
    assert_eq!(result["other.jar"], "X");
    assert_eq!(result["assets/new.png"], "n");
    assert!(!result.contains_key("assets/old.png"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_mirror_converges(
        source_files in prop::collection::btree_map("[a-e]{1,3}", "[a-z]{0,8}", 0..6),
        target_files in prop::collection::btree_map("[a-e]{1,3}", "[a-z]{0,8}", 0..6),
    ) {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        let target = temp.path().join("dst");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&target).unwrap();

        for (name, contents) in &source_files {
            write(&source, &format!("{}.jar", name), contents);
        }
        for (name, contents) in &target_files {
            write(&target, &format!("{}.jar", name), contents);
        }

        synchronizer().mirror_replace(&source, &target).unwrap();
        prop_assert_eq!(tree(&target), tree(&source));
    }
}
