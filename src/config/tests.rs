//! Tests for Configuration Module

use super::storage::salvage;
use super::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn store_settings(dir: &Path) -> ConfigStoreConfig {
    ConfigStoreConfig {
        config_path: dir.join("config.json"),
        backup_dir: dir.join("backups"),
        max_backups: 3,
        create_default: true,
    }
}

/// Create a test config store with temporary directory
async fn create_test_store() -> (ConfigStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = ConfigStore::new(store_settings(temp_dir.path())).await.unwrap();
    (store, temp_dir)
}

fn bak_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.to_string_lossy().contains("config.json.bak-"))
        .collect()
}

// ============================================================================
// Defaults
// ============================================================================

#[tokio::test]
async fn test_create_default_config() {
    let (store, temp) = create_test_store().await;

    assert_eq!(store.load_outcome(), &LoadOutcome::Created);
    assert!(temp.path().join("config.json").exists());

    let config = store.get().await;
    assert_eq!(config.version, CONFIG_VERSION);
    assert!(config.watchers.is_empty());
    assert_eq!(config.server.executable_name, "HytaleServer.jar");
    assert_eq!(config.server.interpreter, vec!["java", "-jar"]);
    assert_eq!(
        config.server.args,
        "--assets ../Assets.zip --backup --backup-dir backups --backup-frequency 30"
    );
    assert_eq!(config.monitor.tps_command, "world perf");
}

#[tokio::test]
async fn test_missing_file_without_create_default() {
    let temp = TempDir::new().unwrap();
    let settings = ConfigStoreConfig {
        create_default: false,
        ..store_settings(temp.path())
    };

    let result = ConfigStore::new(settings).await;
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_sync_settings_conversion() {
    let settings = SyncSettings::default();
    let sync = settings.synchronizer();
    assert_eq!(sync.suppress_window, Duration::from_millis(2000));
    assert_eq!(sync.stability.poll_interval, Duration::from_millis(250));
    assert_eq!(sync.stability.file_quiet, Duration::from_millis(500));
    assert_eq!(sync.stability.file_ceiling, Duration::from_secs(5));
    assert_eq!(sync.stability.tree_quiet, Duration::from_millis(1000));
    assert_eq!(sync.stability.tree_ceiling, Duration::from_secs(15));
    assert_eq!(settings.build_patterns, vec!["**/build/libs", "**/target"]);
}

#[test]
fn test_server_layout_paths() {
    let server = ServerConfig {
        base_path: "/srv/hytale".to_string(),
        ..ServerConfig::default()
    };
    assert_eq!(server.server_dir(), PathBuf::from("/srv/hytale/Server"));
    assert_eq!(
        server.executable_path(),
        PathBuf::from("/srv/hytale/Server/HytaleServer.jar")
    );
    assert_eq!(server.live_mods_dir(), PathBuf::from("/srv/hytale/Server/mods"));
}

#[test]
fn test_watch_paths_skip_blank_entries() {
    let config = WardenConfig {
        watchers: vec![
            WatcherEntry::new("/work/mod-a/build/libs"),
            WatcherEntry::new("   "),
            WatcherEntry::new(" /work/extra "),
        ],
        ..WardenConfig::default()
    };
    assert_eq!(
        config.watch_paths(),
        vec![PathBuf::from("/work/mod-a/build/libs"), PathBuf::from("/work/extra")]
    );
}

#[test]
fn test_partial_file_fills_defaults() {
    let config: WardenConfig =
        serde_json::from_str(r#"{"server": {"base_path": "/srv"}, "monitor": {"tps_min": 12.0}}"#).unwrap();
    assert_eq!(config.server.base_path, "/srv");
    assert_eq!(config.server.executable_name, "HytaleServer.jar");
    assert_eq!(config.monitor.tps_min, 12.0);
    assert_eq!(config.monitor.unresponsive_threshold, 3);
    assert_eq!(config.sync, SyncSettings::default());
}

// ============================================================================
// Updates and Backups
// ============================================================================

#[tokio::test]
async fn test_update_config() {
    let (store, temp) = create_test_store().await;

    let updated = store
        .update(|config| {
            config.server.base_path = "/srv/hytale".to_string();
            config.monitor.tps_min = 15.0;
        })
        .await
        .unwrap();

    assert_eq!(updated.server.base_path, "/srv/hytale");

    // Verify persistence
    let reopened = ConfigStore::new(store_settings(temp.path())).await.unwrap();
    assert_eq!(reopened.load_outcome(), &LoadOutcome::Loaded);
    let reloaded = reopened.get().await;
    assert_eq!(reloaded.server.base_path, "/srv/hytale");
    assert_eq!(reloaded.monitor.tps_min, 15.0);
}

#[tokio::test]
async fn test_add_watch_path() {
    let (store, temp) = create_test_store().await;

    let dir = temp.path().join("extra");
    let updated = store.add_watch_path(&dir).await.unwrap();
    assert_eq!(updated.watch_paths(), vec![dir.clone()]);

    // Adding same path again should not duplicate
    let updated = store.add_watch_path(&dir).await.unwrap();
    assert_eq!(updated.watchers.len(), 1);
}

#[tokio::test]
async fn test_remove_watch_path() {
    let (store, temp) = create_test_store().await;

    let keep = temp.path().join("keep");
    let drop = temp.path().join("drop");
    store.add_watch_path(&keep).await.unwrap();
    store.add_watch_path(&drop).await.unwrap();

    let updated = store.remove_watch_path(&drop).await.unwrap();
    assert_eq!(updated.watch_paths(), vec![keep]);
}

#[tokio::test]
async fn test_set_base_path() {
    let (store, _temp) = create_test_store().await;

    let updated = store.set_base_path(Path::new("/srv/hytale")).await.unwrap();
    assert_eq!(updated.server.base_path, "/srv/hytale");
}

#[tokio::test]
async fn test_backup_creation() {
    let (store, temp) = create_test_store().await;

    // Make several updates to create backups
    for i in 0..5 {
        store
            .update(|config| {
                config.monitor.tps_min = i as f64;
            })
            .await
            .unwrap();
    }

    let mut backups: Vec<PathBuf> = std::fs::read_dir(temp.path().join("backups"))
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with("config_backup_"))
        .collect();
    backups.sort();

    // Should have at most max_backups (3)
    assert!(!backups.is_empty());
    assert!(backups.len() <= 3);

    // The newest backup holds the state before the last update
    let latest: WardenConfig = serde_json::from_str(&std::fs::read_to_string(backups.last().unwrap()).unwrap()).unwrap();
    assert_eq!(latest.monitor.tps_min, 3.0);
}

// ============================================================================
// Repair
// ============================================================================

#[tokio::test]
async fn test_unparsable_file_moved_aside() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.json");
    std::fs::write(&path, "server: [not json").unwrap();

    let store = ConfigStore::new(store_settings(temp.path())).await.unwrap();

    let LoadOutcome::Replaced { backup } = store.load_outcome().clone() else {
        panic!("expected replacement, got {:?}", store.load_outcome());
    };
    assert_eq!(std::fs::read_to_string(&backup).unwrap(), "server: [not json");
    assert_eq!(bak_files(temp.path()), vec![backup]);

    // Defaults were written back in place
    let written: WardenConfig = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written.server, ServerConfig::default());
}

#[tokio::test]
async fn test_empty_file_restored() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("config.json"), "  \n").unwrap();

    let store = ConfigStore::new(store_settings(temp.path())).await.unwrap();

    assert!(matches!(store.load_outcome(), LoadOutcome::Replaced { .. }));
    assert_eq!(store.get().await.server, ServerConfig::default());
}

#[tokio::test]
async fn test_wrong_types_salvaged() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "server": {"base_path": "/srv/hytale", "args": ["--assets", "../My Assets.zip"], "interpreter": 5},
            "watchers": ["/work/a", {"path": "/work/b"}, 42],
            "monitor": "broken"
        }"#,
    )
    .unwrap();

    let store = ConfigStore::new(store_settings(temp.path())).await.unwrap();
    assert_eq!(store.load_outcome(), &LoadOutcome::Repaired);

    let config = store.get().await;
    assert_eq!(config.server.base_path, "/srv/hytale");
    assert_eq!(config.server.args, "--assets \"../My Assets.zip\"");
    assert_eq!(config.server.interpreter, vec!["java", "-jar"]);
    assert_eq!(
        config.watch_paths(),
        vec![PathBuf::from("/work/a"), PathBuf::from("/work/b")]
    );
    assert_eq!(config.monitor.tps_command, "world perf");

    // The rewritten file now parses cleanly
    assert!(bak_files(temp.path()).is_empty());
    let reopened = ConfigStore::new(store_settings(temp.path())).await.unwrap();
    assert_eq!(reopened.load_outcome(), &LoadOutcome::Loaded);
}

#[test]
fn test_salvage_rejects_non_objects() {
    assert!(salvage("[1, 2, 3]").is_none());
    assert!(salvage("not json").is_none());
    assert!(salvage("{}").is_some());
}

#[tokio::test]
async fn test_watch_path_matching_is_normalized() {
    let (store, temp) = create_test_store().await;

    let dir = temp.path().join("extra");
    store.add_watch_path(&dir).await.unwrap();
    let updated = store.add_watch_path(&temp.path().join("extra/../extra/")).await.unwrap();
    assert_eq!(updated.watchers.len(), 1);
    assert!(store.has_watch_path(&temp.path().join("./extra")).await);

    let updated = store.remove_watch_path(&temp.path().join("other/../extra")).await.unwrap();
    assert!(updated.watchers.is_empty());
    assert!(!store.has_watch_path(&dir).await);
}

// ============================================================================
// Reload
// ============================================================================

#[tokio::test]
async fn test_reload_picks_up_external_edits() {
    let (store, temp) = create_test_store().await;

    let mut edited = store.get().await;
    edited.monitor.tps_min = 9.5;
    std::fs::write(
        temp.path().join("config.json"),
        serde_json::to_string_pretty(&edited).unwrap(),
    )
    .unwrap();

    let reloaded = store.reload().await.unwrap();
    assert_eq!(reloaded.monitor.tps_min, 9.5);
    assert_eq!(store.get().await.monitor.tps_min, 9.5);
}

#[tokio::test]
async fn test_reload_repairs_broken_file() {
    let (store, temp) = create_test_store().await;
    store.set_base_path(Path::new("/srv/hytale")).await.unwrap();

    std::fs::write(temp.path().join("config.json"), "{ broken").unwrap();

    let reloaded = store.reload().await.unwrap();
    assert_eq!(reloaded.server, ServerConfig::default());
    assert_eq!(bak_files(temp.path()).len(), 1);
}
