//! Persistent warden settings in `config.json`
//!
//! The file is rewritten through a temp file and a rename, and every change
//! leaves a timestamped copy in the backup directory. A damaged file never
//! stops startup: readable sections are kept, anything else is moved aside
//! and replaced with defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::utils::normalize_path;
use crate::logging::LoggingConfig;
use crate::monitor::MonitorConfig;
use crate::sync::{StabilityConfig, SynchronizerConfig};
use crate::watcher::DEFAULT_BUILD_PATTERNS;

/// Name of the configuration file in the working directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Current configuration schema version
pub const CONFIG_VERSION: u32 = 1;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Backup error: {0}")]
    Backup(String),
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration store settings
#[derive(Debug, Clone)]
pub struct ConfigStoreConfig {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Path to backup directory
    pub backup_dir: PathBuf,
    /// Maximum number of backups to keep
    pub max_backups: usize,
    /// Whether to create default config if not exists
    pub create_default: bool,
}

impl Default for ConfigStoreConfig {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::in_dir(&cwd)
    }
}

impl ConfigStoreConfig {
    /// Settings for a `config.json` kept in `dir`, backups under `dir/config_backups`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            config_path: dir.join(CONFIG_FILE_NAME),
            backup_dir: dir.join("config_backups"),
            max_backups: 5,
            create_default: true,
        }
    }
}

/// Complete warden configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WardenConfig {
    /// Configuration schema version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Supervised server launch settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Extra directories synchronized into the local mirror
    #[serde(default)]
    pub watchers: Vec<WatcherEntry>,

    /// Health monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Synchronization timings
    #[serde(default)]
    pub sync: SyncSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Last modified timestamp
    #[serde(default = "default_timestamp")]
    pub last_modified: String,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            server: ServerConfig::default(),
            watchers: Vec::new(),
            monitor: MonitorConfig::default(),
            sync: SyncSettings::default(),
            logging: LoggingConfig::default(),
            last_modified: default_timestamp(),
        }
    }
}

impl WardenConfig {
    /// Configured watch paths, skipping blank entries
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        self.watchers
            .iter()
            .map(|w| w.path.trim())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect()
    }
}

/// Server launch configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Server installation directory; the executable lives under `<base>/Server`
    #[serde(default)]
    pub base_path: String,

    /// Executable file name inside `<base>/Server`
    #[serde(default = "default_executable")]
    pub executable_name: String,

    /// Interpreter command prepended to the executable
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,

    /// Static argument string, split honoring quotes
    #[serde(default = "default_args")]
    pub args: String,
}

fn default_executable() -> String {
    "HytaleServer.jar".to_string()
}

fn default_interpreter() -> Vec<String> {
    vec!["java".to_string(), "-jar".to_string()]
}

fn default_args() -> String {
    "--assets ../Assets.zip --backup --backup-dir backups --backup-frequency 30".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            executable_name: default_executable(),
            interpreter: default_interpreter(),
            args: default_args(),
        }
    }
}

impl ServerConfig {
    /// `<base>/Server`, the server's working directory
    pub fn server_dir(&self) -> PathBuf {
        PathBuf::from(self.base_path.trim()).join("Server")
    }

    pub fn executable_path(&self) -> PathBuf {
        self.server_dir().join(&self.executable_name)
    }

    /// The server's live mod directory
    pub fn live_mods_dir(&self) -> PathBuf {
        self.server_dir().join("mods")
    }
}

/// One configured extra watch path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatcherEntry {
    pub path: String,
}

impl WatcherEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Synchronization timing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    /// How long a path written by the synchronizer stays suppressed
    #[serde(default = "default_suppress_window")]
    pub suppress_window_ms: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_file_quiet")]
    pub file_quiet_ms: u64,

    #[serde(default = "default_file_ceiling")]
    pub file_ceiling_ms: u64,

    #[serde(default = "default_tree_quiet")]
    pub tree_quiet_ms: u64,

    #[serde(default = "default_tree_ceiling")]
    pub tree_ceiling_ms: u64,

    /// Glob patterns classifying a watched directory as build output
    #[serde(default = "default_build_patterns")]
    pub build_patterns: Vec<String>,
}

fn default_suppress_window() -> u64 {
    2000
}

fn default_poll_interval() -> u64 {
    250
}

fn default_file_quiet() -> u64 {
    500
}

fn default_file_ceiling() -> u64 {
    5000
}

fn default_tree_quiet() -> u64 {
    1000
}

fn default_tree_ceiling() -> u64 {
    15000
}

fn default_build_patterns() -> Vec<String> {
    DEFAULT_BUILD_PATTERNS.iter().map(|p| p.to_string()).collect()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            suppress_window_ms: default_suppress_window(),
            poll_interval_ms: default_poll_interval(),
            file_quiet_ms: default_file_quiet(),
            file_ceiling_ms: default_file_ceiling(),
            tree_quiet_ms: default_tree_quiet(),
            tree_ceiling_ms: default_tree_ceiling(),
            build_patterns: default_build_patterns(),
        }
    }
}

impl SyncSettings {
    pub fn stability(&self) -> StabilityConfig {
        StabilityConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            file_quiet: Duration::from_millis(self.file_quiet_ms),
            file_ceiling: Duration::from_millis(self.file_ceiling_ms),
            tree_quiet: Duration::from_millis(self.tree_quiet_ms),
            tree_ceiling: Duration::from_millis(self.tree_ceiling_ms),
        }
    }

    pub fn synchronizer(&self) -> SynchronizerConfig {
        SynchronizerConfig {
            suppress_window: Duration::from_millis(self.suppress_window_ms),
            stability: self.stability(),
        }
    }
}

/// How a configuration was obtained on load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The file parsed as-is
    Loaded,
    /// No file existed; defaults were written
    Created,
    /// Readable sections were salvaged and the file rewritten
    Repaired,
    /// The file was unusable, moved aside, and defaults written
    Replaced { backup: PathBuf },
}

/// Configuration store with thread-safe access
pub struct ConfigStore {
    config: Arc<RwLock<WardenConfig>>,
    settings: ConfigStoreConfig,
    outcome: LoadOutcome,
}

impl ConfigStore {
    /// Create a new configuration store
    pub async fn new(settings: ConfigStoreConfig) -> ConfigResult<Self> {
        // Ensure directories exist
        if let Some(parent) = settings.config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all(&settings.backup_dir).await?;

        // Load or create config
        let (config, outcome) = if settings.config_path.exists() {
            Self::load_or_repair(&settings.config_path).await?
        } else if settings.create_default {
            let default_config = WardenConfig::default();
            Self::save_to_file(&settings.config_path, &default_config).await?;
            tracing::info!(path = %settings.config_path.display(), "Default configuration created");
            (default_config, LoadOutcome::Created)
        } else {
            return Err(ConfigError::NotFound(settings.config_path.clone()));
        };

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            settings,
            outcome,
        })
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> ConfigResult<WardenConfig> {
        let content = tokio::fs::read_to_string(path).await?;
        if content.trim().is_empty() {
            return Err(ConfigError::Invalid("configuration file is empty".to_string()));
        }
        let config: WardenConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load the file, salvaging what parses or replacing it with defaults
    async fn load_or_repair(path: &Path) -> ConfigResult<(WardenConfig, LoadOutcome)> {
        let error = match Self::load_from_file(path).await {
            Ok(config) => return Ok((config, LoadOutcome::Loaded)),
            Err(ConfigError::Io(e)) => return Err(ConfigError::Io(e)),
            Err(e) => e,
        };
        tracing::warn!(path = %path.display(), "Failed to read configuration: {}", error);

        let content = tokio::fs::read_to_string(path).await?;
        if let Some(repaired) = salvage(&content) {
            Self::save_to_file(path, &repaired).await?;
            tracing::warn!(path = %path.display(), "Configuration repaired");
            return Ok((repaired, LoadOutcome::Repaired));
        }

        let backup = Self::move_aside(path).await?;
        let default_config = WardenConfig::default();
        Self::save_to_file(path, &default_config).await?;
        tracing::warn!(
            path = %path.display(),
            backup = %backup.display(),
            "Invalid configuration moved aside, defaults restored"
        );
        Ok((default_config, LoadOutcome::Replaced { backup }))
    }

    /// Rename `path` to `<name>.bak-YYYYMMDD-HHMMSS` next to it
    async fn move_aside(path: &Path) -> ConfigResult<PathBuf> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ConfigError::Backup(format!("not a file path: {}", path.display())))?;
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let backup = path.with_file_name(format!("{}.bak-{}", file_name, timestamp));
        tokio::fs::rename(path, &backup)
            .await
            .map_err(|e| ConfigError::Backup(format!("{}: {}", backup.display(), e)))?;
        Ok(backup)
    }

    /// Save configuration to file with atomic write
    async fn save_to_file(path: &Path, config: &WardenConfig) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(config)?;

        // Write to temp file first
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content).await?;

        // Atomic rename
        tokio::fs::rename(&temp_path, path).await?;

        Ok(())
    }

    /// Get current configuration (read-only)
    pub async fn get(&self) -> WardenConfig {
        self.config.read().await.clone()
    }

    /// Re-read the file from disk, repairing it if needed, and replace the
    /// in-memory configuration
    pub async fn reload(&self) -> ConfigResult<WardenConfig> {
        let mut config = self.config.write().await;
        let (loaded, outcome) = Self::load_or_repair(&self.settings.config_path).await?;
        if outcome != LoadOutcome::Loaded {
            tracing::warn!(path = %self.settings.config_path.display(), ?outcome, "Configuration rewritten on reload");
        }
        *config = loaded;
        Ok(config.clone())
    }

    /// How the configuration was obtained when the store was opened
    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.outcome
    }

    /// Update configuration
    pub async fn update<F>(&self, updater: F) -> ConfigResult<WardenConfig>
    where
        F: FnOnce(&mut WardenConfig),
    {
        let mut config = self.config.write().await;

        // Create backup before modifying
        self.create_backup(&config).await?;

        // Apply update
        updater(&mut config);
        config.last_modified = chrono::Utc::now().to_rfc3339();

        // Save to file
        Self::save_to_file(&self.settings.config_path, &config).await?;

        Ok(config.clone())
    }

    /// Create a backup of current configuration
    async fn create_backup(&self, config: &WardenConfig) -> ConfigResult<()> {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let backup_name = format!("config_backup_{}.json", timestamp);
        let backup_path = self.settings.backup_dir.join(backup_name);

        Self::save_to_file(&backup_path, config).await?;

        // Clean up old backups
        self.cleanup_old_backups().await?;

        Ok(())
    }

    /// Remove old backups exceeding max_backups limit
    async fn cleanup_old_backups(&self) -> ConfigResult<()> {
        let mut backups = self.list_backups().await?;

        // Names carry the timestamp, so sorted order is oldest first
        while backups.len() > self.settings.max_backups {
            let oldest = backups.remove(0);
            tokio::fs::remove_file(&oldest).await?;
        }

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path(&self) -> &Path {
        &self.settings.config_path
    }

    /// Backup files, oldest first
    async fn list_backups(&self) -> ConfigResult<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.settings.backup_dir).await?;
        let mut backups: Vec<PathBuf> = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                backups.push(path);
            }
        }

        backups.sort();
        Ok(backups)
    }
}

// Convenience methods for specific config sections
impl ConfigStore {
    /// Record the server base path
    pub async fn set_base_path(&self, base_path: &Path) -> ConfigResult<WardenConfig> {
        let base_path = base_path.to_string_lossy().into_owned();
        self.update(|config| {
            config.server.base_path = base_path;
        })
        .await
    }

    /// Add a watch path; a path already listed in any spelling is not duplicated
    pub async fn add_watch_path(&self, path: &Path) -> ConfigResult<WardenConfig> {
        let normalized = normalize_path(path);
        self.update(|config| {
            if !config.watchers.iter().any(|w| same_path(&w.path, &normalized)) {
                config
                    .watchers
                    .push(WatcherEntry::new(normalized.to_string_lossy().into_owned()));
            }
        })
        .await
    }

    /// Remove every entry naming `path`
    pub async fn remove_watch_path(&self, path: &Path) -> ConfigResult<WardenConfig> {
        let normalized = normalize_path(path);
        self.update(|config| {
            config.watchers.retain(|w| !same_path(&w.path, &normalized));
        })
        .await
    }

    /// Whether `path` is listed in the persisted watchers
    pub async fn has_watch_path(&self, path: &Path) -> bool {
        let normalized = normalize_path(path);
        self.config
            .read()
            .await
            .watchers
            .iter()
            .any(|w| same_path(&w.path, &normalized))
    }

    /// Replace the health monitor settings
    pub async fn set_monitor_config(&self, monitor: MonitorConfig) -> ConfigResult<WardenConfig> {
        self.update(|config| {
            config.monitor = monitor;
        })
        .await
    }
}

/// Rebuild a configuration from a file that is JSON but not a valid
/// `WardenConfig`. Each section that still deserializes is kept; the rest
/// fall back to defaults. Returns `None` when the content is not a JSON object.
pub(crate) fn salvage(content: &str) -> Option<WardenConfig> {
    let Ok(Value::Object(root)) = serde_json::from_str::<Value>(content) else {
        return None;
    };

    let mut config = WardenConfig::default();

    if let Some(server) = root.get("server") {
        config.server = salvage_server(server);
    }
    if let Some(Value::Array(list)) = root.get("watchers") {
        config.watchers = list.iter().filter_map(salvage_watcher).collect();
    }
    if let Some(monitor) = root.get("monitor").and_then(|v| MonitorConfig::deserialize(v).ok()) {
        config.monitor = monitor;
    }
    if let Some(sync) = root.get("sync").and_then(|v| SyncSettings::deserialize(v).ok()) {
        config.sync = sync;
    }
    if let Some(logging) = root.get("logging").and_then(|v| LoggingConfig::deserialize(v).ok()) {
        config.logging = logging;
    }

    Some(config)
}

fn same_path(entry: &str, normalized: &Path) -> bool {
    let entry = entry.trim();
    !entry.is_empty() && normalize_path(Path::new(entry)) == normalized
}

fn salvage_server(value: &Value) -> ServerConfig {
    if let Ok(server) = ServerConfig::deserialize(value) {
        return server;
    }

    let mut server = ServerConfig::default();
    let Value::Object(fields) = value else {
        return server;
    };

    if let Some(base) = fields.get("base_path").and_then(scalar_string) {
        server.base_path = base;
    }
    if let Some(name) = fields.get("executable_name").and_then(scalar_string) {
        server.executable_name = name;
    }
    match fields.get("args") {
        // A list of tokens is joined back into one argument line
        Some(Value::Array(tokens)) => {
            server.args = tokens
                .iter()
                .filter_map(scalar_string)
                .map(|t| quote_token(&t))
                .collect::<Vec<_>>()
                .join(" ");
        }
        Some(other) => {
            if let Some(args) = scalar_string(other) {
                server.args = args;
            }
        }
        None => {}
    }
    server
}

fn salvage_watcher(value: &Value) -> Option<WatcherEntry> {
    match value {
        Value::String(path) => Some(WatcherEntry::new(path.clone())),
        Value::Object(fields) => fields
            .get("path")
            .and_then(scalar_string)
            .map(WatcherEntry::new),
        _ => None,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn quote_token(token: &str) -> String {
    if token.chars().any(char::is_whitespace) {
        format!("\"{}\"", token)
    } else {
        token.to_string()
    }
}
