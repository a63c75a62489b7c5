//! Configuration Management Module
//!
//! Provides persistent configuration storage with:
//! - JSON file-based storage with atomic writes
//! - Timestamped backups before every change
//! - Repair of damaged configuration files
//! - Thread-safe access

mod storage;
#[cfg(test)]
mod tests;

pub use storage::{
    ConfigError, ConfigResult, ConfigStore, ConfigStoreConfig, LoadOutcome, ServerConfig,
    SyncSettings, WardenConfig, WatcherEntry, CONFIG_FILE_NAME, CONFIG_VERSION,
};
