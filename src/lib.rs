//! mod-warden - game server supervisor with live mod synchronization
//!
//! This crate provides:
//! - Supervision of the server process with a stdin command channel and
//!   captured output
//! - Directory watchers that mirror or merge mod directories into the
//!   server's live mod directory without feedback loops
//! - TPS health probing with restart policies
//! - JSON configuration with backups and repair
//! - An operator console

pub mod config;
pub mod console;
pub mod core;
pub mod logging;
pub mod monitor;
pub mod sync;
pub mod watchdog;
pub mod watcher;

// Re-export commonly used items
pub use config::{ConfigStore, WardenConfig};
pub use core::error::{Result, WardenError};
pub use monitor::{HealthMonitor, MonitorConfig};
pub use sync::{SuppressionRegistry, TreeSynchronizer};
pub use watchdog::{ProcessControl, ProcessSupervisor};
pub use watcher::{SyncPolicy, UpdateJob, WatcherRegistry};
