//! Directory Synchronization Module
//!
//! Mirrors and merges directory trees on behalf of the watchers, and keeps
//! a shared table of paths whose watch events must be ignored because the
//! synchronizer itself produced them.

mod event;
mod stability;
mod suppression;
mod synchronizer;
#[cfg(test)]
mod tests;

pub use event::{SyncEvent, SyncEventKind};
pub use stability::{wait_file_stable, wait_tree_stable, Stability, StabilityConfig};
pub use suppression::SuppressionRegistry;
pub use synchronizer::{SyncReport, SynchronizerConfig, TreeSynchronizer};
