//! Watchdog Module
//!
//! Supervision of the external server process: lifecycle control, the stdin
//! command channel and capture of the combined stdout/stderr stream.

pub mod assets;
pub mod output;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use assets::{collect_asset_args, is_asset_archive, list_asset_archives};
pub use output::{OutputLine, OutputQueue, OUTPUT_QUEUE_CAPACITY};
pub use supervisor::{LaunchSpec, ProcessControl, ProcessState, ProcessSupervisor, SupervisorConfig};
