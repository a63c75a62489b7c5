//! mod-warden Core Module
//!
//! Error types and small helpers shared by every subsystem.

pub mod error;
pub mod utils;

pub use error::{ProcessError, RegistryError, Result, WardenError};
