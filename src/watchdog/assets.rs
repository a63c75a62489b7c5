//! Asset argument discovery
//!
//! Before each launch the assets directory is scanned for archive files and
//! each one is passed to the server as `--assets <absolute path>`.

use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;

use crate::core::utils::normalize_path;

/// File-name pattern of asset archives
pub const ASSET_ARCHIVE_PATTERN: &str = "*.zip";

/// Build `--assets <path>` pairs for every archive in `dir`, in directory
/// iteration order. A missing directory is created and yields no arguments.
pub fn collect_asset_args(dir: &Path) -> Vec<String> {
    list_asset_archives(dir)
        .into_iter()
        .flat_map(|archive| ["--assets".to_string(), archive.display().to_string()])
        .collect()
}

/// Absolute paths of the archives in `dir`
pub fn list_asset_archives(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        match fs::create_dir_all(dir) {
            Ok(()) => tracing::info!(target: "process", dir = %dir.display(), "Created assets directory"),
            Err(e) => tracing::warn!(target: "process", dir = %dir.display(), "Failed to create assets directory: {}", e),
        }
        return Vec::new();
    }

    let pattern = match Pattern::new(ASSET_ARCHIVE_PATTERN) {
        Ok(pattern) => pattern,
        Err(e) => {
            tracing::error!(target: "process", "Invalid asset pattern: {}", e);
            return Vec::new();
        }
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(target: "process", dir = %dir.display(), "Failed to list assets: {}", e);
            return Vec::new();
        }
    };

    entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| pattern.matches(&entry.file_name().to_string_lossy()))
        .map(|entry| normalize_path(&entry.path()))
        .collect()
}

/// Whether `path` names an asset archive
pub fn is_asset_archive(path: &Path) -> bool {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return false,
    };
    Pattern::new(ASSET_ARCHIVE_PATTERN)
        .map(|pattern| pattern.matches(&name))
        .unwrap_or(false)
}
