//! CLI command implementations for Tenantry.

pub mod check;
pub mod rewrite;

use std::path::{Path, PathBuf};

/// Directory relative paths in a config file are resolved against.
pub fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}
