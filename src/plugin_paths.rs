//! Purpose: Shared plugin-directory and plugin-name path resolution helpers.
//! Exports: `default_plugin_dir`, `resolve_named_plugin_path`, `PluginNameResolveError`.
//! Role: Keep CLI and loader path semantics aligned from one source.
//! Invariants: Default plugin directory remains `~/.plugspace/plugins`.
//! Invariants: Named plugin refs must not contain path separators.

use std::path::{Path, PathBuf};

use crate::core::archive::ARCHIVE_EXTENSION;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PluginNameResolveError {
    ContainsPathSeparator,
    Empty,
}

pub fn default_plugin_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".plugspace").join("plugins")
}

pub fn resolve_named_plugin_path(
    name: &str,
    plugin_dir: &Path,
) -> Result<PathBuf, PluginNameResolveError> {
    if name.is_empty() {
        return Err(PluginNameResolveError::Empty);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(PluginNameResolveError::ContainsPathSeparator);
    }
    let suffix = format!(".{ARCHIVE_EXTENSION}");
    if name.ends_with(&suffix) {
        return Ok(plugin_dir.join(name));
    }
    Ok(plugin_dir.join(format!("{name}{suffix}")))
}

/// True for paths carrying the plugin archive extension.
pub fn is_plugin_archive(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(ARCHIVE_EXTENSION)
}
