//! CLI command implementations

pub mod config;
pub mod scan;
pub mod watch;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use watcher::WatcherConfig;

/// Load the config file if one was given, defaults otherwise
pub fn load_config(path: Option<&Path>) -> Result<WatcherConfig> {
    match path {
        Some(path) => WatcherConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(WatcherConfig::default()),
    }
}

/// Canonical form of every root, failing on the first that is not a directory
pub fn resolve_roots(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    roots
        .iter()
        .map(|root| {
            let resolved = root
                .canonicalize()
                .with_context(|| format!("Cannot resolve {}", root.display()))?;
            anyhow::ensure!(resolved.is_dir(), "{} is not a directory", root.display());
            Ok(resolved)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_defaults_without_file() {
        assert_eq!(load_config(None).unwrap(), WatcherConfig::default());
    }

    #[test]
    fn test_load_config_reports_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("treewatch.toml");
        std::fs::write(&path, "[debounce]\nwindow_ms = 0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("debounce.window_ms"));
    }

    #[test]
    fn test_resolve_roots() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, b"x").unwrap();

        let roots = resolve_roots(&[temp_dir.path().to_path_buf()]).unwrap();
        assert_eq!(roots, vec![temp_dir.path().canonicalize().unwrap()]);

        assert!(resolve_roots(&[file]).is_err());
        assert!(resolve_roots(&[temp_dir.path().join("missing")]).is_err());
    }
}
