//! Path normalization for snapshot keys
//!
//! Every path that enters a snapshot goes through [`normalize_path`] so
//! that notifications, scans and lookups agree on one spelling. On
//! case-insensitive trees the snapshot additionally keys entries by
//! [`fold_case`] while keeping the on-disk spelling for output.

use std::path::{Component, Path, PathBuf};

/// Whether paths should be case-folded on this platform by default
///
/// Windows and macOS ship case-insensitive filesystems by default.
pub fn default_fold_case() -> bool {
    cfg!(any(windows, target_os = "macos"))
}

/// Normalize a path for use as a snapshot key
///
/// - Drops `.` components and resolves `..` lexically
/// - Rebuilds the path with the platform separator
/// - Strips trailing separators
///
/// The case of every component is preserved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Never pop past the root
                if !matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }

    out
}

/// Lowercased lookup key for case-insensitive trees
pub fn fold_case(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().to_lowercase())
}

/// Component-wise prefix test (`/a/bc` is not under `/a/b`)
pub fn is_under(path: &Path, prefix: &Path) -> bool {
    path.starts_with(prefix)
}
