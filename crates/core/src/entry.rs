//! Per-file snapshot records

use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// Stable per-file identity (device + inode)
///
/// Only available where the platform exposes it. Without it, rename
/// detection degrades to plain delete/create pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Device the file lives on
    pub device: u64,
    /// Inode number on that device
    pub inode: u64,
}

impl FileIdentity {
    /// Create a new identity
    pub const fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }

    /// Read the identity from file metadata, if the platform has one
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self::new(metadata.dev(), metadata.ino()))
    }

    /// Read the identity from file metadata, if the platform has one
    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        None
    }
}

/// Observed state of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Modification time in nanoseconds relative to the Unix epoch
    pub mtime_ns: i64,
    /// Length in bytes
    pub size: u64,
    /// Platform identity, when available
    pub identity: Option<FileIdentity>,
}

impl SnapshotEntry {
    /// Create a new entry
    pub const fn new(mtime_ns: i64, size: u64, identity: Option<FileIdentity>) -> Self {
        Self {
            mtime_ns,
            size,
            identity,
        }
    }

    /// Build an entry from `stat` output
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            mtime_ns: mtime_nanos(metadata),
            size: metadata.len(),
            identity: FileIdentity::from_metadata(metadata),
        }
    }

    /// Whether two entries describe the same content state
    ///
    /// Both mtime and size must match. Tools that touch mtime without
    /// changing content (and the reverse) are reported as changes.
    pub fn same_file_info(&self, other: &SnapshotEntry) -> bool {
        self.mtime_ns == other.mtime_ns && self.size == other.size
    }
}

/// Signed nanoseconds since the epoch; `0` when the platform has no mtime
fn mtime_nanos(metadata: &Metadata) -> i64 {
    let Ok(modified) = metadata.modified() else {
        return 0;
    };

    match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|ns| -ns)
            .unwrap_or(i64::MIN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_file_info_requires_both_fields() {
        let base = SnapshotEntry::new(1_000, 10, None);

        assert!(base.same_file_info(&SnapshotEntry::new(1_000, 10, None)));
        // mtime-only change
        assert!(!base.same_file_info(&SnapshotEntry::new(2_000, 10, None)));
        // size-only change
        assert!(!base.same_file_info(&SnapshotEntry::new(1_000, 11, None)));
    }

    #[test]
    fn test_same_file_info_ignores_identity() {
        let a = SnapshotEntry::new(5, 5, Some(FileIdentity::new(1, 1)));
        let b = SnapshotEntry::new(5, 5, Some(FileIdentity::new(1, 2)));
        assert!(a.same_file_info(&b));
    }

    #[test]
    fn test_from_metadata() -> std::io::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let file = temp_dir.path().join("a.txt");
        std::fs::write(&file, b"hello")?;

        let entry = SnapshotEntry::from_metadata(&std::fs::metadata(&file)?);
        assert_eq!(entry.size, 5);
        assert!(entry.mtime_ns > 0);

        #[cfg(unix)]
        assert!(entry.identity.is_some());
        #[cfg(not(unix))]
        assert!(entry.identity.is_none());

        Ok(())
    }
}
