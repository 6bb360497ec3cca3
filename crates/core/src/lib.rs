//! Snapshot model and change detection for Treewatch
//!
//! This crate provides:
//! - Snapshot entries (mtime, size, platform identity)
//! - Path normalization shared by every snapshot key
//! - The snapshot map itself with partial/subtree merge helpers
//! - The diff engine (create/change/delete + identity-based renames)

pub mod diff;
pub mod entry;
pub mod path;
pub mod snapshot;

// Re-exports
pub use diff::{classify, diff, ChangeEvent, ChangeKind, DiffResult, RenamePair};
pub use entry::{FileIdentity, SnapshotEntry};
pub use path::{default_fold_case, fold_case, is_under, normalize_path};
pub use snapshot::Snapshot;
