//! Snapshot diffing and identity-based rename detection

use crate::entry::{FileIdentity, SnapshotEntry};
use crate::snapshot::Snapshot;
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of change reported to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// File appeared
    Created,
    /// File content state (mtime or size) changed
    Changed,
    /// File disappeared
    Deleted,
}

/// A single change, consumed exactly once by the aggregator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Normalized absolute path
    pub path: PathBuf,
    /// What happened
    pub kind: ChangeKind,
}

impl ChangeEvent {
    /// Create a new change event
    pub fn new(path: PathBuf, kind: ChangeKind) -> Self {
        Self { path, kind }
    }

    pub fn created(path: PathBuf) -> Self {
        Self::new(path, ChangeKind::Created)
    }

    pub fn changed(path: PathBuf) -> Self {
        Self::new(path, ChangeKind::Changed)
    }

    pub fn deleted(path: PathBuf) -> Self {
        Self::new(path, ChangeKind::Deleted)
    }
}

/// A delete and a create of the same file identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePair {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
}

impl RenamePair {
    pub fn new(old_path: PathBuf, new_path: PathBuf) -> Self {
        Self { old_path, new_path }
    }
}

/// Output of [`diff`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Plain changes, sorted by path
    pub events: Vec<ChangeEvent>,
    /// Renames, sorted by new path
    pub renames: Vec<RenamePair>,
}

impl DiffResult {
    /// True when nothing changed
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.renames.is_empty()
    }

    /// Total number of reported items
    pub fn len(&self) -> usize {
        self.events.len() + self.renames.len()
    }
}

/// Derive the change kind for one path from its old and new state
///
/// This is the only place kinds are derived; both the live event path and
/// [`diff`] go through it.
pub fn classify(old: Option<&SnapshotEntry>, new: Option<&SnapshotEntry>) -> Option<ChangeKind> {
    match (old, new) {
        (None, Some(_)) => Some(ChangeKind::Created),
        (Some(_), None) => Some(ChangeKind::Deleted),
        (Some(old), Some(new)) if !old.same_file_info(new) => Some(ChangeKind::Changed),
        _ => None,
    }
}

/// Compute the changes that turn `old` into `new`
///
/// A path only in `new` whose identity matches an unmatched path only in
/// `old` is reported as a rename, never as a create/delete pair. When
/// several vanished paths share that identity, the lexicographically first
/// one is paired.
pub fn diff(old: &Snapshot, new: &Snapshot) -> DiffResult {
    // Rename candidates: vanished paths keyed by identity, each list
    // sorted descending so `pop` yields the smallest path
    let mut vanished_by_identity: AHashMap<FileIdentity, Vec<&PathBuf>> = AHashMap::new();
    for (path, entry) in old.iter() {
        if new.contains(path) {
            continue;
        }
        if let Some(identity) = entry.identity {
            vanished_by_identity.entry(identity).or_default().push(path);
        }
    }
    for candidates in vanished_by_identity.values_mut() {
        candidates.sort_unstable_by(|a, b| b.cmp(a));
    }

    let mut result = DiffResult::default();
    let mut matched: AHashSet<&PathBuf> = AHashSet::new();

    for path in new.paths() {
        let Some(new_entry) = new.get(path) else {
            continue;
        };
        let old_entry = old.get(path);

        if old_entry.is_none() {
            let renamed_from = new_entry
                .identity
                .and_then(|identity| vanished_by_identity.get_mut(&identity))
                .and_then(Vec::pop);

            if let Some(old_path) = renamed_from {
                matched.insert(old_path);
                result
                    .renames
                    .push(RenamePair::new(old_path.clone(), path.clone()));
                continue;
            }
        }

        if let Some(kind) = classify(old_entry, Some(new_entry)) {
            result.events.push(ChangeEvent::new(path.clone(), kind));
        }
    }

    for path in old.paths() {
        if !new.contains(path) && !matched.contains(path) {
            result.events.push(ChangeEvent::deleted(path.clone()));
        }
    }

    result.events.sort_by(|a, b| a.path.cmp(&b.path));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn entry(mtime: i64, size: u64, inode: Option<u64>) -> SnapshotEntry {
        SnapshotEntry::new(mtime, size, inode.map(|ino| FileIdentity::new(1, ino)))
    }

    fn snap(items: &[(&str, SnapshotEntry)]) -> Snapshot {
        items
            .iter()
            .map(|(p, e)| (PathBuf::from(p), *e))
            .collect()
    }

    fn kinds(result: &DiffResult) -> Vec<(&Path, ChangeKind)> {
        result
            .events
            .iter()
            .map(|e| (e.path.as_path(), e.kind))
            .collect()
    }

    #[test]
    fn test_classify() {
        let a = entry(1, 1, None);
        let b = entry(2, 1, None);
        assert_eq!(classify(None, Some(&a)), Some(ChangeKind::Created));
        assert_eq!(classify(Some(&a), None), Some(ChangeKind::Deleted));
        assert_eq!(classify(Some(&a), Some(&b)), Some(ChangeKind::Changed));
        assert_eq!(classify(Some(&a), Some(&a)), None);
        assert_eq!(classify(None, None), None);
    }

    #[test]
    fn test_diff_without_renames() {
        let old = snap(&[
            ("/p/kept", entry(1, 1, Some(1))),
            ("/p/touched", entry(1, 1, Some(2))),
            ("/p/resized", entry(1, 1, Some(3))),
            ("/p/gone", entry(1, 1, Some(4))),
        ]);
        let new = snap(&[
            ("/p/kept", entry(1, 1, Some(1))),
            ("/p/touched", entry(2, 1, Some(2))),
            ("/p/resized", entry(1, 2, Some(3))),
            ("/p/fresh", entry(1, 1, Some(5))),
        ]);

        let result = diff(&old, &new);
        assert!(result.renames.is_empty());
        assert_eq!(
            kinds(&result),
            vec![
                (Path::new("/p/fresh"), ChangeKind::Created),
                (Path::new("/p/gone"), ChangeKind::Deleted),
                (Path::new("/p/resized"), ChangeKind::Changed),
                (Path::new("/p/touched"), ChangeKind::Changed),
            ]
        );
    }

    #[test]
    fn test_rename_takes_precedence() {
        let old = snap(&[("/p/A", entry(1, 1, Some(7)))]);
        let new = snap(&[("/p/B", entry(1, 1, Some(7)))]);

        let result = diff(&old, &new);
        assert!(result.events.is_empty());
        assert_eq!(
            result.renames,
            vec![RenamePair::new(PathBuf::from("/p/A"), PathBuf::from("/p/B"))]
        );
    }

    #[test]
    fn test_rename_with_modified_content_is_still_a_rename() {
        let old = snap(&[("/p/A", entry(1, 1, Some(7)))]);
        let new = snap(&[("/p/B", entry(9, 4, Some(7)))]);

        let result = diff(&old, &new);
        assert_eq!(result.renames.len(), 1);
        assert!(result.events.is_empty());
    }

    #[test]
    fn test_no_identity_means_no_rename() {
        let old = snap(&[("/p/A", entry(1, 1, None))]);
        let new = snap(&[("/p/B", entry(1, 1, None))]);

        let result = diff(&old, &new);
        assert!(result.renames.is_empty());
        assert_eq!(
            kinds(&result),
            vec![
                (Path::new("/p/A"), ChangeKind::Deleted),
                (Path::new("/p/B"), ChangeKind::Created),
            ]
        );
    }

    #[test]
    fn test_surviving_path_is_not_a_rename_source() {
        // Hard link: /p/A still exists, /p/B appears with the same inode
        let old = snap(&[("/p/A", entry(1, 1, Some(7)))]);
        let new = snap(&[
            ("/p/A", entry(1, 1, Some(7))),
            ("/p/B", entry(1, 1, Some(7))),
        ]);

        let result = diff(&old, &new);
        assert!(result.renames.is_empty());
        assert_eq!(kinds(&result), vec![(Path::new("/p/B"), ChangeKind::Created)]);
    }

    #[test]
    fn test_each_old_path_matches_at_most_once() {
        let old = snap(&[("/p/A", entry(1, 1, Some(7)))]);
        let new = snap(&[
            ("/p/B", entry(1, 1, Some(7))),
            ("/p/C", entry(1, 1, Some(7))),
        ]);

        let result = diff(&old, &new);
        assert_eq!(
            result.renames,
            vec![RenamePair::new(PathBuf::from("/p/A"), PathBuf::from("/p/B"))]
        );
        assert_eq!(kinds(&result), vec![(Path::new("/p/C"), ChangeKind::Created)]);
    }

    #[test]
    fn test_diff_with_itself_is_empty() {
        let s = snap(&[
            ("/p/a", entry(1, 1, Some(1))),
            ("/p/b", entry(2, 3, None)),
            ("/p/c/d", entry(5, 8, Some(2))),
        ]);
        assert!(diff(&s, &s).is_empty());
        assert!(diff(&Snapshot::new(), &Snapshot::new()).is_empty());
    }

    #[test]
    fn test_diff_from_empty_reports_all_created() {
        let new = snap(&[("/p/a", entry(1, 1, Some(1))), ("/p/b", entry(1, 1, Some(2)))]);
        let result = diff(&Snapshot::new(), &new);
        assert_eq!(result.len(), 2);
        assert!(result.events.iter().all(|e| e.kind == ChangeKind::Created));
    }

    #[test]
    fn test_folded_snapshots_report_on_disk_spelling() {
        let mut old = Snapshot::with_fold_case(true);
        old.insert(PathBuf::from("/W/Notes.TXT"), entry(1, 1, Some(1)));
        old.insert(PathBuf::from("/W/Old.md"), entry(1, 1, Some(2)));
        let mut new = Snapshot::with_fold_case(true);
        new.insert(PathBuf::from("/W/Notes.TXT"), entry(2, 1, Some(1)));
        new.insert(PathBuf::from("/W/Docs/New.md"), entry(1, 1, Some(2)));
        new.insert(PathBuf::from("/W/Fresh.RS"), entry(1, 1, Some(3)));

        let result = diff(&old, &new);
        assert_eq!(
            kinds(&result),
            vec![
                (Path::new("/W/Fresh.RS"), ChangeKind::Created),
                (Path::new("/W/Notes.TXT"), ChangeKind::Changed),
            ]
        );
        assert_eq!(
            result.renames,
            vec![RenamePair::new(
                PathBuf::from("/W/Old.md"),
                PathBuf::from("/W/Docs/New.md")
            )]
        );
    }
}
