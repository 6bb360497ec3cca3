//! In-memory snapshot of a watched tree

use crate::entry::SnapshotEntry;
use crate::path::{fold_case, is_under};
use ahash::{AHashMap, AHashSet};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Point-in-time map from normalized path to observed metadata
///
/// Paths are unique because they are the map key. Snapshots are shared
/// behind `Arc` by the watcher; a scan always builds a new one and swaps
/// it in, so a reader never sees a half-written snapshot.
///
/// A case-folding snapshot looks entries up by their lowercased path but
/// hands back the spelling the entry was inserted with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Lookup key -> (spelling as seen on disk, entry)
    entries: AHashMap<PathBuf, (PathBuf, SnapshotEntry)>,
    fold_case: bool,
}

type Record = (PathBuf, SnapshotEntry);

impl Snapshot {
    /// Create a new empty snapshot with case-sensitive keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty snapshot, folding case in lookups when `fold_case` is set
    pub fn with_fold_case(fold_case: bool) -> Self {
        Self {
            entries: AHashMap::new(),
            fold_case,
        }
    }

    /// Whether lookups ignore case
    pub fn folds_case(&self) -> bool {
        self.fold_case
    }

    fn key<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        if self.fold_case {
            Cow::Owned(fold_case(path))
        } else {
            Cow::Borrowed(path)
        }
    }

    /// Insert or replace an entry, returning the previous one
    ///
    /// The stored spelling is always the one from the latest insert.
    pub fn insert(&mut self, path: PathBuf, entry: SnapshotEntry) -> Option<SnapshotEntry> {
        let key = self.key(&path).into_owned();
        self.entries.insert(key, (path, entry)).map(|(_, old)| old)
    }

    /// Get an entry
    pub fn get(&self, path: &Path) -> Option<&SnapshotEntry> {
        self.entries.get(&*self.key(path)).map(|(_, entry)| entry)
    }

    /// The stored spelling of `path`, if present
    pub fn spelling(&self, path: &Path) -> Option<&PathBuf> {
        self.entries.get(&*self.key(path)).map(|(path, _)| path)
    }

    /// Remove an entry
    pub fn remove(&mut self, path: &Path) -> Option<SnapshotEntry> {
        let key = self.key(path);
        self.entries.remove(&*key).map(|(_, entry)| entry)
    }

    /// Whether the snapshot has an entry for `path`
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(&*self.key(path))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &SnapshotEntry)> {
        self.entries.values().map(|(path, entry)| (path, entry))
    }

    /// All paths, sorted
    pub fn paths(&self) -> Vec<&PathBuf> {
        let mut paths: Vec<_> = self.entries.values().map(|(path, _)| path).collect();
        paths.sort_unstable();
        paths
    }

    /// Entries at or below `prefix`, sorted by path
    pub fn entries_under(&self, prefix: &Path) -> Vec<(&PathBuf, &SnapshotEntry)> {
        let prefix = self.key(prefix);
        let mut under: Vec<_> = self
            .entries
            .iter()
            .filter(|(key, _)| is_under(key, &prefix))
            .map(|(_, (path, entry))| (path, entry))
            .collect();
        under.sort_unstable_by(|a, b| a.0.cmp(b.0));
        under
    }

    /// Merge the result of a partial (non-recursive) scan
    ///
    /// Entries whose parent directory is one of `dirty_dirs` are replaced
    /// by `fresh`; everything else is kept as is. Fresh entries outside
    /// the dirty directories are ignored.
    pub fn replace_children<I>(&mut self, dirty_dirs: &[PathBuf], fresh: I)
    where
        I: IntoIterator<Item = (PathBuf, SnapshotEntry)>,
    {
        let dirty: AHashSet<PathBuf> = dirty_dirs
            .iter()
            .map(|dir| self.key(dir).into_owned())
            .collect();
        let in_dirty = |key: &Path| key.parent().is_some_and(|parent| dirty.contains(parent));

        self.entries.retain(|key, _| !in_dirty(key));
        for (path, entry) in fresh {
            if in_dirty(&self.key(&path)) {
                self.insert(path, entry);
            }
        }
    }

    /// Merge the result of a recursive scan rooted at `prefix`
    ///
    /// Every entry at or below `prefix` is replaced by `fresh`.
    pub fn replace_subtree<I>(&mut self, prefix: &Path, fresh: I)
    where
        I: IntoIterator<Item = (PathBuf, SnapshotEntry)>,
    {
        self.replace_subtrees(&[prefix.to_path_buf()], fresh);
    }

    /// Merge the result of one recursive scan covering several prefixes
    ///
    /// Every entry at or below any of `prefixes` is replaced by `fresh`.
    /// Fresh entries outside all prefixes are ignored.
    pub fn replace_subtrees<I>(&mut self, prefixes: &[PathBuf], fresh: I)
    where
        I: IntoIterator<Item = (PathBuf, SnapshotEntry)>,
    {
        let prefixes: Vec<PathBuf> = prefixes
            .iter()
            .map(|prefix| self.key(prefix).into_owned())
            .collect();
        let covered = |key: &Path| prefixes.iter().any(|prefix| is_under(key, prefix));

        self.entries.retain(|key, _| !covered(key));
        for (path, entry) in fresh {
            if covered(&self.key(&path)) {
                self.insert(path, entry);
            }
        }
    }
}

impl FromIterator<(PathBuf, SnapshotEntry)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (PathBuf, SnapshotEntry)>>(iter: T) -> Self {
        let mut snapshot = Snapshot::new();
        snapshot.extend(iter);
        snapshot
    }
}

fn into_record((_, record): (PathBuf, Record)) -> Record {
    record
}

impl IntoIterator for Snapshot {
    type Item = (PathBuf, SnapshotEntry);
    type IntoIter = std::iter::Map<
        std::collections::hash_map::IntoIter<PathBuf, Record>,
        fn((PathBuf, Record)) -> Record,
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.entries
            .into_iter()
            .map(into_record as fn((PathBuf, Record)) -> Record)
    }
}

impl Extend<(PathBuf, SnapshotEntry)> for Snapshot {
    fn extend<T: IntoIterator<Item = (PathBuf, SnapshotEntry)>>(&mut self, iter: T) {
        for (path, entry) in iter {
            self.insert(path, entry);
        }
    }
}
