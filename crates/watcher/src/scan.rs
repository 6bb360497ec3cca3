//! Tree scanner
//!
//! Builds snapshots from disk. Every listing of one directory is a chunk
//! that runs on the blocking pool under a permit from a semaphore shared by
//! all sessions; the scanner yields to the runtime between chunks and checks
//! for cancellation. Scans never touch the published snapshot, they return a
//! new one.

use crate::ignore::PathFilter;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, trace};
use treewatch_core::{normalize_path, Snapshot, SnapshotEntry};
use walkdir::WalkDir;

/// Scanner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory listings / stat batches running at once, across all sessions
    pub max_concurrent_io: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { max_concurrent_io: 8 }
    }
}

/// What to scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanRequest {
    /// Every root, recursively; the result replaces the snapshot
    Full,

    /// Direct children of each of `dirs` plus every entry under each of
    /// `subtrees`, diffed in one pass; everything else is carried over
    Partial {
        dirs: Vec<PathBuf>,
        subtrees: Vec<PathBuf>,
    },
}

impl ScanRequest {
    /// Direct children of each directory
    pub fn children(dirs: Vec<PathBuf>) -> Self {
        ScanRequest::Partial {
            dirs,
            subtrees: Vec::new(),
        }
    }

    /// One directory, recursively
    pub fn subtree(prefix: PathBuf) -> Self {
        ScanRequest::Partial {
            dirs: Vec::new(),
            subtrees: vec![prefix],
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, ScanRequest::Full)
    }

    /// Fold `other` into this request so one scan covers both
    ///
    /// A full request absorbs everything.
    pub fn merge(&mut self, other: ScanRequest) {
        match (&mut *self, other) {
            (ScanRequest::Full, _) => {}
            (_, ScanRequest::Full) => *self = ScanRequest::Full,
            (
                ScanRequest::Partial { dirs, subtrees },
                ScanRequest::Partial {
                    dirs: more_dirs,
                    subtrees: more_subtrees,
                },
            ) => {
                for dir in more_dirs {
                    if !dirs.contains(&dir) {
                        dirs.push(dir);
                    }
                }
                for prefix in more_subtrees {
                    if !subtrees.contains(&prefix) {
                        subtrees.push(prefix);
                    }
                }
            }
        }
    }
}

/// Counters for one scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub directories: usize,
    pub files: usize,
    /// Entries or directories skipped because of I/O errors
    pub errors: usize,
    pub elapsed: Duration,
}

/// Result of [`TreeScanner::scan`]
#[derive(Debug)]
pub enum ScanOutcome {
    Completed { snapshot: Snapshot, stats: ScanStats },
    /// The token was cancelled between chunks
    Cancelled,
    /// Another scan holds one of the roots
    AlreadyRunning,
}

/// Cooperative cancellation flag
#[derive(Debug, Clone, Default)]
pub struct ScanToken(Arc<AtomicBool>);

impl ScanToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// On-disk state of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    File(SnapshotEntry),
    Directory,
    Missing,
    /// `stat` failed for another reason (permissions, I/O)
    Unknown,
}

/// Holds the scan slot for a set of roots until dropped
#[derive(Debug)]
pub struct ScanGuard {
    in_flight: Arc<DashMap<PathBuf, ()>>,
    roots: Vec<PathBuf>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        for root in &self.roots {
            self.in_flight.remove(root);
        }
    }
}

/// Shared scanner; clones share the I/O semaphore and the in-flight set
#[derive(Debug, Clone)]
pub struct TreeScanner {
    io_limit: Arc<Semaphore>,
    in_flight: Arc<DashMap<PathBuf, ()>>,
    fold_case: bool,
}

enum Listed {
    Dir(PathBuf),
    File(PathBuf, SnapshotEntry),
}

impl TreeScanner {
    /// Create a new scanner
    pub fn new(config: &ScanConfig, fold_case: bool) -> Self {
        Self {
            io_limit: Arc::new(Semaphore::new(config.max_concurrent_io.max(1))),
            in_flight: Arc::new(DashMap::new()),
            fold_case,
        }
    }

    /// Whether a scan is running for `root`
    pub fn is_scanning(&self, root: &Path) -> bool {
        self.in_flight.contains_key(root)
    }

    /// Claim every root, or none if any is already being scanned
    pub fn begin(&self, roots: &[PathBuf]) -> Option<ScanGuard> {
        let mut claimed = Vec::with_capacity(roots.len());
        for root in roots {
            match self.in_flight.entry(root.clone()) {
                Entry::Occupied(_) => {
                    for path in &claimed {
                        self.in_flight.remove(path);
                    }
                    return None;
                }
                Entry::Vacant(slot) => {
                    slot.insert(());
                    claimed.push(root.clone());
                }
            }
        }

        Some(ScanGuard {
            in_flight: Arc::clone(&self.in_flight),
            roots: claimed,
        })
    }

    /// Run one scan and return the new snapshot
    ///
    /// `previous` is only read for partial scans, whose results are merged
    /// into a copy of it.
    pub async fn scan(
        &self,
        roots: Vec<PathBuf>,
        previous: Arc<Snapshot>,
        request: ScanRequest,
        filter: Arc<dyn PathFilter>,
        token: ScanToken,
    ) -> ScanOutcome {
        let Some(_guard) = self.begin(&roots) else {
            debug!("Scan already running for {:?}", roots);
            return ScanOutcome::AlreadyRunning;
        };

        let started = Instant::now();
        let mut stats = ScanStats::default();

        let snapshot = match request {
            ScanRequest::Full => {
                let mut fresh = Snapshot::with_fold_case(self.fold_case);
                for root in &roots {
                    let walked = self
                        .walk(root, filter.as_ref(), &token, &mut fresh, &mut stats)
                        .await;
                    if !walked {
                        return ScanOutcome::Cancelled;
                    }
                }
                fresh
            }
            ScanRequest::Partial { dirs, subtrees } => {
                let mut children = Vec::new();
                for dir in &dirs {
                    if token.is_cancelled() {
                        return ScanOutcome::Cancelled;
                    }
                    stats.directories += 1;
                    for listed in self.list_chunk(dir.clone(), &mut stats).await {
                        if let Listed::File(path, entry) = listed {
                            if filter.is_watchable(&path, false) {
                                stats.files += 1;
                                children.push((normalize_path(&path), entry));
                            }
                        }
                    }
                    tokio::task::yield_now().await;
                }

                let mut walked = Snapshot::new();
                for prefix in &subtrees {
                    let done = self
                        .walk(prefix, filter.as_ref(), &token, &mut walked, &mut stats)
                        .await;
                    if !done {
                        return ScanOutcome::Cancelled;
                    }
                }

                let dirs: Vec<PathBuf> = dirs.iter().map(|dir| normalize_path(dir)).collect();
                let subtrees: Vec<PathBuf> =
                    subtrees.iter().map(|prefix| normalize_path(prefix)).collect();
                let mut next = (*previous).clone();
                next.replace_children(&dirs, children);
                next.replace_subtrees(&subtrees, walked);
                next
            }
        };

        if token.is_cancelled() {
            return ScanOutcome::Cancelled;
        }

        stats.elapsed = started.elapsed();
        debug!(
            "Scan finished: {} dirs, {} files, {} errors in {:?}",
            stats.directories, stats.files, stats.errors, stats.elapsed
        );
        ScanOutcome::Completed { snapshot, stats }
    }

    /// Depth-first walk from `start`; false when cancelled
    async fn walk(
        &self,
        start: &Path,
        filter: &dyn PathFilter,
        token: &ScanToken,
        out: &mut Snapshot,
        stats: &mut ScanStats,
    ) -> bool {
        let mut pending = vec![start.to_path_buf()];

        while let Some(dir) = pending.pop() {
            if token.is_cancelled() {
                return false;
            }

            stats.directories += 1;
            for listed in self.list_chunk(dir, stats).await {
                match listed {
                    Listed::Dir(path) => {
                        if filter.is_watchable(&path, true) {
                            pending.push(path);
                        } else {
                            trace!("Pruned {}", path.display());
                        }
                    }
                    Listed::File(path, entry) => {
                        if filter.is_watchable(&path, false) {
                            stats.files += 1;
                            out.insert(normalize_path(&path), entry);
                        }
                    }
                }
            }

            tokio::task::yield_now().await;
        }

        true
    }

    /// List one directory on the blocking pool
    async fn list_chunk(&self, dir: PathBuf, stats: &mut ScanStats) -> Vec<Listed> {
        let Ok(permit) = Arc::clone(&self.io_limit).acquire_owned().await else {
            stats.errors += 1;
            return Vec::new();
        };

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            list_dir(&dir)
        })
        .await;

        match result {
            Ok((listed, errors)) => {
                stats.errors += errors;
                listed
            }
            Err(e) => {
                debug!("Directory listing task failed: {}", e);
                stats.errors += 1;
                Vec::new()
            }
        }
    }

    /// `stat` one path without following symlinks
    pub async fn stat(&self, path: PathBuf) -> PathState {
        self.stat_many(vec![path])
            .await
            .pop()
            .map(|(_, state)| state)
            .unwrap_or(PathState::Unknown)
    }

    /// `stat` a batch of paths as one chunk
    pub async fn stat_many(&self, paths: Vec<PathBuf>) -> Vec<(PathBuf, PathState)> {
        let Ok(permit) = Arc::clone(&self.io_limit).acquire_owned().await else {
            return paths.into_iter().map(|p| (p, PathState::Unknown)).collect();
        };

        let fallback = paths.clone();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            paths
                .into_iter()
                .map(|path| {
                    let state = stat_path(&path);
                    (path, state)
                })
                .collect::<Vec<_>>()
        })
        .await;

        result.unwrap_or_else(|_| {
            fallback
                .into_iter()
                .map(|p| (p, PathState::Unknown))
                .collect()
        })
    }
}

/// Blocking: list the direct children of `dir`
fn list_dir(dir: &Path) -> (Vec<Listed>, usize) {
    let mut listed = Vec::new();
    let mut errors = 0;

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                trace!("Skipping unreadable entry under {}: {}", dir.display(), e);
                errors += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            listed.push(Listed::Dir(entry.into_path()));
            continue;
        }

        // Files and symlinks, by their own metadata
        match entry.metadata() {
            Ok(metadata) => {
                let snapshot_entry = SnapshotEntry::from_metadata(&metadata);
                listed.push(Listed::File(entry.into_path(), snapshot_entry));
            }
            Err(_) => errors += 1,
        }
    }

    (listed, errors)
}

/// Blocking: classify one path
fn stat_path(path: &Path) -> PathState {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => PathState::Directory,
        Ok(metadata) => PathState::File(SnapshotEntry::from_metadata(&metadata)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PathState::Missing,
        Err(_) => PathState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ignore::{ClassifierConfig, PathClassifier};
    use std::fs;
    use tempfile::TempDir;

    fn scanner() -> TreeScanner {
        TreeScanner::new(&ScanConfig::default(), false)
    }

    fn classifier(root: &Path) -> Arc<dyn PathFilter> {
        let roots = [root.to_path_buf()];
        Arc::new(PathClassifier::new(&roots, &ClassifierConfig::default()).unwrap())
    }

    fn tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("Cargo.toml"), b"[package]").unwrap();
        fs::write(root.join("src/lib.rs"), b"pub fn a() {}").unwrap();
        fs::write(root.join("src/nested/mod.rs"), b"").unwrap();
        fs::write(root.join("src/.lib.rs.swp"), b"swap").unwrap();
        fs::write(root.join(".git/objects/ab"), b"blob").unwrap();
        fs::write(root.join("docs/guide.md"), b"# guide").unwrap();
        temp_dir
    }

    async fn full(scanner: &TreeScanner, root: &Path) -> (Snapshot, ScanStats) {
        match scanner
            .scan(
                vec![root.to_path_buf()],
                Arc::new(Snapshot::new()),
                ScanRequest::Full,
                classifier(root),
                ScanToken::new(),
            )
            .await
        {
            ScanOutcome::Completed { snapshot, stats } => (snapshot, stats),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_scan_prunes_ignored() {
        let temp_dir = tree();
        let root = temp_dir.path();

        let (snapshot, stats) = full(&scanner(), root).await;

        let mut paths: Vec<PathBuf> = snapshot.paths().into_iter().cloned().collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                root.join("Cargo.toml"),
                root.join("docs/guide.md"),
                root.join("src/lib.rs"),
                root.join("src/nested/mod.rs"),
            ]
        );
        assert_eq!(stats.files, 4);
        // root, docs, src, src/nested (.git pruned)
        assert_eq!(stats.directories, 4);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_full_scan_is_idempotent() {
        let temp_dir = tree();
        let scanner = scanner();

        let (first, _) = full(&scanner, temp_dir.path()).await;
        let (second, _) = full(&scanner, temp_dir.path()).await;
        assert_eq!(first, second);
        assert!(treewatch_core::diff(&first, &second).is_empty());
    }

    #[tokio::test]
    async fn test_partial_scan_stays_in_dirty_dir() {
        let temp_dir = tree();
        let root = temp_dir.path();
        let scanner = scanner();
        let (before, _) = full(&scanner, root).await;

        // Changes inside and outside the dirty directory
        fs::write(root.join("src/new.rs"), b"new").unwrap();
        fs::remove_file(root.join("src/lib.rs")).unwrap();
        fs::write(root.join("docs/other.md"), b"other").unwrap();
        fs::write(root.join("src/nested/deep.rs"), b"deep").unwrap();

        let outcome = scanner
            .scan(
                vec![root.to_path_buf()],
                Arc::new(before.clone()),
                ScanRequest::children(vec![root.join("src")]),
                classifier(root),
                ScanToken::new(),
            )
            .await;
        let ScanOutcome::Completed { snapshot, .. } = outcome else {
            panic!("partial scan did not complete");
        };

        assert!(snapshot.contains(&root.join("src/new.rs")));
        assert!(!snapshot.contains(&root.join("src/lib.rs")));
        // Outside the prefix: untouched
        assert!(!snapshot.contains(&root.join("docs/other.md")));
        assert_eq!(
            snapshot.get(&root.join("docs/guide.md")),
            before.get(&root.join("docs/guide.md"))
        );
        // No transitive dirtiness
        assert!(!snapshot.contains(&root.join("src/nested/deep.rs")));
        assert!(snapshot.contains(&root.join("src/nested/mod.rs")));
    }

    #[tokio::test]
    async fn test_subtree_scan_replaces_prefix() {
        let temp_dir = tree();
        let root = temp_dir.path();
        let scanner = scanner();
        let (before, _) = full(&scanner, root).await;

        fs::create_dir_all(root.join("src/nested/more")).unwrap();
        fs::write(root.join("src/nested/more/x.rs"), b"x").unwrap();
        fs::remove_file(root.join("src/nested/mod.rs")).unwrap();
        fs::write(root.join("docs/other.md"), b"other").unwrap();

        let outcome = scanner
            .scan(
                vec![root.to_path_buf()],
                Arc::new(before),
                ScanRequest::subtree(root.join("src/nested")),
                classifier(root),
                ScanToken::new(),
            )
            .await;
        let ScanOutcome::Completed { snapshot, .. } = outcome else {
            panic!("subtree scan did not complete");
        };

        assert!(snapshot.contains(&root.join("src/nested/more/x.rs")));
        assert!(!snapshot.contains(&root.join("src/nested/mod.rs")));
        assert!(snapshot.contains(&root.join("src/lib.rs")));
        assert!(!snapshot.contains(&root.join("docs/other.md")));
    }

    #[test]
    fn test_merge_requests() {
        let mut request = ScanRequest::subtree(PathBuf::from("/w/src"));
        request.merge(ScanRequest::subtree(PathBuf::from("/w/lib")));
        request.merge(ScanRequest::children(vec![PathBuf::from("/w")]));
        request.merge(ScanRequest::subtree(PathBuf::from("/w/src")));
        assert_eq!(
            request,
            ScanRequest::Partial {
                dirs: vec![PathBuf::from("/w")],
                subtrees: vec![PathBuf::from("/w/src"), PathBuf::from("/w/lib")],
            }
        );

        request.merge(ScanRequest::Full);
        assert!(request.is_full());
        request.merge(ScanRequest::subtree(PathBuf::from("/w/docs")));
        assert!(request.is_full());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_rename_in_one_scan_pairs_every_file() {
        let temp_dir = tree();
        let root = temp_dir.path();
        let scanner = scanner();
        let (before, _) = full(&scanner, root).await;

        fs::rename(root.join("src"), root.join("lib")).unwrap();

        let outcome = scanner
            .scan(
                vec![root.to_path_buf()],
                Arc::new(before.clone()),
                ScanRequest::Partial {
                    dirs: Vec::new(),
                    subtrees: vec![root.join("src"), root.join("lib")],
                },
                classifier(root),
                ScanToken::new(),
            )
            .await;
        let ScanOutcome::Completed { snapshot, .. } = outcome else {
            panic!("partial scan did not complete");
        };

        let result = treewatch_core::diff(&before, &snapshot);
        assert!(result.events.is_empty(), "{:?}", result.events);
        assert_eq!(
            result.renames,
            vec![
                treewatch_core::RenamePair::new(root.join("src/lib.rs"), root.join("lib/lib.rs")),
                treewatch_core::RenamePair::new(
                    root.join("src/nested/mod.rs"),
                    root.join("lib/nested/mod.rs")
                ),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fold_case_scan_keeps_on_disk_spelling() {
        let temp_dir = tree();
        let root = temp_dir.path();
        let scanner = TreeScanner::new(&ScanConfig::default(), true);

        let (snapshot, _) = full(&scanner, root).await;
        assert!(snapshot.folds_case());
        assert!(snapshot.paths().contains(&&root.join("Cargo.toml")));
        assert_eq!(
            snapshot.spelling(&root.join("CARGO.TOML")),
            Some(&root.join("Cargo.toml"))
        );
    }

    #[tokio::test]
    async fn test_cancelled_scan() {
        let temp_dir = tree();
        let root = temp_dir.path();
        let token = ScanToken::new();
        token.cancel();

        let outcome = scanner()
            .scan(
                vec![root.to_path_buf()],
                Arc::new(Snapshot::new()),
                ScanRequest::Full,
                classifier(root),
                token,
            )
            .await;
        assert!(matches!(outcome, ScanOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_concurrent_scan_is_rejected() {
        let temp_dir = tree();
        let root = temp_dir.path().to_path_buf();
        let scanner = scanner();

        let guard = scanner.begin(&[root.clone()]).unwrap();
        assert!(scanner.is_scanning(&root));
        assert!(scanner.begin(&[root.clone()]).is_none());

        let outcome = scanner
            .scan(
                vec![root.clone()],
                Arc::new(Snapshot::new()),
                ScanRequest::Full,
                classifier(&root),
                ScanToken::new(),
            )
            .await;
        assert!(matches!(outcome, ScanOutcome::AlreadyRunning));

        drop(guard);
        assert!(!scanner.is_scanning(&root));
        let (snapshot, _) = full(&scanner, &root).await;
        assert_eq!(snapshot.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_root_counts_error() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("gone");

        let (snapshot, stats) = full(&scanner(), &root).await;
        assert!(snapshot.is_empty());
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_stat_states() {
        let temp_dir = tree();
        let root = temp_dir.path();
        let scanner = scanner();

        assert!(matches!(
            scanner.stat(root.join("src/lib.rs")).await,
            PathState::File(_)
        ));
        assert_eq!(scanner.stat(root.join("src")).await, PathState::Directory);
        assert_eq!(scanner.stat(root.join("nope")).await, PathState::Missing);

        let states = scanner
            .stat_many(vec![root.join("Cargo.toml"), root.join("nope")])
            .await;
        assert_eq!(states.len(), 2);
        assert_eq!(states[1], (root.join("nope"), PathState::Missing));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_are_not_followed() {
        let temp_dir = tree();
        let root = temp_dir.path();
        std::os::unix::fs::symlink(root.join("src"), root.join("link")).unwrap();

        let (snapshot, _) = full(&scanner(), root).await;
        // Recorded as a leaf, not descended into
        assert!(snapshot.contains(&root.join("link")));
        assert!(!snapshot.contains(&root.join("link/lib.rs")));
    }
}
