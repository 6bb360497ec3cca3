//! Path classification for watched trees
//!
//! Decides whether a path is watchable. Three rule sources, checked in
//! order:
//! 1. Ignored directory names (`.git`, `node_modules`, ...), pruned by the
//!    scanner without descending
//! 2. Glob patterns in gitignore syntax
//! 3. Extension allow-list (files only, empty = allow everything)
//!
//! External scope resolvers can supply their own predicate through
//! [`PathFilter`]; the engine never interprets manifests itself.

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Opaque watchability predicate
///
/// `is_dir` tells whether `path` is a directory, so the predicate can prune
/// whole subtrees.
pub trait PathFilter: Send + Sync {
    /// Whether `path` should be tracked
    fn is_watchable(&self, path: &Path, is_dir: bool) -> bool;
}

impl<F> PathFilter for F
where
    F: Fn(&Path, bool) -> bool + Send + Sync,
{
    fn is_watchable(&self, path: &Path, is_dir: bool) -> bool {
        self(path, is_dir)
    }
}

/// Check `path` and every directory between `root` and it
///
/// Live notifications arrive for arbitrary depths, so a file inside an
/// ignored directory must be rejected even though its own name is fine.
/// Paths outside `root` are never watchable.
pub fn watchable_within(filter: &dyn PathFilter, root: &Path, path: &Path, is_dir: bool) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };

    let mut current = root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        current.push(component.as_os_str());
        let last = components.peek().is_none();
        if !filter.is_watchable(&current, if last { is_dir } else { true }) {
            return false;
        }
    }

    true
}

/// Rule-based classifier built from [`ClassifierConfig`]
pub struct PathClassifier {
    /// Directory names pruned anywhere in the tree
    ignored_dirs: HashSet<OsString>,

    /// Compiled glob patterns, one matcher per root
    patterns: Vec<Gitignore>,

    /// Lowercased extension allow-list (without dots)
    extensions: HashSet<String>,
}

impl PathClassifier {
    /// Build a classifier for the given roots
    pub fn new(roots: &[PathBuf], config: &ClassifierConfig) -> Result<Self> {
        let mut patterns = Vec::with_capacity(roots.len());
        for root in roots {
            let mut builder = GitignoreBuilder::new(root);
            for pattern in &config.patterns {
                builder
                    .add_line(None, pattern)
                    .with_context(|| format!("Invalid ignore pattern: {}", pattern))?;
            }
            patterns.push(builder.build()?);
        }

        Ok(Self {
            ignored_dirs: config.ignored_dirs.iter().map(OsString::from).collect(),
            patterns,
            extensions: config
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        })
    }

    /// Number of active rule sources
    pub fn active_sources(&self) -> usize {
        let mut count = 0;
        if !self.ignored_dirs.is_empty() {
            count += 1;
        }
        if self.patterns.iter().any(|p| !p.is_empty()) {
            count += 1;
        }
        if !self.extensions.is_empty() {
            count += 1;
        }
        count
    }

    fn matches_pattern(&self, path: &Path, is_dir: bool) -> bool {
        self.patterns
            .iter()
            .filter(|gitignore| path.starts_with(gitignore.path()))
            .any(|gitignore| gitignore.matched(path, is_dir).is_ignore())
    }
}

impl PathFilter for PathClassifier {
    fn is_watchable(&self, path: &Path, is_dir: bool) -> bool {
        let Some(name) = path.file_name() else {
            return true;
        };

        if is_dir && self.ignored_dirs.contains(name) {
            return false;
        }

        if self.matches_pattern(path, is_dir) {
            return false;
        }

        if !is_dir && !self.extensions.is_empty() {
            let allowed = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| self.extensions.contains(&ext.to_ascii_lowercase()));
            if !allowed {
                return false;
            }
        }

        true
    }
}

/// Classifier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Directory names that are never descended into
    pub ignored_dirs: Vec<String>,

    /// Gitignore-style glob patterns
    pub patterns: Vec<String>,

    /// Extension allow-list; empty allows every file
    pub extensions: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            ignored_dirs: [
                ".git",
                ".hg",
                ".svn",
                ".jj",
                "node_modules",
                "target",
                "__pycache__",
                ".venv",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            // Editor swap/backup files and OS droppings
            patterns: ["*.swp", "*.swo", "*~", ".#*", ".DS_Store", "Thumbs.db"]
                .into_iter()
                .map(String::from)
                .collect(),
            extensions: vec![],
        }
    }
}
