//! Time-boxed rename matching for live events
//!
//! A delete with a known identity is held for a short window. A create
//! with the same identity inside the window turns the pair into a rename;
//! otherwise the delete is released as a plain `Deleted` when the window
//! expires.
//!
//! At most one pending delete exists per identity. A second delete with
//! the same identity replaces the first (last delete wins), so an
//! interleaved delete/delete/create sequence can attribute the rename to
//! the second path. The replaced path is still reported as deleted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use treewatch_core::{ChangeEvent, FileIdentity, RenamePair};

/// Rename matcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameConfig {
    /// How long a delete waits for a matching create (default: 250ms)
    pub window_ms: u64,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self { window_ms: 250 }
    }
}

impl RenameConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// A delete waiting for its create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
    pub identity: FileIdentity,
    pub path: PathBuf,
    pub observed_at: Instant,
}

/// Result of observing a create
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Matched a pending delete of the same identity
    Renamed(RenamePair),

    /// The same path was deleted moments ago; report a net change
    Recreated,

    /// Nothing pending, a plain create
    Created,
}

/// Pending-delete buffer keyed by identity
#[derive(Debug)]
pub struct RenameMatcher {
    window: Duration,
    pending: HashMap<FileIdentity, PendingDelete>,
}

impl RenameMatcher {
    /// Create a new matcher with the given window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Create a new matcher from configuration
    pub fn with_config(config: &RenameConfig) -> Self {
        Self::new(config.window())
    }

    /// Observe a delete
    ///
    /// Without an identity the delete cannot take part in a rename and is
    /// returned immediately. With one it is buffered; if it displaces an
    /// earlier pending delete of the same identity, that one is returned.
    pub fn observe_delete(
        &mut self,
        path: PathBuf,
        identity: Option<FileIdentity>,
        now: Instant,
    ) -> Option<ChangeEvent> {
        let Some(identity) = identity else {
            return Some(ChangeEvent::deleted(path));
        };

        let displaced = self.pending.insert(
            identity,
            PendingDelete {
                identity,
                path,
                observed_at: now,
            },
        );

        displaced.map(|old| {
            debug!(
                path = %old.path.display(),
                "pending delete replaced by a later delete of the same file"
            );
            ChangeEvent::deleted(old.path)
        })
    }

    /// Observe a create
    pub fn observe_create(
        &mut self,
        path: &Path,
        identity: Option<FileIdentity>,
        now: Instant,
    ) -> CreateOutcome {
        if let Some(identity) = identity {
            let in_window = self.pending.get(&identity).is_some_and(|pending| {
                now.saturating_duration_since(pending.observed_at) <= self.window
            });

            if in_window {
                if let Some(pending) = self.pending.remove(&identity) {
                    if pending.path == path {
                        return CreateOutcome::Recreated;
                    }
                    let pair = RenamePair::new(pending.path, path.to_path_buf());
                    return CreateOutcome::Renamed(pair);
                }
            }
        }

        // Delete + create of one path with a new identity (atomic save)
        let same_path = self
            .pending
            .iter()
            .find(|(_, pending)| pending.path == path)
            .map(|(identity, _)| *identity);
        if let Some(identity) = same_path {
            self.pending.remove(&identity);
            return CreateOutcome::Recreated;
        }

        CreateOutcome::Created
    }

    /// Release every pending delete whose window has passed
    pub fn expire(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let window = self.window;
        let mut expired: Vec<PendingDelete> = Vec::new();

        self.pending.retain(|_, pending| {
            if now.saturating_duration_since(pending.observed_at) >= window {
                expired.push(pending.clone());
                false
            } else {
                true
            }
        });

        expired.sort_by(|a, b| a.path.cmp(&b.path));
        expired
            .into_iter()
            .map(|pending| ChangeEvent::deleted(pending.path))
            .collect()
    }

    /// Earliest expiry, if anything is pending
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|pending| pending.observed_at + self.window)
            .min()
    }

    /// Release everything (session shutdown)
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        let mut paths: Vec<PathBuf> = self.pending.drain().map(|(_, p)| p.path).collect();
        paths.sort();
        paths.into_iter().map(ChangeEvent::deleted).collect()
    }

    /// Number of pending deletes
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
