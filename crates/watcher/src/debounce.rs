//! Debounce and batching of derived change events
//!
//! Collapses bursts of rapid edits (autosave, formatter passes) into one
//! outbound batch. The aggregator never rederives kinds: the diff layer
//! already decided them, and for one path the last kind inside a window
//! wins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use treewatch_core::{ChangeEvent, ChangeKind, RenamePair};

/// Aggregator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Quiet time after the last event before flushing (default: 150ms)
    pub window_ms: u64,

    /// Upper bound on how long an event may wait under continuous
    /// activity (default: 2000ms)
    pub max_wait_ms: u64,

    /// Flush pending events when a session stops instead of dropping them
    pub flush_on_shutdown: bool,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_ms: 150,
            max_wait_ms: 2_000,
            flush_on_shutdown: true,
        }
    }
}

impl DebounceConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// One flushed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Plain changes, one per path, sorted by path
    pub events: Vec<ChangeEvent>,

    /// Renames in arrival order
    pub renames: Vec<RenamePair>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.renames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len() + self.renames.len()
    }
}

/// Per-session pending set with a restartable debounce timer
#[derive(Debug)]
pub struct Aggregator {
    window: Duration,
    max_wait: Duration,
    pending: HashMap<PathBuf, ChangeKind>,
    renames: Vec<RenamePair>,
    /// When the oldest pending item arrived
    first_at: Option<Instant>,
    /// When the newest pending item arrived
    last_at: Option<Instant>,
}

impl Aggregator {
    /// Create a new aggregator
    pub fn new(window: Duration, max_wait: Duration) -> Self {
        Self {
            window,
            max_wait,
            pending: HashMap::new(),
            renames: Vec::new(),
            first_at: None,
            last_at: None,
        }
    }

    /// Create a new aggregator from configuration
    pub fn with_config(config: &DebounceConfig) -> Self {
        Self::new(config.window(), config.max_wait())
    }

    /// Add a change; restarts the debounce timer
    pub fn ingest(&mut self, event: ChangeEvent, now: Instant) {
        self.pending.insert(event.path, event.kind);
        self.touch(now);
    }

    /// Add a rename; restarts the debounce timer
    ///
    /// A pending plain event for the rename target is superseded.
    pub fn ingest_rename(&mut self, pair: RenamePair, now: Instant) {
        self.pending.remove(&pair.new_path);
        if !self.renames.contains(&pair) {
            self.renames.push(pair);
        }
        self.touch(now);
    }

    fn touch(&mut self, now: Instant) {
        self.first_at.get_or_insert(now);
        self.last_at = Some(now);
    }

    /// When the pending set should be flushed, if anything is pending
    pub fn deadline(&self) -> Option<Instant> {
        let (first, last) = (self.first_at?, self.last_at?);
        Some((last + self.window).min(first + self.max_wait))
    }

    /// Flush if the deadline has passed
    pub fn poll(&mut self, now: Instant) -> Option<Batch> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.flush(),
            _ => None,
        }
    }

    /// Flush everything now
    pub fn flush(&mut self) -> Option<Batch> {
        self.first_at = None;
        self.last_at = None;

        if self.pending.is_empty() && self.renames.is_empty() {
            return None;
        }

        let mut events: Vec<ChangeEvent> = self
            .pending
            .drain()
            .map(|(path, kind)| ChangeEvent::new(path, kind))
            .collect();
        events.sort_by(|a, b| a.path.cmp(&b.path));

        Some(Batch {
            events,
            renames: std::mem::take(&mut self.renames),
        })
    }

    /// Drop everything pending
    pub fn discard(&mut self) {
        self.pending.clear();
        self.renames.clear();
        self.first_at = None;
        self.last_at = None;
    }

    /// Number of pending items
    pub fn pending_len(&self) -> usize {
        self.pending.len() + self.renames.len()
    }
}
