//! Change sources
//!
//! A change source delivers raw notifications for a session's roots. Two
//! implementations share one channel type and feed the same pipeline:
//! - [`NativeSource`]: push-based, OS notifications through `notify`
//! - [`PollSource`]: pull-based, periodic ticks that drive a full rescan

mod native;
mod poll;

pub use native::NativeSource;
pub use poll::PollSource;

use crate::error::WatchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// What the backend thinks happened; advisory only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventHint {
    Create,
    Modify,
    Remove,
    Rename,
    Any,
}

/// One message from a change source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawNotification {
    /// Something happened to these paths
    Paths { paths: Vec<PathBuf>, hint: EventHint },

    /// The backend lost events; the snapshot must be rebuilt
    Rescan,

    /// The backend reported an error
    Error(String),

    /// Poll interval elapsed
    Tick,
}

/// Which source implementation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Native,
    Poll,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Native => f.write_str("native"),
            SourceKind::Poll => f.write_str("poll"),
        }
    }
}

/// Change source configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source used for new sessions (default: native)
    pub kind: SourceKind,

    /// Tick period of the poll source (default: 2000ms)
    pub poll_interval_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Native,
            poll_interval_ms: 2_000,
        }
    }
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A live notification handle for a set of roots
#[async_trait]
pub trait ChangeSource: Send {
    fn kind(&self) -> SourceKind;

    /// Begin delivering notifications into `tx`
    async fn start(&mut self, tx: mpsc::UnboundedSender<RawNotification>) -> Result<(), WatchError>;

    /// Stop delivering; idempotent
    async fn stop(&mut self);

    /// Handle is open, not closing, and its roots still exist
    fn is_alive(&self) -> bool;
}

/// Build a source of the given kind
pub fn create_source(
    kind: SourceKind,
    roots: Vec<PathBuf>,
    config: &SourceConfig,
) -> Box<dyn ChangeSource> {
    match kind {
        SourceKind::Native => Box::new(NativeSource::new(roots)),
        SourceKind::Poll => Box::new(PollSource::new(config.poll_interval())),
    }
}
