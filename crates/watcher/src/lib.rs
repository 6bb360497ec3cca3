//! Live change detection for Treewatch
//!
//! This crate turns raw filesystem notifications into debounced batches of
//! derived changes:
//! - Path classification (ignored directories, glob patterns, extensions)
//! - Chunked tree scanning on the blocking pool (full, partial, subtree)
//! - Time-boxed rename matching by file identity
//! - Debounced batching with a latency ceiling
//! - Burst suppression for mass regeneration
//! - A recovery watchdog with exponential backoff and escalation
//!
//! Callers interact with a [`SessionManager`]; every session runs as its own
//! task and reports through a [`ChangeSink`].

pub mod burst;
pub mod config;
pub mod debounce;
pub mod error;
pub mod ignore;
pub mod manager;
pub mod recovery;
pub mod rename;
pub mod scan;
mod session;
pub mod source;

// Re-exports
pub use burst::{BurstConfig, BurstDetector, BurstExit, BurstExitReason};
pub use config::WatcherConfig;
pub use debounce::{Aggregator, Batch, DebounceConfig};
pub use error::{ConfigError, WatchError};
pub use ignore::{watchable_within, ClassifierConfig, PathClassifier, PathFilter};
pub use manager::{
    ChangeSink, ChannelSink, Scope, ScopeProvider, SessionId, SessionManager, SessionOutput,
    StaticScope,
};
pub use recovery::{
    HealthStats, HealthStatus, RecoveryAction, RecoveryConfig, RestartReason, Watchdog,
};
pub use rename::{CreateOutcome, RenameConfig, RenameMatcher};
pub use scan::{PathState, ScanConfig, ScanOutcome, ScanRequest, ScanStats, ScanToken, TreeScanner};
pub use source::{ChangeSource, EventHint, RawNotification, SourceConfig, SourceKind};
