//! Error types for the watcher crate
//!
//! Filesystem anomalies during scans and live events are handled locally
//! and never surface here; these errors only cover API misuse, startup of
//! a change source, and configuration.

use crate::manager::SessionId;
use crate::source::SourceKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the session manager and change sources
#[derive(Debug, Error)]
pub enum WatchError {
    /// A session with this id is already running
    #[error("session already running: {0}")]
    SessionExists(SessionId),

    /// No session with this id
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// The session task has ended and no longer accepts commands
    #[error("session {0} has shut down")]
    SessionClosed(SessionId),

    /// The scope provider returned no usable root
    #[error("session {0} has no watchable roots")]
    NoRoots(SessionId),

    /// The scope provider failed
    #[error("failed to resolve scope for session {session}: {reason}")]
    Scope { session: SessionId, reason: String },

    /// A native watch handle could not be created or attached
    #[error("failed to start {kind} change source on {path}: {source}")]
    SourceStart {
        kind: SourceKind,
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
