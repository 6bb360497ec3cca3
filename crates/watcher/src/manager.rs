//! Session manager
//!
//! Owns the running sessions and is the only entry point for callers.
//! Each session is an independent controller task; the manager keeps a
//! command channel, a read-only view of its state and the task handle.

use crate::config::WatcherConfig;
use crate::error::WatchError;
use crate::ignore::PathFilter;
use crate::recovery::{HealthStats, RestartReason};
use crate::scan::TreeScanner;
use crate::session::{self, Command, SessionParams, SessionShared};
use crate::source::{EventHint, RawNotification, SourceKind};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use treewatch_core::{normalize_path, ChangeEvent, RenamePair, Snapshot};
use ulid::Ulid;

/// Session identifier, chosen by the caller or generated
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh, sortable id
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What a session watches
#[derive(Clone)]
pub struct Scope {
    pub roots: Vec<PathBuf>,
    pub filter: Arc<dyn PathFilter>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").field("roots", &self.roots).finish_non_exhaustive()
    }
}

/// Resolves roots and the watchability predicate for a session
pub trait ScopeProvider: Send + Sync {
    fn roots_and_ignores(&self, session: &SessionId) -> anyhow::Result<Scope>;
}

/// Fixed scope, the same for every session
#[derive(Clone, Debug)]
pub struct StaticScope(pub Scope);

impl StaticScope {
    pub fn new(roots: Vec<PathBuf>, filter: Arc<dyn PathFilter>) -> Self {
        Self(Scope { roots, filter })
    }
}

impl ScopeProvider for StaticScope {
    fn roots_and_ignores(&self, _session: &SessionId) -> anyhow::Result<Scope> {
        Ok(self.0.clone())
    }
}

/// Receives everything a session produces
///
/// Called from the session task; implementations must not block.
pub trait ChangeSink: Send + Sync {
    fn on_batch(&self, session: &SessionId, events: &[ChangeEvent]);
    fn on_renames(&self, session: &SessionId, pairs: &[RenamePair]);
    fn on_health_change(&self, session: &SessionId, stats: &HealthStats);
}

/// One item produced by a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionOutput {
    Batch {
        session: SessionId,
        events: Vec<ChangeEvent>,
    },
    Renames {
        session: SessionId,
        pairs: Vec<RenamePair>,
    },
    Health {
        session: SessionId,
        stats: HealthStats,
    },
}

/// Forwards session output over a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: crossbeam_channel::Sender<SessionOutput>,
}

impl ChannelSink {
    pub fn new() -> (Self, crossbeam_channel::Receiver<SessionOutput>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, output: SessionOutput) {
        // Receiver dropped: nobody is listening any more
        let _ = self.tx.send(output);
    }
}

impl ChangeSink for ChannelSink {
    fn on_batch(&self, session: &SessionId, events: &[ChangeEvent]) {
        self.send(SessionOutput::Batch {
            session: session.clone(),
            events: events.to_vec(),
        });
    }

    fn on_renames(&self, session: &SessionId, pairs: &[RenamePair]) {
        self.send(SessionOutput::Renames {
            session: session.clone(),
            pairs: pairs.to_vec(),
        });
    }

    fn on_health_change(&self, session: &SessionId, stats: &HealthStats) {
        self.send(SessionOutput::Health {
            session: session.clone(),
            stats: stats.clone(),
        });
    }
}

struct SessionHandle {
    roots: Vec<PathBuf>,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<SessionShared>,
    task: JoinHandle<()>,
}

/// Entry point: starts, drives and stops sessions
pub struct SessionManager {
    config: Arc<WatcherConfig>,
    scanner: TreeScanner,
    sessions: DashMap<SessionId, SessionHandle>,
}

impl SessionManager {
    /// Create a manager; the configuration is validated first
    pub fn new(config: WatcherConfig) -> Result<Self, WatchError> {
        config.validate()?;
        let scanner = TreeScanner::new(&config.scan, config.fold_case);

        Ok(Self {
            config: Arc::new(config),
            scanner,
            sessions: DashMap::new(),
        })
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Resolve the scope and spawn the session task
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_session(
        &self,
        id: SessionId,
        provider: &dyn ScopeProvider,
        sink: Arc<dyn ChangeSink>,
    ) -> Result<(), WatchError> {
        if self.sessions.contains_key(&id) {
            return Err(WatchError::SessionExists(id));
        }

        let scope = provider
            .roots_and_ignores(&id)
            .map_err(|e| WatchError::Scope {
                session: id.clone(),
                reason: format!("{:#}", e),
            })?;

        let mut roots: Vec<PathBuf> = Vec::with_capacity(scope.roots.len());
        for root in scope.roots {
            if !root.is_dir() {
                warn!(session = %id, "Skipping root that is not a directory: {}", root.display());
                continue;
            }
            let root = root
                .canonicalize()
                .unwrap_or_else(|_| normalize_path(&root));
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        if roots.is_empty() {
            return Err(WatchError::NoRoots(id));
        }

        let (commands, shared, task) = session::spawn(SessionParams {
            id: id.clone(),
            roots: roots.clone(),
            filter: scope.filter,
            sink,
            config: Arc::clone(&self.config),
            scanner: self.scanner.clone(),
        });

        match self.sessions.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                task.abort();
                Err(WatchError::SessionExists(id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(session = %id, "Session started: {:?}", roots);
                slot.insert(SessionHandle {
                    roots,
                    commands,
                    shared,
                    task,
                });
                Ok(())
            }
        }
    }

    /// Stop a session and wait for its task to end
    ///
    /// Pending events are flushed to the sink before this returns.
    pub async fn stop_session(&self, id: &SessionId) -> Result<(), WatchError> {
        let (_, handle) = self
            .sessions
            .remove(id)
            .ok_or_else(|| WatchError::UnknownSession(id.clone()))?;

        let _ = handle.commands.send(Command::Shutdown);
        if let Err(e) = handle.task.await {
            warn!(session = %id, "Session task ended abnormally: {}", e);
        }
        Ok(())
    }

    fn send(&self, id: &SessionId, command: Command) -> Result<(), WatchError> {
        let handle = self
            .sessions
            .get(id)
            .ok_or_else(|| WatchError::UnknownSession(id.clone()))?;
        handle
            .commands
            .send(command)
            .map_err(|_| WatchError::SessionClosed(id.clone()))
    }

    /// Rebuild the snapshot from disk and report the differences
    pub fn request_full_rescan(&self, id: &SessionId) -> Result<(), WatchError> {
        self.send(id, Command::FullRescan)
    }

    /// Restart the session's change source now
    pub fn request_restart(
        &self,
        id: &SessionId,
        reason: impl Into<String>,
    ) -> Result<(), WatchError> {
        self.send(id, Command::Restart(RestartReason::Requested(reason.into())))
    }

    /// Feed a raw notification as if the change source had produced it
    pub fn inject(&self, id: &SessionId, notification: RawNotification) -> Result<(), WatchError> {
        self.send(id, Command::Inject(notification))
    }

    /// Record one event arrival for burst detection and event-flow health
    pub fn on_event(&self, id: &SessionId) -> Result<(), WatchError> {
        self.inject(
            id,
            RawNotification::Paths {
                paths: Vec::new(),
                hint: EventHint::Any,
            },
        )
    }

    /// Whether the session is inside an event burst
    pub fn is_suppressed(&self, id: &SessionId) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|handle| handle.shared.suppressed.load(Ordering::Acquire))
    }

    pub fn health(&self, id: &SessionId) -> Option<HealthStats> {
        self.sessions.get(id).map(|handle| handle.shared.health.lock().clone())
    }

    /// Change source the session is running right now
    pub fn source_kind(&self, id: &SessionId) -> Option<SourceKind> {
        self.sessions.get(id).map(|handle| *handle.shared.source_kind.lock())
    }

    /// Current published snapshot
    pub fn snapshot(&self, id: &SessionId) -> Option<Arc<Snapshot>> {
        self.sessions
            .get(id)
            .map(|handle| Arc::clone(&*handle.shared.snapshot.read()))
    }

    /// Canonical roots of a session
    pub fn roots(&self, id: &SessionId) -> Option<Vec<PathBuf>> {
        self.sessions.get(id).map(|handle| handle.roots.clone())
    }

    /// Running session ids, sorted
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stop every session
    pub async fn shutdown(&self) {
        for id in self.sessions() {
            if let Err(e) = self.stop_session(&id).await {
                warn!(session = %id, "Failed to stop session: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn allow_all() -> Arc<dyn PathFilter> {
        Arc::new(|_: &Path, _: bool| true)
    }

    fn poll_config() -> WatcherConfig {
        let mut config = WatcherConfig::default();
        config.fold_case = false;
        config.source.kind = SourceKind::Poll;
        config
    }

    async fn wait_for_baseline(manager: &SessionManager, id: &SessionId, files: usize) {
        for _ in 0..200 {
            if manager.snapshot(id).is_some_and(|s| s.len() == files) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("baseline never reached {} files", files);
    }

    #[test]
    fn test_session_id() {
        let id = SessionId::from("client-1");
        assert_eq!(id.to_string(), "client-1");
        assert_eq!(id.as_str(), "client-1");

        let generated = SessionId::generate();
        assert_eq!(generated.as_str().len(), 26);
        assert_ne!(generated, SessionId::generate());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = WatcherConfig::default();
        config.burst.threshold = 0;
        assert!(matches!(SessionManager::new(config), Err(WatchError::Config(_))));
    }

    #[tokio::test]
    async fn test_start_and_stop_session() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), b"a").unwrap();

        let manager = SessionManager::new(poll_config()).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let id = SessionId::from("s1");
        let scope = StaticScope::new(vec![temp_dir.path().to_path_buf()], allow_all());

        manager.start_session(id.clone(), &scope, Arc::new(sink.clone())).unwrap();
        assert!(matches!(
            manager.start_session(id.clone(), &scope, Arc::new(sink)),
            Err(WatchError::SessionExists(_))
        ));
        assert_eq!(manager.sessions(), vec![id.clone()]);

        wait_for_baseline(&manager, &id, 1).await;
        assert!(!manager.is_suppressed(&id));
        assert_eq!(
            manager.health(&id).unwrap().status,
            crate::recovery::HealthStatus::Healthy
        );

        manager.stop_session(&id).await.unwrap();
        assert!(manager.sessions().is_empty());
        assert!(matches!(
            manager.stop_session(&id).await,
            Err(WatchError::UnknownSession(_))
        ));
        assert!(matches!(
            manager.request_full_rescan(&id),
            Err(WatchError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_roots_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SessionManager::new(poll_config()).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let scope = StaticScope::new(vec![temp_dir.path().join("missing")], allow_all());

        let result = manager.start_session(SessionId::from("s1"), &scope, Arc::new(sink));
        assert!(matches!(result, Err(WatchError::NoRoots(_))));
    }

    #[tokio::test]
    async fn test_scope_errors_are_reported() {
        struct Failing;
        impl ScopeProvider for Failing {
            fn roots_and_ignores(&self, _session: &SessionId) -> anyhow::Result<Scope> {
                anyhow::bail!("manifest unreadable")
            }
        }

        let manager = SessionManager::new(poll_config()).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let result = manager.start_session(SessionId::from("s1"), &Failing, Arc::new(sink));

        match result {
            Err(WatchError::Scope { reason, .. }) => {
                assert!(reason.contains("manifest unreadable"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_session_output_json() {
        let output = SessionOutput::Batch {
            session: SessionId::from("s1"),
            events: vec![ChangeEvent::created(PathBuf::from("/p/a"))],
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["type"], "batch");
        assert_eq!(json["session"], "s1");
        assert_eq!(json["events"][0]["kind"], "created");
    }
}
