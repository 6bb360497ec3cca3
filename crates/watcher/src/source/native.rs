//! Push-based change source backed by `notify`

use super::{ChangeSource, EventHint, RawNotification, SourceKind};
use crate::error::WatchError;
use async_trait::async_trait;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// OS notifications for every root, recursively
pub struct NativeSource {
    roots: Vec<PathBuf>,
    watcher: Option<RecommendedWatcher>,
    closing: Arc<AtomicBool>,
}

impl NativeSource {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            watcher: None,
            closing: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Map one backend event to a raw notification
fn translate(event: Event) -> Option<RawNotification> {
    if event.need_rescan() {
        return Some(RawNotification::Rescan);
    }

    let hint = match event.kind {
        EventKind::Create(_) => EventHint::Create,
        EventKind::Modify(ModifyKind::Name(_)) => EventHint::Rename,
        EventKind::Modify(_) => EventHint::Modify,
        EventKind::Remove(_) => EventHint::Remove,
        EventKind::Access(_) => return None,
        EventKind::Any | EventKind::Other => EventHint::Any,
    };

    if event.paths.is_empty() {
        return None;
    }

    Some(RawNotification::Paths {
        paths: event.paths,
        hint,
    })
}

#[async_trait]
impl ChangeSource for NativeSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Native
    }

    async fn start(
        &mut self,
        tx: mpsc::UnboundedSender<RawNotification>,
    ) -> Result<(), WatchError> {
        self.stop().await;

        let closing = Arc::new(AtomicBool::new(false));
        let callback_closing = Arc::clone(&closing);
        let first_root = self.roots.first().cloned().unwrap_or_default();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if callback_closing.load(Ordering::Acquire) {
                return;
            }
            let notification = match res {
                Ok(event) => translate(event),
                Err(e) => Some(RawNotification::Error(e.to_string())),
            };
            if let Some(notification) = notification {
                // Receiver gone means the session is shutting down
                let _ = tx.send(notification);
            }
        })
        .map_err(|source| WatchError::SourceStart {
            kind: SourceKind::Native,
            path: first_root,
            source,
        })?;

        for root in &self.roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|source| WatchError::SourceStart {
                    kind: SourceKind::Native,
                    path: root.clone(),
                    source,
                })?;
        }

        info!("Native change source watching {} root(s)", self.roots.len());
        self.watcher = Some(watcher);
        self.closing = closing;
        Ok(())
    }

    async fn stop(&mut self) {
        self.closing.store(true, Ordering::Release);
        if let Some(mut watcher) = self.watcher.take() {
            for root in &self.roots {
                if let Err(e) = watcher.unwatch(root) {
                    debug!("Failed to unwatch {}: {}", root.display(), e);
                }
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.watcher.is_some()
            && !self.closing.load(Ordering::Acquire)
            && self.roots.iter().all(|root| root.is_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, Flag, RemoveKind, RenameMode};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_translate_kinds() {
        let create =
            Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/p/a"));
        assert_eq!(
            translate(create),
            Some(RawNotification::Paths {
                paths: vec![PathBuf::from("/p/a")],
                hint: EventHint::Create,
            })
        );

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/p/a"))
            .add_path(PathBuf::from("/p/b"));
        assert!(matches!(
            translate(rename),
            Some(RawNotification::Paths { hint: EventHint::Rename, ref paths }) if paths.len() == 2
        ));

        let remove = Event::new(EventKind::Remove(RemoveKind::Any)).add_path(PathBuf::from("/p/a"));
        assert!(matches!(
            translate(remove),
            Some(RawNotification::Paths { hint: EventHint::Remove, .. })
        ));

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/p/a"));
        assert_eq!(translate(access), None);
    }

    #[test]
    fn test_overflow_requests_rescan() {
        let overflow = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert_eq!(translate(overflow), Some(RawNotification::Rescan));
    }

    #[tokio::test]
    async fn test_delivers_notifications() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut source = NativeSource::new(vec![root.clone()]);
        source.start(tx).await.unwrap();
        assert!(source.is_alive());

        std::fs::write(root.join("hello.txt"), b"hi").unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(notification) = rx.recv().await {
                if let RawNotification::Paths { paths, .. } = notification {
                    if paths.iter().any(|p| p.ends_with("hello.txt")) {
                        return true;
                    }
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(seen);

        source.stop().await;
        assert!(!source.is_alive());
    }

    #[tokio::test]
    async fn test_missing_root_fails_to_start() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut source = NativeSource::new(vec![temp_dir.path().join("missing")]);
        let result = source.start(tx).await;
        assert!(matches!(result, Err(WatchError::SourceStart { .. })));
        assert!(!source.is_alive());
    }

    #[tokio::test]
    async fn test_not_alive_once_root_is_removed() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut source = NativeSource::new(vec![root.clone()]);
        source.start(tx).await.unwrap();
        assert!(source.is_alive());

        std::fs::remove_dir(&root).unwrap();
        assert!(!source.is_alive());
        source.stop().await;
    }
}
