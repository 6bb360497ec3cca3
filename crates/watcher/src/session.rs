//! Session controller
//!
//! One tokio task per session owns every piece of per-session state:
//! snapshot, rename matcher, aggregator, burst detector, watchdog and the
//! change source. Timers are sleeps inside the task's `select!`, so ending
//! the task cancels all of them.
//!
//! The published snapshot lives behind `RwLock<Arc<Snapshot>>`. Scans read a
//! clone of the `Arc` and hand back a new snapshot that is swapped in whole;
//! live updates go through `Arc::make_mut` (copy on write when a scan or a
//! caller still holds the old one).

use crate::burst::BurstDetector;
use crate::config::WatcherConfig;
use crate::debounce::{Aggregator, Batch};
use crate::ignore::{watchable_within, PathFilter};
use crate::manager::{ChangeSink, SessionId};
use crate::recovery::{HealthStats, RecoveryAction, RestartReason, Watchdog};
use crate::rename::{CreateOutcome, RenameMatcher};
use crate::scan::{PathState, ScanOutcome, ScanRequest, ScanToken, TreeScanner};
use crate::source::{create_source, ChangeSource, EventHint, RawNotification, SourceKind};
use parking_lot::{Mutex, RwLock};
use rand::seq::IteratorRandom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use treewatch_core::{
    classify, diff, normalize_path, ChangeEvent, ChangeKind, DiffResult, FileIdentity, Snapshot,
    SnapshotEntry,
};

/// Notifications held back while a scan runs; beyond this a full rescan
/// replaces them
const MAX_DEFERRED: usize = 10_000;

/// Messages from the manager to a session task
#[derive(Debug)]
pub(crate) enum Command {
    FullRescan,
    Restart(RestartReason),
    Inject(RawNotification),
    Shutdown,
}

/// State readable from outside the session task
pub(crate) struct SessionShared {
    pub(crate) snapshot: RwLock<Arc<Snapshot>>,
    pub(crate) health: Mutex<HealthStats>,
    pub(crate) suppressed: AtomicBool,
    /// Source currently running, which differs from the configured one
    /// during a poll fallback
    pub(crate) source_kind: Mutex<SourceKind>,
}

/// Everything a session needs at start
pub(crate) struct SessionParams {
    pub(crate) id: SessionId,
    pub(crate) roots: Vec<PathBuf>,
    pub(crate) filter: Arc<dyn PathFilter>,
    pub(crate) sink: Arc<dyn ChangeSink>,
    pub(crate) config: Arc<WatcherConfig>,
    pub(crate) scanner: TreeScanner,
}

/// Spawn the controller task
pub(crate) fn spawn(
    params: SessionParams,
) -> (mpsc::UnboundedSender<Command>, Arc<SessionShared>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();

    let config = &params.config;
    let watchdog = Watchdog::new(config.recovery.clone());
    let shared = Arc::new(SessionShared {
        snapshot: RwLock::new(Arc::new(Snapshot::with_fold_case(config.fold_case))),
        health: Mutex::new(watchdog.stats()),
        suppressed: AtomicBool::new(false),
        source_kind: Mutex::new(config.source.kind),
    });

    let context = SessionContext {
        source: create_source(config.source.kind, params.roots.clone(), &config.source),
        rename: RenameMatcher::with_config(&config.rename),
        aggregator: Aggregator::with_config(&config.debounce),
        burst: BurstDetector::new(&config.burst),
        watchdog,
        id: params.id,
        roots: params.roots,
        filter: params.filter,
        sink: params.sink,
        scanner: params.scanner,
        config: params.config,
        shared: Arc::clone(&shared),
        raw_tx,
        baseline_ready: false,
        scan: None,
        queued_scans: None,
        deferred: Vec::new(),
        deep_check: None,
        pending_restart: None,
        fallback_until: None,
        last_event: Instant::now(),
    };

    let handle = tokio::spawn(context.run(command_rx, raw_rx));
    (command_tx, shared, handle)
}

struct InFlightScan {
    request: ScanRequest,
    token: ScanToken,
    handle: JoinHandle<ScanOutcome>,
}

#[derive(Debug, Clone)]
struct PendingRestart {
    at: Instant,
    reason: RestartReason,
    fallback_to_poll: bool,
}

struct SessionContext {
    id: SessionId,
    roots: Vec<PathBuf>,
    filter: Arc<dyn PathFilter>,
    sink: Arc<dyn ChangeSink>,
    config: Arc<WatcherConfig>,
    scanner: TreeScanner,
    shared: Arc<SessionShared>,

    source: Box<dyn ChangeSource>,
    raw_tx: mpsc::UnboundedSender<RawNotification>,

    rename: RenameMatcher,
    aggregator: Aggregator,
    burst: BurstDetector,
    watchdog: Watchdog,

    /// First full scan has completed
    baseline_ready: bool,
    scan: Option<InFlightScan>,
    /// Requests made while a scan ran, merged into one
    queued_scans: Option<ScanRequest>,
    /// Notifications that arrived while a scan was running
    deferred: Vec<RawNotification>,
    /// L3 sample stat in progress: (checked, stale)
    deep_check: Option<JoinHandle<(usize, usize)>>,
    pending_restart: Option<PendingRestart>,
    /// Native notifications disabled until this instant
    fallback_until: Option<Instant>,
    /// Last live or poll-derived event (L2)
    last_event: Instant,
}

async fn join_scan(scan: &mut Option<InFlightScan>) -> Result<ScanOutcome, JoinError> {
    match scan {
        Some(in_flight) => (&mut in_flight.handle).await,
        None => std::future::pending().await,
    }
}

async fn join_deep_check(
    check: &mut Option<JoinHandle<(usize, usize)>>,
) -> Result<(usize, usize), JoinError> {
    match check {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn merge_request(slot: &mut Option<ScanRequest>, request: ScanRequest) {
    match slot {
        Some(pending) => pending.merge(request),
        None => *slot = Some(request),
    }
}

/// Feed one created path through the rename matcher
fn ingest_create(
    rename: &mut RenameMatcher,
    aggregator: &mut Aggregator,
    path: PathBuf,
    identity: Option<FileIdentity>,
    now: Instant,
) {
    match rename.observe_create(&path, identity, now) {
        CreateOutcome::Renamed(pair) => aggregator.ingest_rename(pair, now),
        CreateOutcome::Recreated => aggregator.ingest(ChangeEvent::changed(path), now),
        CreateOutcome::Created => aggregator.ingest(ChangeEvent::created(path), now),
    }
}

/// Up to `count` random entries, cloning only the chosen ones
fn sample_entries<R: rand::Rng + ?Sized>(
    snapshot: &Snapshot,
    count: usize,
    rng: &mut R,
) -> Vec<(PathBuf, SnapshotEntry)> {
    snapshot
        .iter()
        .choose_multiple(rng, count)
        .into_iter()
        .map(|(path, entry)| (path.clone(), *entry))
        .collect()
}

impl SessionContext {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut raw_rx: mpsc::UnboundedReceiver<RawNotification>,
    ) {
        info!(session = %self.id, "Starting session for {} root(s)", self.roots.len());

        let now = Instant::now();
        if let Err(e) = self.source.start(self.raw_tx.clone()).await {
            warn!(session = %self.id, "Failed to start change source: {}", e);
            let action = self.watchdog.register_failure(RestartReason::HandleDead, now);
            self.apply(action, now);
        }
        self.request_scan(ScanRequest::Full);

        let recovery = &self.config.recovery;
        let mut fast = interval_at(now + recovery.fast_interval(), recovery.fast_interval());
        fast.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut deep = interval_at(now + recovery.deep_interval(), recovery.deep_interval());
        deep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let timer = self.next_timer();

            // Commands first so a shutdown is never raced by a finishing scan
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.on_command(command).await,
                },
                Some(raw) = raw_rx.recv() => self.on_raw(raw).await,
                result = join_scan(&mut self.scan) => self.on_scan_done(result).await,
                result = join_deep_check(&mut self.deep_check) => {
                    self.on_deep_check_done(result)
                }
                _ = fast.tick() => self.on_fast_check().await,
                _ = deep.tick() => self.on_deep_tick(),
                _ = sleep_until_opt(timer) => self.on_timer().await,
            }

            self.publish();
        }

        self.shutdown().await;
    }

    /// Earliest of the debounce, rename, burst and restart deadlines
    fn next_timer(&self) -> Option<Instant> {
        let now = Instant::now();
        let aggregator = if self.burst.is_suppressed(now) {
            None
        } else {
            self.aggregator.deadline()
        };

        [
            aggregator,
            self.rename.next_deadline(),
            self.burst.next_deadline(),
            self.pending_restart.as_ref().map(|restart| restart.at),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    async fn on_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::FullRescan => {
                info!(session = %self.id, "Full rescan requested");
                self.request_scan(ScanRequest::Full);
            }
            Command::Restart(reason) => {
                self.apply(
                    RecoveryAction::Restart {
                        delay: Duration::ZERO,
                        reason,
                        fallback_to_poll: false,
                    },
                    now,
                );
            }
            Command::Inject(raw) => self.on_raw(raw).await,
            Command::Shutdown => {}
        }
    }

    async fn on_raw(&mut self, raw: RawNotification) {
        let now = Instant::now();

        match raw {
            RawNotification::Error(ref message) => {
                warn!(session = %self.id, "Notification channel error: {}", message);
                let action = self.watchdog.channel_error(now);
                self.apply(action, now);
            }
            RawNotification::Rescan | RawNotification::Tick => {
                self.last_event = now;
                if self.burst.is_suppressed(now) {
                    return;
                }
                if raw == RawNotification::Rescan {
                    info!(session = %self.id, "Change source lost events, rescanning");
                }
                self.request_scan(ScanRequest::Full);
            }
            RawNotification::Paths { .. } => {
                self.last_event = now;
                if self.burst.on_event(now) {
                    info!(
                        session = %self.id,
                        "Event burst detected, suppressing work until it settles"
                    );
                    self.suspend_for_burst();
                }
                if self.burst.is_suppressed(now) {
                    return;
                }
                self.dispatch(raw).await;
            }
        }
    }

    /// Drop scan work that the rescan at burst exit will redo
    fn suspend_for_burst(&mut self) {
        if let Some(scan) = self.scan.take() {
            debug!(session = %self.id, "Cancelling {:?} scan for burst", scan.request);
            scan.token.cancel();
            scan.handle.abort();
        }
        if let Some(check) = self.deep_check.take() {
            check.abort();
        }
        self.queued_scans = None;
        self.deferred.clear();
    }

    /// Apply a path notification now, or hold it until the running scan lands
    async fn dispatch(&mut self, raw: RawNotification) {
        let RawNotification::Paths { paths, hint } = raw else {
            return;
        };

        if !self.baseline_ready || self.scan.is_some() {
            if self.deferred.len() >= MAX_DEFERRED {
                debug!(session = %self.id, "Deferred queue full, falling back to full rescan");
                self.deferred.clear();
                self.request_scan(ScanRequest::Full);
            } else {
                self.deferred.push(RawNotification::Paths { paths, hint });
            }
            return;
        }

        self.apply_paths(paths, hint).await;
    }

    fn root_for(&self, path: &Path) -> Option<&PathBuf> {
        self.roots.iter().find(|root| path.starts_with(root))
    }

    /// Live path: stat, classify, update the snapshot, feed the aggregator
    async fn apply_paths(&mut self, paths: Vec<PathBuf>, hint: EventHint) {
        let candidates: Vec<PathBuf> = paths
            .into_iter()
            .filter(|path| self.root_for(path).is_some())
            .collect();
        if candidates.is_empty() {
            return;
        }

        let states = self.scanner.stat_many(candidates).await;

        let mut removals: Vec<(PathBuf, SnapshotEntry)> = Vec::new();
        let mut updates: Vec<(PathBuf, SnapshotEntry)> = Vec::new();
        // Every directory in one notification goes into a single scan so
        // both ends of a directory rename are diffed together
        let mut scan: Option<ScanRequest> = None;
        {
            let snapshot = self.shared.snapshot.read();
            for (path, state) in states {
                let Some(root) = self.root_for(&path) else {
                    continue;
                };
                let key = normalize_path(&path);

                match state {
                    PathState::File(entry) => {
                        if watchable_within(self.filter.as_ref(), root, &path, false) {
                            updates.push((key, entry));
                        }
                    }
                    PathState::Directory => {
                        if !watchable_within(self.filter.as_ref(), root, &path, true) {
                            continue;
                        }
                        let request = match hint {
                            EventHint::Modify | EventHint::Any => ScanRequest::children(vec![path]),
                            EventHint::Create | EventHint::Rename | EventHint::Remove => {
                                ScanRequest::subtree(path)
                            }
                        };
                        merge_request(&mut scan, request);
                    }
                    PathState::Missing => {
                        if let Some(entry) = snapshot.get(&key) {
                            removals.push((key, *entry));
                        } else if !snapshot.entries_under(&key).is_empty() {
                            // A watched directory went away
                            merge_request(&mut scan, ScanRequest::subtree(path));
                        }
                    }
                    PathState::Unknown => {
                        debug!(
                            session = %self.id,
                            "Skipping unreadable path {}",
                            path.display()
                        );
                    }
                }
            }
        }

        let now = Instant::now();
        {
            let mut published = self.shared.snapshot.write();
            let snapshot = Arc::make_mut(&mut *published);

            // Deletes first so a rename inside one notification pairs up
            for (key, old) in removals {
                snapshot.remove(&key);
                if let Some(event) = self.rename.observe_delete(key, old.identity, now) {
                    self.aggregator.ingest(event, now);
                }
            }

            for (key, entry) in updates {
                let previous = snapshot.get(&key).copied();
                match classify(previous.as_ref(), Some(&entry)) {
                    Some(ChangeKind::Created) => {
                        snapshot.insert(key.clone(), entry);
                        ingest_create(
                            &mut self.rename,
                            &mut self.aggregator,
                            key,
                            entry.identity,
                            now,
                        );
                    }
                    Some(ChangeKind::Changed) => {
                        snapshot.insert(key.clone(), entry);
                        self.aggregator.ingest(ChangeEvent::changed(key), now);
                    }
                    Some(ChangeKind::Deleted) | None => {}
                }
            }
        }

        if let Some(request) = scan {
            self.request_scan(request);
        }
    }

    /// Start a scan, or queue it behind the running one
    fn request_scan(&mut self, request: ScanRequest) {
        if self.scan.is_some() {
            self.queue_scan(request);
            return;
        }
        self.start_scan(request);
    }

    fn queue_scan(&mut self, request: ScanRequest) {
        merge_request(&mut self.queued_scans, request);
    }

    fn start_scan(&mut self, request: ScanRequest) {
        if self.burst.is_suppressed(Instant::now()) {
            debug!(session = %self.id, "Dropping {:?} scan during burst", request);
            return;
        }

        // Narrow scans need a baseline to merge into
        let request = if self.baseline_ready { request } else { ScanRequest::Full };

        let token = ScanToken::new();
        let previous = Arc::clone(&*self.shared.snapshot.read());
        let scanner = self.scanner.clone();
        let roots = self.roots.clone();
        let filter = Arc::clone(&self.filter);
        let scan_request = request.clone();
        let scan_token = token.clone();

        debug!(session = %self.id, "Starting {:?} scan", request);
        let handle = tokio::spawn(async move {
            scanner.scan(roots, previous, scan_request, filter, scan_token).await
        });

        self.scan = Some(InFlightScan { request, token, handle });
    }

    fn start_queued_scan(&mut self) {
        if self.scan.is_some() {
            return;
        }
        if let Some(next) = self.queued_scans.take() {
            self.start_scan(next);
        }
    }

    async fn on_scan_done(&mut self, result: Result<ScanOutcome, JoinError>) {
        let Some(finished) = self.scan.take() else {
            return;
        };
        let now = Instant::now();

        match result {
            Ok(ScanOutcome::Completed { snapshot: next, stats }) => {
                let next = Arc::new(next);
                let previous =
                    std::mem::replace(&mut *self.shared.snapshot.write(), Arc::clone(&next));

                if self.baseline_ready {
                    let changes = diff(&previous, &next);
                    if !changes.is_empty() {
                        debug!(session = %self.id, "Scan found {} change(s)", changes.len());
                    }
                    let narrow = !finished.request.is_full();
                    self.ingest_scan_changes(changes, &previous, &next, narrow, now);
                } else {
                    self.baseline_ready = true;
                    info!(
                        session = %self.id,
                        "Baseline established: {} files in {} directories ({:?})",
                        stats.files, stats.directories, stats.elapsed
                    );
                }

                if finished.request.is_full() {
                    self.watchdog.resynced();
                }

                for raw in std::mem::take(&mut self.deferred) {
                    self.dispatch(raw).await;
                }
            }
            Ok(ScanOutcome::Cancelled) => {
                debug!(session = %self.id, "Scan cancelled");
            }
            Ok(ScanOutcome::AlreadyRunning) => {
                // Another session holds an overlapping root; retried on the
                // next fast check
                self.queue_scan(finished.request);
                return;
            }
            Err(e) => {
                warn!(session = %self.id, "Scan task failed: {}", e);
                self.queue_scan(finished.request);
                return;
            }
        }

        self.start_queued_scan();
    }

    /// Route scan results through the rename matcher
    ///
    /// Creates always consult it, so a delete still pending from an earlier
    /// scan or notification pairs up. Deletes found by a narrow scan are
    /// held in it for the rename window, because the other end of the move
    /// may only be scanned next. Deletes from a full scan are final.
    fn ingest_scan_changes(
        &mut self,
        changes: DiffResult,
        previous: &Snapshot,
        next: &Snapshot,
        narrow: bool,
        now: Instant,
    ) {
        for pair in changes.renames {
            self.aggregator.ingest_rename(pair, now);
        }

        let (deletes, others): (Vec<ChangeEvent>, Vec<ChangeEvent>) = changes
            .events
            .into_iter()
            .partition(|event| event.kind == ChangeKind::Deleted);

        for event in deletes {
            if !narrow {
                self.aggregator.ingest(event, now);
                continue;
            }
            let identity = previous.get(&event.path).and_then(|entry| entry.identity);
            if let Some(event) = self.rename.observe_delete(event.path, identity, now) {
                self.aggregator.ingest(event, now);
            }
        }

        for event in others {
            if event.kind == ChangeKind::Created {
                let identity = next.get(&event.path).and_then(|entry| entry.identity);
                ingest_create(
                    &mut self.rename,
                    &mut self.aggregator,
                    event.path,
                    identity,
                    now,
                );
            } else {
                self.aggregator.ingest(event, now);
            }
        }
    }

    /// L1 + L2
    async fn on_fast_check(&mut self) {
        let now = Instant::now();

        if let Some(until) = self.fallback_until {
            if now >= until && self.pending_restart.is_none() {
                self.fallback_until = None;
                if self.config.source.kind == SourceKind::Native {
                    self.apply(
                        RecoveryAction::Restart {
                            delay: Duration::ZERO,
                            reason: RestartReason::NativeReenabled,
                            fallback_to_poll: false,
                        },
                        now,
                    );
                }
            }
        }

        self.start_queued_scan();

        // A restart is already on its way; don't count the same dead handle twice
        if self.pending_restart.is_some() {
            return;
        }

        let alive = self.source.is_alive();
        let idle_for = now.saturating_duration_since(self.last_event);
        let action = self.watchdog.fast_check(alive, idle_for, now);
        self.apply(action, now);
    }

    /// L3: stat a random sample of the snapshot
    fn on_deep_tick(&mut self) {
        let now = Instant::now();
        if self.deep_check.is_some()
            || !self.baseline_ready
            || self.scan.is_some()
            || self.burst.is_suppressed(now)
        {
            return;
        }

        let sample_size = self.config.recovery.deep_sample_size;
        let sample = sample_entries(
            &self.shared.snapshot.read(),
            sample_size,
            &mut rand::thread_rng(),
        );
        if sample.is_empty() {
            return;
        }

        let scanner = self.scanner.clone();
        self.deep_check = Some(tokio::spawn(async move {
            let paths = sample.iter().map(|(path, _)| path.clone()).collect();
            let states = scanner.stat_many(paths).await;

            let mut checked = 0;
            let mut stale = 0;
            for ((_, expected), (_, state)) in sample.iter().zip(states) {
                match state {
                    PathState::File(actual) => {
                        checked += 1;
                        if !actual.same_file_info(expected) {
                            stale += 1;
                        }
                    }
                    PathState::Missing | PathState::Directory => {
                        checked += 1;
                        stale += 1;
                    }
                    PathState::Unknown => {}
                }
            }
            (checked, stale)
        }));
    }

    fn on_deep_check_done(&mut self, result: Result<(usize, usize), JoinError>) {
        self.deep_check = None;
        let now = Instant::now();

        match result {
            Ok((checked, stale)) => {
                let action = self.watchdog.deep_result(checked, stale, now);
                self.apply(action, now);
            }
            Err(e) => warn!(session = %self.id, "Deep check task failed: {}", e),
        }
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();

        if let Some(exit) = self.burst.poll(now) {
            info!(
                session = %self.id,
                "Burst ended ({:?}, {} events over {:?}), rescanning",
                exit.reason, exit.suppressed_events, exit.duration
            );
            self.request_scan(ScanRequest::Full);
        }

        for event in self.rename.expire(now) {
            self.aggregator.ingest(event, now);
        }

        if !self.burst.is_suppressed(now) {
            if let Some(batch) = self.aggregator.poll(now) {
                self.emit(batch);
            }
        }

        let restart_due = self
            .pending_restart
            .as_ref()
            .is_some_and(|restart| restart.at <= now);
        if restart_due {
            if let Some(restart) = self.pending_restart.take() {
                self.perform_restart(restart).await;
            }
        }
    }

    fn apply(&mut self, action: RecoveryAction, now: Instant) {
        match action {
            RecoveryAction::None | RecoveryAction::Escalated => {}
            RecoveryAction::FullRescan => self.request_scan(ScanRequest::Full),
            RecoveryAction::Restart {
                delay,
                reason,
                fallback_to_poll,
            } => {
                let at = now + delay;
                match &mut self.pending_restart {
                    Some(pending) => {
                        pending.at = pending.at.min(at);
                        pending.fallback_to_poll |= fallback_to_poll;
                        if fallback_to_poll {
                            pending.reason = reason;
                        }
                    }
                    None => {
                        self.pending_restart = Some(PendingRestart {
                            at,
                            reason,
                            fallback_to_poll,
                        });
                    }
                }
            }
        }
    }

    async fn perform_restart(&mut self, restart: PendingRestart) {
        let now = Instant::now();
        self.source.stop().await;

        if restart.fallback_to_poll {
            self.fallback_until = Some(now + self.config.recovery.fast_interval());
        }
        let kind = if self.fallback_until.is_some() {
            SourceKind::Poll
        } else {
            self.config.source.kind
        };

        info!(session = %self.id, "Restarting {} change source ({})", kind, restart.reason);
        let mut source = create_source(kind, self.roots.clone(), &self.config.source);
        let started = source.start(self.raw_tx.clone()).await;
        self.source = source;

        match started {
            Ok(()) => {
                self.watchdog.restart_succeeded(now);
                self.last_event = now;
                self.request_scan(ScanRequest::Full);
            }
            Err(e) => {
                warn!(session = %self.id, "Restart failed: {}", e);
                let action = self.watchdog.restart_failed(restart.reason, now);
                self.apply(action, now);
            }
        }
    }

    fn emit(&self, batch: Batch) {
        debug!(
            session = %self.id,
            "Flushing batch: {} event(s), {} rename(s)",
            batch.events.len(),
            batch.renames.len()
        );
        if !batch.events.is_empty() {
            self.sink.on_batch(&self.id, &batch.events);
        }
        if !batch.renames.is_empty() {
            self.sink.on_renames(&self.id, &batch.renames);
        }
    }

    /// Mirror burst and health state for readers outside the task
    fn publish(&mut self) {
        self.shared
            .suppressed
            .store(self.burst.is_suppressed(Instant::now()), Ordering::Release);
        *self.shared.source_kind.lock() = self.source.kind();

        if let Some(stats) = self.watchdog.take_status_change() {
            info!(session = %self.id, "Health changed to {}", stats.status);
            self.sink.on_health_change(&self.id, &stats);
        }
        *self.shared.health.lock() = self.watchdog.stats();
    }

    async fn shutdown(mut self) {
        if let Some(scan) = self.scan.take() {
            scan.token.cancel();
            scan.handle.abort();
        }
        if let Some(check) = self.deep_check.take() {
            check.abort();
        }
        self.source.stop().await;

        let now = Instant::now();
        for event in self.rename.drain() {
            self.aggregator.ingest(event, now);
        }

        if self.config.debounce.flush_on_shutdown {
            if let Some(batch) = self.aggregator.flush() {
                self.emit(batch);
            }
        } else {
            self.aggregator.discard();
        }

        info!(session = %self.id, "Session stopped");
    }
}
