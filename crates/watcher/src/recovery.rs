//! Recovery supervisor (watchdog)
//!
//! Three check levels at two cadences:
//! - L1 handle health (fast): a dead handle is a failure and triggers a
//!   backed-off restart
//! - L2 event flow (fast): a long silence triggers a safe restart that does
//!   not count as a failure
//! - L3 snapshot verification (slow): too many stale samples mark the
//!   session degraded and request a full rescan
//!
//! The watchdog itself is a pure state machine; the session controller
//! runs the timers, performs the I/O and executes the returned actions.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Recovery supervisor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// L1/L2 cadence (default: 5s)
    pub fast_interval_ms: u64,

    /// Silence after which L2 requests a safe restart (default: 60s)
    pub idle_threshold_ms: u64,

    /// L3 cadence (default: 30s)
    pub deep_interval_ms: u64,

    /// Snapshot paths stat'ed per L3 pass
    pub deep_sample_size: usize,

    /// Stale fraction above which the snapshot is considered stale
    pub stale_ratio: f64,

    /// First restart delay (default: 300ms)
    pub base_backoff_ms: u64,

    /// Restart delay ceiling (default: 30s)
    pub max_backoff_ms: u64,

    /// Relative jitter applied to every delay (default: 0.2 = ±20%)
    pub jitter: f64,

    /// Consecutive failures before giving up (default: 5)
    pub max_retries: u32,

    /// Rolling window for notification-channel errors
    pub error_window_ms: u64,

    /// Channel errors within the window that make the channel unusable
    pub error_threshold: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: 5_000,
            idle_threshold_ms: 60_000,
            deep_interval_ms: 30_000,
            deep_sample_size: 32,
            stale_ratio: 0.5,
            base_backoff_ms: 300,
            max_backoff_ms: 30_000,
            jitter: 0.2,
            max_retries: 5,
            error_window_ms: 30_000,
            error_threshold: 3,
        }
    }
}

impl RecoveryConfig {
    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval_ms)
    }

    pub fn deep_interval(&self) -> Duration {
        Duration::from_millis(self.deep_interval_ms)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }
}

/// Session health as seen by status surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// A restart is pending or in progress
    Recovering,
    /// The snapshot is suspected stale pending a full rescan
    Degraded,
    /// Retries exhausted; no further automatic restarts
    Escalated,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Recovering => "recovering",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// Per-session recovery bookkeeping
#[derive(Debug, Clone)]
pub struct RecoveryState {
    pub consecutive_failures: u32,
    pub last_restart: Option<Instant>,
    pub current_backoff: Duration,
    pub last_deep_check: Option<Instant>,
    pub stale_detections: u64,
    pub health: HealthStatus,
    pub last_success: Option<DateTime<Utc>>,
}

/// Snapshot of the recovery state for `on_health_change`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStats {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub current_backoff_ms: u64,
    pub stale_detections: u64,
    pub last_success: Option<DateTime<Utc>>,
}

/// Why a restart was requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// L1: the watch handle is closed or its roots vanished
    HandleDead,
    /// L2: no events for the idle threshold
    IdleFlow,
    /// Isolated notification-channel error
    ChannelError,
    /// Repeated channel errors within the error window
    ChannelUnusable,
    /// End of a poll fallback cycle
    NativeReenabled,
    /// External request
    Requested(String),
}

impl RestartReason {
    /// Whether a failed restart for this reason counts toward escalation
    pub fn is_diagnostic(&self) -> bool {
        !matches!(self, RestartReason::IdleFlow | RestartReason::NativeReenabled)
    }
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::HandleDead => f.write_str("watch handle is dead"),
            RestartReason::IdleFlow => f.write_str("no events within idle threshold"),
            RestartReason::ChannelError => f.write_str("notification channel error"),
            RestartReason::ChannelUnusable => f.write_str("notification channel unusable"),
            RestartReason::NativeReenabled => f.write_str("re-enabling native notifications"),
            RestartReason::Requested(reason) => write!(f, "requested: {}", reason),
        }
    }
}

/// What the session controller should do next
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    None,
    /// Restart the change source after `delay`
    Restart {
        delay: Duration,
        reason: RestartReason,
        /// Use the poll source for the next cycle instead of native
        fallback_to_poll: bool,
    },
    /// Keep the handle, rebuild the snapshot
    FullRescan,
    /// Retries exhausted; stop restarting
    Escalated,
}

/// Classification of one channel error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelErrorLevel {
    Isolated,
    Unusable,
}

/// Rolling window of notification-channel errors
#[derive(Debug)]
pub struct ErrorWindow {
    window: Duration,
    threshold: usize,
    errors: VecDeque<Instant>,
}

impl ErrorWindow {
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold: threshold.max(1),
            errors: VecDeque::new(),
        }
    }

    /// Record an error and classify it
    pub fn record(&mut self, now: Instant) -> ChannelErrorLevel {
        self.errors.push_back(now);
        while let Some(&front) = self.errors.front() {
            if now.saturating_duration_since(front) > self.window {
                self.errors.pop_front();
            } else {
                break;
            }
        }

        if self.errors.len() >= self.threshold {
            self.errors.clear();
            ChannelErrorLevel::Unusable
        } else {
            ChannelErrorLevel::Isolated
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Recovery state machine for one session
#[derive(Debug)]
pub struct Watchdog {
    config: RecoveryConfig,
    state: RecoveryState,
    errors: ErrorWindow,
    /// Last status handed to the health sink
    reported: HealthStatus,
}

impl Watchdog {
    /// Create a new watchdog; the session starts healthy
    pub fn new(config: RecoveryConfig) -> Self {
        let errors = ErrorWindow::new(
            Duration::from_millis(config.error_window_ms),
            config.error_threshold,
        );
        let base = Duration::from_millis(config.base_backoff_ms);

        Self {
            config,
            state: RecoveryState {
                consecutive_failures: 0,
                last_restart: None,
                current_backoff: base,
                last_deep_check: None,
                stale_detections: 0,
                health: HealthStatus::Healthy,
                last_success: None,
            },
            errors,
            reported: HealthStatus::Healthy,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn state(&self) -> &RecoveryState {
        &self.state
    }

    pub fn health(&self) -> HealthStatus {
        self.state.health
    }

    pub fn stats(&self) -> HealthStats {
        HealthStats {
            status: self.state.health,
            consecutive_failures: self.state.consecutive_failures,
            current_backoff_ms: self.state.current_backoff.as_millis() as u64,
            stale_detections: self.state.stale_detections,
            last_success: self.state.last_success,
        }
    }

    /// L1 + L2 pass
    pub fn fast_check(
        &mut self,
        handle_alive: bool,
        idle_for: Duration,
        now: Instant,
    ) -> RecoveryAction {
        if !handle_alive {
            if self.state.health == HealthStatus::Escalated {
                return RecoveryAction::None;
            }
            warn!("Watch handle failed health check");
            return self.register_failure(RestartReason::HandleDead, now);
        }

        // Healthy handle: reset failure accounting
        self.state.consecutive_failures = 0;
        self.state.current_backoff = self.base_backoff();
        self.state.last_success = Some(Utc::now());
        if matches!(self.state.health, HealthStatus::Recovering | HealthStatus::Escalated) {
            info!("Watch handle recovered, session healthy");
            self.state.health = HealthStatus::Healthy;
        }

        if idle_for >= self.config.idle_threshold() {
            debug!("No events for {:?}, scheduling safe restart", idle_for);
            return RecoveryAction::Restart {
                delay: Duration::ZERO,
                reason: RestartReason::IdleFlow,
                fallback_to_poll: false,
            };
        }

        RecoveryAction::None
    }

    /// Count one failure and decide between a backed-off restart and escalation
    pub fn register_failure(&mut self, reason: RestartReason, now: Instant) -> RecoveryAction {
        if self.state.health == HealthStatus::Escalated {
            return RecoveryAction::None;
        }

        self.state.consecutive_failures += 1;

        if self.state.consecutive_failures >= self.config.max_retries {
            error!(
                "Recovery exhausted after {} consecutive failures ({}), automatic restarts stopped",
                self.state.consecutive_failures, reason
            );
            self.state.health = HealthStatus::Escalated;
            self.state.consecutive_failures = 0;
            self.state.current_backoff = self.base_backoff();
            return RecoveryAction::Escalated;
        }

        let nominal = self.nominal_backoff(self.state.consecutive_failures);
        let delay = self.apply_jitter(nominal);
        self.state.current_backoff = nominal;
        self.state.health = HealthStatus::Recovering;
        self.state.last_restart = Some(now + delay);

        info!(
            "Scheduling restart in {:?} (failure {}/{}, {})",
            delay, self.state.consecutive_failures, self.config.max_retries, reason
        );

        RecoveryAction::Restart {
            delay,
            reason,
            fallback_to_poll: false,
        }
    }

    /// A restart attempt could not bring the source back
    pub fn restart_failed(&mut self, reason: RestartReason, now: Instant) -> RecoveryAction {
        // A failed safe restart leaves a dead handle behind
        let reason = if reason.is_diagnostic() {
            reason
        } else {
            RestartReason::HandleDead
        };
        self.register_failure(reason, now)
    }

    /// A restart attempt brought the source back
    ///
    /// Counters are only reset by the next passing fast check.
    pub fn restart_succeeded(&mut self, now: Instant) {
        self.state.last_restart = Some(now);
    }

    /// L3 result: `stale` out of `checked` sampled paths disagreed with disk
    pub fn deep_result(&mut self, checked: usize, stale: usize, now: Instant) -> RecoveryAction {
        self.state.last_deep_check = Some(now);
        if checked == 0 {
            return RecoveryAction::None;
        }

        let ratio = stale as f64 / checked as f64;
        if ratio > self.config.stale_ratio {
            self.state.stale_detections += 1;
            if self.state.health != HealthStatus::Escalated {
                self.state.health = HealthStatus::Degraded;
            }
            warn!(
                "Snapshot looks stale ({}/{} sampled paths differ), requesting full rescan",
                stale, checked
            );
            return RecoveryAction::FullRescan;
        }

        debug!("Deep check passed ({}/{} stale)", stale, checked);
        RecoveryAction::None
    }

    /// A full rescan completed; clear a degraded status
    pub fn resynced(&mut self) {
        if self.state.health == HealthStatus::Degraded {
            self.state.health = HealthStatus::Healthy;
        }
    }

    /// The notification channel reported an error
    pub fn channel_error(&mut self, now: Instant) -> RecoveryAction {
        if self.state.health == HealthStatus::Escalated {
            return RecoveryAction::None;
        }

        match self.errors.record(now) {
            ChannelErrorLevel::Isolated => RecoveryAction::Restart {
                delay: self.apply_jitter(self.base_backoff()),
                reason: RestartReason::ChannelError,
                fallback_to_poll: false,
            },
            ChannelErrorLevel::Unusable => {
                warn!("Notification channel unusable, falling back to polling for one cycle");
                RecoveryAction::Restart {
                    delay: Duration::ZERO,
                    reason: RestartReason::ChannelUnusable,
                    fallback_to_poll: true,
                }
            }
        }
    }

    /// Status to publish, once per transition
    pub fn take_status_change(&mut self) -> Option<HealthStats> {
        if self.state.health == self.reported {
            return None;
        }
        self.reported = self.state.health;
        Some(self.stats())
    }

    /// Delay before the restart following the `failures`-th failure, without jitter
    pub fn nominal_backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let millis = self
            .config
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_backoff_ms);
        Duration::from_millis(millis)
    }

    fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.config.base_backoff_ms)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let jitter = self.config.jitter;
        if jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        delay.mul_f64(factor.max(0.0))
    }
}
