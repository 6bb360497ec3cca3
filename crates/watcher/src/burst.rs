//! Burst detection (regeneration suppression)
//!
//! Mass regeneration, VCS checkouts and build output produce thousands of
//! events in a few hundred milliseconds. Once the arrival rate crosses a
//! threshold the session stops stat'ing, diffing and batching entirely
//! and does a single full rescan when the burst is over.
//!
//! ```text
//! Idle --(threshold events within window)--> Bursting
//! Bursting --(quiet period or max duration)--> Idle (+ one full rescan)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Burst detector configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// Sliding window for counting arrivals (default: 500ms)
    pub window_ms: u64,

    /// Arrivals within the window that start a burst (default: 30)
    pub threshold: usize,

    /// Silence that ends a burst (default: 2000ms)
    pub quiet_ms: u64,

    /// Hard ceiling on a burst regardless of activity (default: 60s)
    pub max_duration_ms: u64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            window_ms: 500,
            threshold: 30,
            quiet_ms: 2_000,
            max_duration_ms: 60_000,
        }
    }
}

/// Detector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstState {
    Idle,
    Bursting {
        since: Instant,
        last_event: Instant,
    },
}

/// Why a burst ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstExitReason {
    /// No event for the quiet period
    Quiet,
    /// The max duration elapsed while events kept coming
    MaxDuration,
}

/// Reported exactly once per burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstExit {
    pub reason: BurstExitReason,
    pub duration: Duration,
    pub suppressed_events: u64,
}

/// Per-session arrival-rate state machine
#[derive(Debug)]
pub struct BurstDetector {
    window: Duration,
    threshold: usize,
    quiet: Duration,
    max_duration: Duration,
    arrivals: VecDeque<Instant>,
    state: BurstState,
    suppressed_events: u64,
}

impl BurstDetector {
    /// Create a new detector from configuration
    pub fn new(config: &BurstConfig) -> Self {
        Self {
            window: Duration::from_millis(config.window_ms),
            threshold: config.threshold.max(1),
            quiet: Duration::from_millis(config.quiet_ms),
            max_duration: Duration::from_millis(config.max_duration_ms),
            arrivals: VecDeque::new(),
            state: BurstState::Idle,
            suppressed_events: 0,
        }
    }

    /// Record one arrival; returns true if it started a burst
    pub fn on_event(&mut self, now: Instant) -> bool {
        if let BurstState::Bursting { last_event, .. } = &mut self.state {
            *last_event = now;
            self.suppressed_events += 1;
            return false;
        }

        self.arrivals.push_back(now);
        while let Some(&front) = self.arrivals.front() {
            if now.saturating_duration_since(front) >= self.window {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }

        if self.arrivals.len() >= self.threshold {
            self.arrivals.clear();
            self.state = BurstState::Bursting {
                since: now,
                last_event: now,
            };
            self.suppressed_events = 1;
            return true;
        }

        false
    }

    /// Whether work for this session must be skipped right now
    pub fn is_suppressed(&self, now: Instant) -> bool {
        match self.state {
            BurstState::Idle => false,
            BurstState::Bursting { since, last_event } => {
                self.exit_reason(since, last_event, now).is_none()
            }
        }
    }

    /// Leave the burst if its exit condition holds
    ///
    /// Returns the exit exactly once; the caller owes one full rescan.
    pub fn poll(&mut self, now: Instant) -> Option<BurstExit> {
        let BurstState::Bursting { since, last_event } = self.state else {
            return None;
        };

        let reason = self.exit_reason(since, last_event, now)?;
        let exit = BurstExit {
            reason,
            duration: now.saturating_duration_since(since),
            suppressed_events: self.suppressed_events,
        };

        self.state = BurstState::Idle;
        self.suppressed_events = 0;
        Some(exit)
    }

    /// When the current burst will end at the earliest
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            BurstState::Idle => None,
            BurstState::Bursting { since, last_event } => {
                Some((last_event + self.quiet).min(since + self.max_duration))
            }
        }
    }

    pub fn state(&self) -> BurstState {
        self.state
    }

    fn exit_reason(
        &self,
        since: Instant,
        last_event: Instant,
        now: Instant,
    ) -> Option<BurstExitReason> {
        if now.saturating_duration_since(since) >= self.max_duration {
            Some(BurstExitReason::MaxDuration)
        } else if now.saturating_duration_since(last_event) >= self.quiet {
            Some(BurstExitReason::Quiet)
        } else {
            None
        }
    }
}
