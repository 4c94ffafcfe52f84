//! Poll-driven connection lifecycle timers.
//!
//! The connection never spawns background tasks; the driver passes the
//! current instant into every entry point and polls for expirations. This
//! keeps timer behavior deterministic under test and leaves scheduling to
//! the embedding runtime.

use std::time::{Duration, Instant};

use crate::config::Options;

/// Which lifecycle timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// No frames in either direction for the idle period.
    Idle,
    /// The connection outlived its maximum duration.
    MaxDuration,
    /// The post-shutdown-notice drain period elapsed.
    Drain,
}

/// Connection-scoped deadlines.
///
/// Idle re-arms on every frame in either direction; max-duration is fixed at
/// construction; drain arms once when a shutdown notice goes out. Stream
/// pending-flush deadlines live on the streams themselves.
#[derive(Debug)]
pub struct ConnectionTimers {
    idle_timeout: Option<Duration>,
    idle_deadline: Option<Instant>,
    max_duration_deadline: Option<Instant>,
    drain_timeout: Duration,
    drain_deadline: Option<Instant>,
}

impl ConnectionTimers {
    /// Arm the timers configured in `options`, anchored at `now`.
    #[must_use]
    pub fn new(options: &Options, now: Instant) -> Self {
        Self {
            idle_timeout: options.idle_timeout,
            idle_deadline: options.idle_timeout.map(|t| now + t),
            max_duration_deadline: options.max_connection_duration.map(|t| now + t),
            drain_timeout: options.drain_timeout,
            drain_deadline: None,
        }
    }

    /// Re-arm the idle deadline; called on every frame in either direction.
    pub fn on_activity(&mut self, now: Instant) {
        if let Some(timeout) = self.idle_timeout {
            self.idle_deadline = Some(now + timeout);
        }
    }

    /// Arm the drain deadline after a graceful shutdown notice.
    pub fn start_drain(&mut self, now: Instant) {
        if self.drain_deadline.is_none() {
            self.drain_deadline = Some(now + self.drain_timeout);
        }
    }

    /// Whether the drain deadline is armed.
    #[must_use]
    pub fn draining(&self) -> bool {
        self.drain_deadline.is_some()
    }

    /// Disarm everything, as on termination.
    pub fn cancel_all(&mut self) {
        self.idle_deadline = None;
        self.max_duration_deadline = None;
        self.drain_deadline = None;
    }

    /// The first timer expired at `now`, if any.
    ///
    /// Expirations report in severity order; an expired timer stays expired
    /// until cancelled, so a caller that defers acting sees it again.
    #[must_use]
    pub fn poll(&self, now: Instant) -> Option<TimerKind> {
        let expired = |deadline: Option<Instant>| deadline.is_some_and(|d| now >= d);
        if expired(self.max_duration_deadline) {
            Some(TimerKind::MaxDuration)
        } else if expired(self.drain_deadline) {
            Some(TimerKind::Drain)
        } else if expired(self.idle_deadline) {
            Some(TimerKind::Idle)
        } else {
            None
        }
    }

    /// The next armed deadline, for the driver's sleep scheduling.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.idle_deadline,
            self.max_duration_deadline,
            self.drain_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}
