//! Flood-mitigation accounting for both directions of the connection.
//!
//! The governor is pure bookkeeping: it counts, compares against ceilings,
//! and reports. It never terminates the connection itself; callers inspect
//! the returned [`GovernorStatus`] and act on it, so detection and teardown
//! stay in one place.

use crate::config::Options;
use crate::frame::{Frame, FrameKind};
use crate::stats::TerminationCause;
use crate::stream::StreamClass;

/// Admission verdict for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a flood verdict left unchecked defeats the mitigation"]
pub enum GovernorStatus {
    /// Frame admitted; proceed.
    Admitted,
    /// A ceiling was crossed; the connection must terminate for this cause.
    Flood(TerminationCause),
}

impl GovernorStatus {
    /// Returns `true` for [`GovernorStatus::Admitted`].
    #[must_use]
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Per-connection flood counters and their ceilings.
///
/// Outbound counters track frames queued but not yet confirmed flushed to
/// the transport, so a peer that stops reading cannot grow the queue without
/// bound. Inbound counters bound frame patterns that consume CPU or queue
/// space without making protocol progress.
#[derive(Debug)]
pub struct FloodGovernor {
    max_outbound_frames: u64,
    max_outbound_control_frames: u64,
    max_consecutive_empty_frames: u64,
    max_priority_per_stream: u64,
    max_window_updates_per_data_frame: u64,

    outbound_frames: u64,
    outbound_control_frames: u64,
    outbound_data_flushed: u64,

    consecutive_empty_frames: u64,
    priority_on_idle: u64,
    priority_on_open: u64,
    priority_on_closed: u64,
    inbound_window_updates: u64,
}

impl FloodGovernor {
    /// Create a governor with ceilings taken from `options`.
    #[must_use]
    pub fn new(options: &Options) -> Self {
        Self {
            max_outbound_frames: options.max_outbound_frames,
            max_outbound_control_frames: options.max_outbound_control_frames,
            max_consecutive_empty_frames: options.max_consecutive_empty_frames,
            max_priority_per_stream: options.max_inbound_priority_frames_per_stream,
            max_window_updates_per_data_frame: options
                .max_inbound_window_updates_per_data_frame,
            outbound_frames: 0,
            outbound_control_frames: 0,
            outbound_data_flushed: 0,
            consecutive_empty_frames: 0,
            priority_on_idle: 0,
            priority_on_open: 0,
            priority_on_closed: 0,
            inbound_window_updates: 0,
        }
    }

    /// Account for a frame entering the outbound queue.
    ///
    /// Counters advance even when the verdict is a flood, so the caller can
    /// still ask [`Self::has_control_headroom`] while tearing down.
    pub fn on_outbound_enqueued(&mut self, kind: FrameKind) -> GovernorStatus {
        self.outbound_frames += 1;
        if kind.is_control() {
            self.outbound_control_frames += 1;
        }
        if self.outbound_control_frames > self.max_outbound_control_frames {
            return GovernorStatus::Flood(TerminationCause::OutboundControlFlood);
        }
        if self.outbound_frames > self.max_outbound_frames {
            return GovernorStatus::Flood(TerminationCause::OutboundFrameFlood);
        }
        GovernorStatus::Admitted
    }

    /// Account for a frame confirmed flushed to the transport.
    pub fn on_outbound_flushed(&mut self, kind: FrameKind) {
        self.outbound_frames = self.outbound_frames.saturating_sub(1);
        if kind.is_control() {
            self.outbound_control_frames = self.outbound_control_frames.saturating_sub(1);
        }
        if kind == FrameKind::Data {
            self.outbound_data_flushed += 1;
        }
    }

    /// Roll back an enqueue that the caller refused to commit.
    pub fn on_outbound_dropped(&mut self, kind: FrameKind) {
        self.outbound_frames = self.outbound_frames.saturating_sub(1);
        if kind.is_control() {
            self.outbound_control_frames = self.outbound_control_frames.saturating_sub(1);
        }
    }

    /// Whether one more control frame fits under both outbound ceilings.
    ///
    /// Used for the best-effort GOAWAY during termination: when the flood is
    /// the outbound queue itself, adding a farewell frame would feed it.
    #[must_use]
    pub fn has_control_headroom(&self) -> bool {
        self.outbound_frames < self.max_outbound_frames
            && self.outbound_control_frames < self.max_outbound_control_frames
    }

    /// Run all inbound flood checks for `frame`.
    ///
    /// `class` is the target stream's lifecycle classification and
    /// `streams_opened` the total streams ever opened, both of which scale
    /// the inbound budgets.
    pub fn track_inbound(
        &mut self,
        frame: &Frame,
        class: StreamClass,
        streams_opened: u64,
    ) -> GovernorStatus {
        if frame.is_empty_noop() {
            self.consecutive_empty_frames += 1;
            if self.consecutive_empty_frames > self.max_consecutive_empty_frames {
                return GovernorStatus::Flood(TerminationCause::InboundEmptyFrameFlood);
            }
        } else {
            self.consecutive_empty_frames = 0;
        }

        match frame.kind() {
            FrameKind::Priority => self.track_priority(class, streams_opened),
            FrameKind::WindowUpdate => self.track_window_update(streams_opened),
            _ => GovernorStatus::Admitted,
        }
    }

    /// PRIORITY budget, tracked per target class so frames against idle or
    /// closed streams cannot hide behind legitimate traffic on open ones.
    fn track_priority(&mut self, class: StreamClass, streams_opened: u64) -> GovernorStatus {
        let counter = match class {
            StreamClass::Idle => &mut self.priority_on_idle,
            StreamClass::Open => &mut self.priority_on_open,
            StreamClass::Closed => &mut self.priority_on_closed,
        };
        *counter += 1;
        let budget = self
            .max_priority_per_stream
            .saturating_mul(1 + streams_opened);
        if *counter > budget {
            GovernorStatus::Flood(TerminationCause::InboundPriorityFlood)
        } else {
            GovernorStatus::Admitted
        }
    }

    /// WINDOW_UPDATE budget, scaled by how much sending actually happened.
    /// A peer that never lets us flush DATA earns almost no update budget.
    fn track_window_update(&mut self, streams_opened: u64) -> GovernorStatus {
        self.inbound_window_updates += 1;
        let budget = 1 + 2 * streams_opened.saturating_add(
            self.max_window_updates_per_data_frame
                .saturating_mul(self.outbound_data_flushed),
        );
        if self.inbound_window_updates > budget {
            GovernorStatus::Flood(TerminationCause::InboundWindowUpdateFlood)
        } else {
            GovernorStatus::Admitted
        }
    }

    /// Frames currently queued and unflushed.
    #[must_use]
    pub fn outbound_frames(&self) -> u64 {
        self.outbound_frames
    }

    /// Control frames currently queued and unflushed.
    #[must_use]
    pub fn outbound_control_frames(&self) -> u64 {
        self.outbound_control_frames
    }

    /// DATA frames confirmed flushed so far.
    #[must_use]
    pub fn outbound_data_flushed(&self) -> u64 {
        self.outbound_data_flushed
    }
}
