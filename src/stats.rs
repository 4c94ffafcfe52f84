//! Termination causes and per-connection observability counters.

use std::fmt;

use crate::error::ErrorCode;

/// The reason a connection was (or is being) torn down.
///
/// Every cause maps to its own monotonically increasing counter in
/// [`ConnectionStats`] so that operators can tell flood-triggered
/// terminations apart from lifecycle timeouts. The termination path itself is
/// identical for all of them; only the recorded cause differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationCause {
    /// Outbound all-frame queue ceiling crossed.
    OutboundFrameFlood,
    /// Outbound control-frame queue ceiling crossed.
    OutboundControlFlood,
    /// Too many consecutive inbound frames with empty payloads.
    InboundEmptyFrameFlood,
    /// Inbound PRIORITY frame budget exhausted.
    InboundPriorityFlood,
    /// Inbound WINDOW_UPDATE frame budget exhausted.
    InboundWindowUpdateFlood,
    /// Connection idle timeout expired.
    IdleTimeout,
    /// Maximum connection duration reached.
    MaxDurationTimeout,
    /// Drain period elapsed after a shutdown notice.
    DrainClose,
    /// A stream's pending data could not be flushed in time.
    PendingFlushTimeout,
    /// Peer committed a protocol or flow-control violation.
    ProtocolError,
    /// The transport reported a hard write failure.
    TransportError,
}

impl TerminationCause {
    /// Stable, human-readable reason string for the final log record.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::OutboundFrameFlood => "outbound frame queue flood",
            Self::OutboundControlFlood => "outbound control frame queue flood",
            Self::InboundEmptyFrameFlood => "inbound empty frame flood",
            Self::InboundPriorityFlood => "inbound PRIORITY frame flood",
            Self::InboundWindowUpdateFlood => "inbound WINDOW_UPDATE frame flood",
            Self::IdleTimeout => "connection idle timeout",
            Self::MaxDurationTimeout => "max connection duration reached",
            Self::DrainClose => "drain timeout after shutdown notice",
            Self::PendingFlushTimeout => "pending flush timeout",
            Self::ProtocolError => "protocol violation",
            Self::TransportError => "transport write failure",
        }
    }

    /// Error code conveyed in the best-effort final GOAWAY.
    #[must_use]
    pub fn error_code(self) -> ErrorCode {
        match self {
            Self::OutboundFrameFlood
            | Self::OutboundControlFlood
            | Self::InboundEmptyFrameFlood
            | Self::InboundPriorityFlood
            | Self::InboundWindowUpdateFlood => ErrorCode::EnhanceYourCalm,
            Self::IdleTimeout | Self::MaxDurationTimeout | Self::DrainClose => ErrorCode::NoError,
            Self::PendingFlushTimeout => ErrorCode::Cancel,
            Self::ProtocolError => ErrorCode::ProtocolError,
            Self::TransportError => ErrorCode::InternalError,
        }
    }

    /// Returns `true` for causes produced by the flood governor.
    #[must_use]
    pub fn is_flood(self) -> bool {
        matches!(
            self,
            Self::OutboundFrameFlood
                | Self::OutboundControlFlood
                | Self::InboundEmptyFrameFlood
                | Self::InboundPriorityFlood
                | Self::InboundWindowUpdateFlood
        )
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Monotonic per-connection counters, one per distinct termination condition.
///
/// `PendingFlushTimeout` is the one cause that can be recorded more than once
/// without tearing the connection down: it fires per stream whose pending
/// data failed to flush. Everything else is recorded at most once because
/// termination is idempotent.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    outbound_frame_flood: u64,
    outbound_control_flood: u64,
    inbound_empty_frame_flood: u64,
    inbound_priority_flood: u64,
    inbound_window_update_flood: u64,
    idle_timeout: u64,
    max_duration_timeout: u64,
    drain_close: u64,
    pending_flush_timeout: u64,
    protocol_error: u64,
    transport_error: u64,
}

impl ConnectionStats {
    /// Create a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter for `cause`.
    pub fn record(&mut self, cause: TerminationCause) {
        *self.slot(cause) += 1;
    }

    /// Read the counter for `cause`.
    #[must_use]
    pub fn get(&self, cause: TerminationCause) -> u64 {
        match cause {
            TerminationCause::OutboundFrameFlood => self.outbound_frame_flood,
            TerminationCause::OutboundControlFlood => self.outbound_control_flood,
            TerminationCause::InboundEmptyFrameFlood => self.inbound_empty_frame_flood,
            TerminationCause::InboundPriorityFlood => self.inbound_priority_flood,
            TerminationCause::InboundWindowUpdateFlood => self.inbound_window_update_flood,
            TerminationCause::IdleTimeout => self.idle_timeout,
            TerminationCause::MaxDurationTimeout => self.max_duration_timeout,
            TerminationCause::DrainClose => self.drain_close,
            TerminationCause::PendingFlushTimeout => self.pending_flush_timeout,
            TerminationCause::ProtocolError => self.protocol_error,
            TerminationCause::TransportError => self.transport_error,
        }
    }

    fn slot(&mut self, cause: TerminationCause) -> &mut u64 {
        match cause {
            TerminationCause::OutboundFrameFlood => &mut self.outbound_frame_flood,
            TerminationCause::OutboundControlFlood => &mut self.outbound_control_flood,
            TerminationCause::InboundEmptyFrameFlood => &mut self.inbound_empty_frame_flood,
            TerminationCause::InboundPriorityFlood => &mut self.inbound_priority_flood,
            TerminationCause::InboundWindowUpdateFlood => &mut self.inbound_window_update_flood,
            TerminationCause::IdleTimeout => &mut self.idle_timeout,
            TerminationCause::MaxDurationTimeout => &mut self.max_duration_timeout,
            TerminationCause::DrainClose => &mut self.drain_close,
            TerminationCause::PendingFlushTimeout => &mut self.pending_flush_timeout,
            TerminationCause::ProtocolError => &mut self.protocol_error,
            TerminationCause::TransportError => &mut self.transport_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent() {
        let mut stats = ConnectionStats::new();
        stats.record(TerminationCause::OutboundControlFlood);
        stats.record(TerminationCause::PendingFlushTimeout);
        stats.record(TerminationCause::PendingFlushTimeout);

        assert_eq!(stats.get(TerminationCause::OutboundControlFlood), 1);
        assert_eq!(stats.get(TerminationCause::PendingFlushTimeout), 2);
        assert_eq!(stats.get(TerminationCause::OutboundFrameFlood), 0);
    }

    #[test]
    fn flood_causes_use_enhance_your_calm() {
        assert!(TerminationCause::InboundPriorityFlood.is_flood());
        assert_eq!(
            TerminationCause::InboundPriorityFlood.error_code(),
            ErrorCode::EnhanceYourCalm
        );
        assert!(!TerminationCause::IdleTimeout.is_flood());
    }
}
