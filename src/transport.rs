//! The seam between the connection and the byte-level codec.

use std::io;

use crate::frame::Frame;

/// Result of offering one frame to the transport.
#[derive(Debug)]
pub enum WriteOutcome {
    /// Frame accepted and flushed; outbound accounting may release it.
    Flushed,
    /// Transport cannot accept the frame right now; retry later with the
    /// same frame. Nothing was consumed.
    WouldBlock,
    /// Transport failure; the connection is no longer usable.
    Error(io::Error),
}

/// Downstream sink for encoded frames.
///
/// Implementations encode the frame and hand it to the wire. A frame is
/// only considered delivered once the sink reports [`WriteOutcome::Flushed`];
/// flood accounting releases queue budget on that confirmation, not on
/// enqueue.
pub trait FrameSink {
    /// Offer one frame to the transport.
    fn write_frame(&mut self, frame: &Frame) -> WriteOutcome;
}

impl<T: FrameSink + ?Sized> FrameSink for &mut T {
    fn write_frame(&mut self, frame: &Frame) -> WriteOutcome {
        (**self).write_frame(frame)
    }
}
