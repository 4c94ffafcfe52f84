//! Typed frame events exchanged with the external frame codec.
//!
//! The byte-level grammar lives outside this crate: the codec decodes wire
//! bytes into [`Frame`] values and encodes them back. Modeling the frame
//! space as a closed enum keeps dispatch exhaustive at every processing stage
//! and makes the governor's per-kind accounting total.

use bytes::Bytes;

use crate::error::ErrorCode;

/// One decoded header name/value pair.
///
/// HEADERS events arrive with the header block already decompressed by the
/// codec; this layer never sees raw header block fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header field name.
    pub name: String,
    /// Header field value.
    pub value: String,
}

impl Header {
    /// Create a header pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// DATA frame carrying stream payload bytes.
#[derive(Debug, Clone)]
pub struct DataFrame {
    /// Target stream.
    pub stream_id: u32,
    /// Payload bytes; counted against both flow-control windows.
    pub data: Bytes,
    /// END_STREAM flag.
    pub end_stream: bool,
}

/// HEADERS frame carrying a decoded header list (initial headers or trailers).
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    /// Target stream.
    pub stream_id: u32,
    /// Decoded header list.
    pub headers: Vec<Header>,
    /// END_STREAM flag.
    pub end_stream: bool,
}

/// METADATA frame carrying one chunk of an encoded metadata block.
#[derive(Debug, Clone)]
pub struct MetadataFrame {
    /// Target stream.
    pub stream_id: u32,
    /// Encoded chunk payload; not flow-controlled.
    pub payload: Bytes,
    /// Set on the final chunk of a block.
    pub end_metadata: bool,
}

/// PRIORITY frame adjusting the dependency tree.
#[derive(Debug, Clone, Copy)]
pub struct PriorityFrame {
    /// Target stream; valid even for closed streams.
    pub stream_id: u32,
    /// Stream this one depends on.
    pub dependency: u32,
    /// Relative weight.
    pub weight: u8,
    /// Exclusive dependency flag.
    pub exclusive: bool,
}

/// RST_STREAM frame terminating a single stream.
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    /// Stream to reset.
    pub stream_id: u32,
    /// Reason conveyed to the peer.
    pub error_code: ErrorCode,
}

/// One settings parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    /// Initial flow-control window for new streams.
    InitialWindowSize(u32),
    /// Maximum concurrent streams the sender will accept.
    MaxConcurrentStreams(u32),
}

/// SETTINGS frame (or its acknowledgment).
#[derive(Debug, Clone, Default)]
pub struct SettingsFrame {
    /// True for a bare acknowledgment.
    pub ack: bool,
    /// Parameters carried by a non-ack frame.
    pub settings: Vec<Setting>,
}

impl SettingsFrame {
    /// Build a settings frame carrying `settings`.
    #[must_use]
    pub fn new(settings: Vec<Setting>) -> Self {
        Self {
            ack: false,
            settings,
        }
    }

    /// Build an acknowledgment.
    #[must_use]
    pub fn ack() -> Self {
        Self {
            ack: true,
            settings: Vec::new(),
        }
    }
}

/// PING frame for connection liveness.
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    /// Opaque payload echoed back in the ack.
    pub opaque_data: [u8; 8],
    /// True for an acknowledgment.
    pub ack: bool,
}

impl PingFrame {
    /// Build a ping carrying `opaque_data`.
    #[must_use]
    pub fn new(opaque_data: [u8; 8]) -> Self {
        Self {
            opaque_data,
            ack: false,
        }
    }

    /// Build the acknowledgment for a received ping.
    #[must_use]
    pub fn ack(opaque_data: [u8; 8]) -> Self {
        Self {
            opaque_data,
            ack: true,
        }
    }
}

/// GOAWAY frame announcing connection shutdown.
#[derive(Debug, Clone)]
pub struct GoAwayFrame {
    /// Highest stream id that was or may be processed.
    pub last_stream_id: u32,
    /// Shutdown reason.
    pub error_code: ErrorCode,
    /// Optional opaque debug payload.
    pub debug_data: Bytes,
}

/// WINDOW_UPDATE frame replenishing a flow-control window.
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    /// Target stream, or 0 for the connection window.
    pub stream_id: u32,
    /// Window increment in bytes.
    pub increment: u32,
}

/// Frame kind discriminant, used for governor accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// DATA frame.
    Data,
    /// HEADERS frame.
    Headers,
    /// METADATA frame.
    Metadata,
    /// PRIORITY frame.
    Priority,
    /// RST_STREAM frame.
    RstStream,
    /// SETTINGS frame.
    Settings,
    /// PING frame.
    Ping,
    /// GOAWAY frame.
    GoAway,
    /// WINDOW_UPDATE frame.
    WindowUpdate,
}

impl FrameKind {
    /// Connection-management frames, bounded by the tighter control ceiling.
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::Settings
                | Self::Ping
                | Self::WindowUpdate
                | Self::RstStream
                | Self::Priority
                | Self::GoAway
        )
    }
}

/// One decoded frame event.
#[derive(Debug, Clone)]
pub enum Frame {
    /// DATA frame carrying stream data.
    Data(DataFrame),
    /// HEADERS frame carrying a decoded header list.
    Headers(HeadersFrame),
    /// METADATA chunk of the out-of-band side channel.
    Metadata(MetadataFrame),
    /// PRIORITY frame for the dependency tree.
    Priority(PriorityFrame),
    /// RST_STREAM frame for stream termination.
    RstStream(RstStreamFrame),
    /// SETTINGS frame for connection configuration.
    Settings(SettingsFrame),
    /// PING frame for liveness probing.
    Ping(PingFrame),
    /// GOAWAY frame for connection shutdown.
    GoAway(GoAwayFrame),
    /// WINDOW_UPDATE frame for flow control.
    WindowUpdate(WindowUpdateFrame),
}

impl Frame {
    /// The stream this frame targets; 0 for connection-level frames.
    #[must_use]
    pub fn stream_id(&self) -> u32 {
        match self {
            Self::Data(f) => f.stream_id,
            Self::Headers(f) => f.stream_id,
            Self::Metadata(f) => f.stream_id,
            Self::Priority(f) => f.stream_id,
            Self::RstStream(f) => f.stream_id,
            Self::WindowUpdate(f) => f.stream_id,
            Self::Settings(_) | Self::Ping(_) | Self::GoAway(_) => 0,
        }
    }

    /// Kind discriminant for per-kind accounting.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Data(_) => FrameKind::Data,
            Self::Headers(_) => FrameKind::Headers,
            Self::Metadata(_) => FrameKind::Metadata,
            Self::Priority(_) => FrameKind::Priority,
            Self::RstStream(_) => FrameKind::RstStream,
            Self::Settings(_) => FrameKind::Settings,
            Self::Ping(_) => FrameKind::Ping,
            Self::GoAway(_) => FrameKind::GoAway,
            Self::WindowUpdate(_) => FrameKind::WindowUpdate,
        }
    }

    /// Whether this frame counts against the outbound control-frame ceiling.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.kind().is_control()
    }

    /// Returns `true` for a frame with an empty payload and no
    /// state-changing flag.
    ///
    /// Runs of such frames do nothing but burn CPU on the receiver, which is
    /// exactly what the empty-frame flood ceiling bounds.
    #[must_use]
    pub fn is_empty_noop(&self) -> bool {
        match self {
            Self::Data(f) => f.data.is_empty() && !f.end_stream,
            Self::Headers(f) => f.headers.is_empty() && !f.end_stream,
            Self::Metadata(f) => f.payload.is_empty() && !f.end_metadata,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_classification_is_total() {
        assert!(Frame::Ping(PingFrame::new([0; 8])).is_control());
        assert!(Frame::Settings(SettingsFrame::ack()).is_control());
        assert!(Frame::WindowUpdate(WindowUpdateFrame {
            stream_id: 0,
            increment: 1
        })
        .is_control());
        assert!(!Frame::Data(DataFrame {
            stream_id: 1,
            data: Bytes::new(),
            end_stream: false
        })
        .is_control());
        assert!(!Frame::Headers(HeadersFrame {
            stream_id: 1,
            headers: vec![],
            end_stream: false
        })
        .is_control());
        assert!(!Frame::Metadata(MetadataFrame {
            stream_id: 1,
            payload: Bytes::new(),
            end_metadata: true
        })
        .is_control());
    }

    #[test]
    fn empty_noop_requires_no_flags() {
        let empty_data = Frame::Data(DataFrame {
            stream_id: 1,
            data: Bytes::new(),
            end_stream: false,
        });
        assert!(empty_data.is_empty_noop());

        let fin_data = Frame::Data(DataFrame {
            stream_id: 1,
            data: Bytes::new(),
            end_stream: true,
        });
        assert!(!fin_data.is_empty_noop());

        let ping = Frame::Ping(PingFrame::new([0; 8]));
        assert!(!ping.is_empty_noop());
    }
}
