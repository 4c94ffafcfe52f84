//! Error types for the stream multiplexer.

use thiserror::Error;

use crate::stats::TerminationCause;

/// Protocol error codes carried on RST_STREAM and GOAWAY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown, no error.
    NoError = 0x0,
    /// Protocol violation detected.
    ProtocolError = 0x1,
    /// Unexpected internal failure.
    InternalError = 0x2,
    /// Flow-control accounting was violated.
    FlowControlError = 0x3,
    /// Frame received for a closed stream.
    StreamClosed = 0x5,
    /// Frame payload size was invalid.
    FrameSizeError = 0x6,
    /// Stream was refused before any processing (safe to retry).
    RefusedStream = 0x7,
    /// Stream is no longer needed.
    Cancel = 0x8,
    /// Peer is exhibiting behavior that may be generating excessive load.
    EnhanceYourCalm = 0xb,
}

impl ErrorCode {
    /// Numeric wire value of this code.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parse a wire value, mapping unknown codes to `InternalError`.
    #[must_use]
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x3 => Self::FlowControlError,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0xb => Self::EnhanceYourCalm,
            _ => Self::InternalError,
        }
    }
}

/// Error type for multiplexer operations.
///
/// Errors are scoped: stream errors isolate a single exchange and surface to
/// the handler as a reset; connection errors tear the whole connection down.
/// Flood verdicts are reported as [`MuxError::Terminated`], which every
/// emission call site receives as a plain return value so that in-progress
/// frame processing unwinds without partial state.
#[derive(Debug, Error)]
pub enum MuxError {
    /// Connection-fatal error closing all streams uniformly.
    #[error("connection error ({code:?}): {message}")]
    Connection {
        /// Protocol error code to convey in the final GOAWAY.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// Stream-scoped error; the stream is reset, the connection survives.
    #[error("stream {stream_id} error ({code:?}): {message}")]
    Stream {
        /// Stream the error is scoped to.
        stream_id: u32,
        /// Protocol error code to convey in the RST_STREAM.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// The connection has been terminated; no further emission is attempted.
    #[error("connection terminated: {0}")]
    Terminated(TerminationCause),

    /// Hard transport failure reported by the write capability.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl MuxError {
    /// Connection-level protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Connection {
            code: ErrorCode::ProtocolError,
            message: message.into(),
        }
    }

    /// Connection-level flow-control error.
    ///
    /// Window underflow or overflow is always connection-fatal: it indicates
    /// either a peer violating protocol invariants or an internal accounting
    /// bug.
    pub fn flow_control(message: impl Into<String>) -> Self {
        Self::Connection {
            code: ErrorCode::FlowControlError,
            message: message.into(),
        }
    }

    /// Connection-level error with an explicit code.
    pub fn connection(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Connection {
            code,
            message: message.into(),
        }
    }

    /// Stream-scoped error.
    pub fn stream(stream_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Stream {
            stream_id,
            code,
            message: message.into(),
        }
    }

    /// Returns `true` if this error tears down the whole connection.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, Self::Stream { .. })
    }

    /// The error code to convey to the peer.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connection { code, .. } | Self::Stream { code, .. } => *code,
            Self::Terminated(cause) => cause.error_code(),
            Self::Transport(_) => ErrorCode::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trip() {
        for code in [
            ErrorCode::NoError,
            ErrorCode::ProtocolError,
            ErrorCode::FlowControlError,
            ErrorCode::StreamClosed,
            ErrorCode::FrameSizeError,
            ErrorCode::RefusedStream,
            ErrorCode::Cancel,
            ErrorCode::EnhanceYourCalm,
        ] {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), code);
        }
        assert_eq!(ErrorCode::from_u32(0xdead), ErrorCode::InternalError);
    }

    #[test]
    fn scope_classification() {
        assert!(MuxError::protocol("x").is_connection_error());
        assert!(MuxError::flow_control("x").is_connection_error());
        assert!(!MuxError::stream(1, ErrorCode::Cancel, "x").is_connection_error());
    }
}
