//! Connection options and their builder.

use std::time::Duration;

/// Default maximum concurrent streams per connection.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 256;

/// Default initial stream-level flow-control window (64 KB - 1).
pub const DEFAULT_INITIAL_STREAM_WINDOW: u32 = 65_535;

/// Default initial connection-level flow-control window (64 KB - 1).
pub const DEFAULT_INITIAL_CONNECTION_WINDOW: u32 = 65_535;

/// Default WINDOW_UPDATE batching divisor.
///
/// A window update is owed once more than `initial / divisor` bytes have
/// been consumed; updates are batched rather than sent per-frame. The
/// threshold fraction is a tuning parameter, not a protocol requirement.
pub const DEFAULT_WINDOW_UPDATE_DIVISOR: u32 = 4;

/// Default ceiling on queued-but-unflushed outbound frames of any kind.
pub const DEFAULT_MAX_OUTBOUND_FRAMES: u64 = 10_000;

/// Default ceiling on queued-but-unflushed outbound control frames.
pub const DEFAULT_MAX_OUTBOUND_CONTROL_FRAMES: u64 = 1_000;

/// Default ceiling on consecutive inbound empty no-op frames.
pub const DEFAULT_MAX_CONSECUTIVE_EMPTY_FRAMES: u64 = 1;

/// Default inbound PRIORITY budget multiplier per opened stream.
pub const DEFAULT_MAX_INBOUND_PRIORITY_FRAMES_PER_STREAM: u64 = 100;

/// Default inbound WINDOW_UPDATE budget multiplier per flushed DATA frame.
pub const DEFAULT_MAX_INBOUND_WINDOW_UPDATES_PER_DATA_FRAME: u64 = 10;

/// Default maximum encoded payload per METADATA chunk (16 KB).
pub const DEFAULT_METADATA_MAX_FRAME_SIZE: usize = 16_384;

/// Default hard cap on a reassembled metadata block (1 MB).
pub const DEFAULT_METADATA_MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Default drain period after a graceful shutdown notice.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default grace period for flushing a finished stream's pending data.
pub const DEFAULT_PENDING_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration surface consumed by a [`crate::Connection`].
///
/// Shared, read-mostly: connections clone it at construction and never
/// mutate it afterwards.
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum concurrent streams accepted from the peer.
    pub max_concurrent_streams: u32,
    /// Initial stream-level window size.
    pub initial_stream_window: u32,
    /// Initial connection-level window size.
    pub initial_connection_window: u32,
    /// WINDOW_UPDATE batching divisor; an update is owed once consumption
    /// exceeds `initial / divisor`.
    pub window_update_divisor: u32,
    /// Outbound all-frame queue ceiling.
    pub max_outbound_frames: u64,
    /// Outbound control-frame queue ceiling.
    pub max_outbound_control_frames: u64,
    /// Consecutive inbound empty no-op frame ceiling.
    pub max_consecutive_empty_frames: u64,
    /// Inbound PRIORITY budget, scaled by opened streams.
    pub max_inbound_priority_frames_per_stream: u64,
    /// Inbound WINDOW_UPDATE budget, scaled by flushed DATA frames.
    pub max_inbound_window_updates_per_data_frame: u64,
    /// Maximum encoded payload carried by one METADATA chunk.
    pub metadata_max_frame_size: usize,
    /// Hard cap on a reassembled metadata block; exceeding it resets the
    /// stream rather than truncating the block.
    pub metadata_max_block_size: usize,
    /// Treat peer-caused frame grammar errors as stream-scoped where the
    /// protocol allows isolating them.
    pub stream_error_on_invalid_message: bool,
    /// Idle timeout; `None` disables.
    pub idle_timeout: Option<Duration>,
    /// Maximum connection duration; `None` disables.
    pub max_connection_duration: Option<Duration>,
    /// Drain period after a shutdown notice before forced close.
    pub drain_timeout: Duration,
    /// Grace period for flushing a locally-finished stream's buffered data.
    pub pending_flush_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_stream_window: DEFAULT_INITIAL_STREAM_WINDOW,
            initial_connection_window: DEFAULT_INITIAL_CONNECTION_WINDOW,
            window_update_divisor: DEFAULT_WINDOW_UPDATE_DIVISOR,
            max_outbound_frames: DEFAULT_MAX_OUTBOUND_FRAMES,
            max_outbound_control_frames: DEFAULT_MAX_OUTBOUND_CONTROL_FRAMES,
            max_consecutive_empty_frames: DEFAULT_MAX_CONSECUTIVE_EMPTY_FRAMES,
            max_inbound_priority_frames_per_stream:
                DEFAULT_MAX_INBOUND_PRIORITY_FRAMES_PER_STREAM,
            max_inbound_window_updates_per_data_frame:
                DEFAULT_MAX_INBOUND_WINDOW_UPDATES_PER_DATA_FRAME,
            metadata_max_frame_size: DEFAULT_METADATA_MAX_FRAME_SIZE,
            metadata_max_block_size: DEFAULT_METADATA_MAX_BLOCK_SIZE,
            stream_error_on_invalid_message: false,
            idle_timeout: None,
            max_connection_duration: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            pending_flush_timeout: DEFAULT_PENDING_FLUSH_TIMEOUT,
        }
    }
}

impl Options {
    /// Create default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a customized option set.
    #[must_use]
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::new()
    }
}

/// Builder for [`Options`].
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a builder seeded with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum concurrent streams.
    #[must_use]
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.options.max_concurrent_streams = max;
        self
    }

    /// Set the initial stream-level window size, capped at 2^31-1.
    #[must_use]
    pub fn initial_stream_window(mut self, size: u32) -> Self {
        self.options.initial_stream_window = size.min(i32::MAX as u32);
        self
    }

    /// Set the initial connection-level window size, capped at 2^31-1.
    #[must_use]
    pub fn initial_connection_window(mut self, size: u32) -> Self {
        self.options.initial_connection_window = size.min(i32::MAX as u32);
        self
    }

    /// Set the WINDOW_UPDATE batching divisor (minimum 1).
    #[must_use]
    pub fn window_update_divisor(mut self, divisor: u32) -> Self {
        self.options.window_update_divisor = divisor.max(1);
        self
    }

    /// Set the outbound all-frame queue ceiling.
    #[must_use]
    pub fn max_outbound_frames(mut self, max: u64) -> Self {
        self.options.max_outbound_frames = max;
        self
    }

    /// Set the outbound control-frame queue ceiling.
    #[must_use]
    pub fn max_outbound_control_frames(mut self, max: u64) -> Self {
        self.options.max_outbound_control_frames = max;
        self
    }

    /// Set the consecutive inbound empty-frame ceiling.
    #[must_use]
    pub fn max_consecutive_empty_frames(mut self, max: u64) -> Self {
        self.options.max_consecutive_empty_frames = max;
        self
    }

    /// Set the inbound PRIORITY budget multiplier.
    #[must_use]
    pub fn max_inbound_priority_frames_per_stream(mut self, max: u64) -> Self {
        self.options.max_inbound_priority_frames_per_stream = max;
        self
    }

    /// Set the inbound WINDOW_UPDATE budget multiplier.
    #[must_use]
    pub fn max_inbound_window_updates_per_data_frame(mut self, max: u64) -> Self {
        self.options.max_inbound_window_updates_per_data_frame = max;
        self
    }

    /// Set the maximum encoded payload per METADATA chunk (minimum 1).
    #[must_use]
    pub fn metadata_max_frame_size(mut self, size: usize) -> Self {
        self.options.metadata_max_frame_size = size.max(1);
        self
    }

    /// Set the hard cap on a reassembled metadata block.
    #[must_use]
    pub fn metadata_max_block_size(mut self, size: usize) -> Self {
        self.options.metadata_max_block_size = size;
        self
    }

    /// Isolate peer-caused grammar errors to the offending stream.
    #[must_use]
    pub fn stream_error_on_invalid_message(mut self, enabled: bool) -> Self {
        self.options.stream_error_on_invalid_message = enabled;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.options.idle_timeout = Some(timeout);
        self
    }

    /// Set the maximum connection duration.
    #[must_use]
    pub fn max_connection_duration(mut self, duration: Duration) -> Self {
        self.options.max_connection_duration = Some(duration);
        self
    }

    /// Set the drain period after a shutdown notice.
    #[must_use]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.options.drain_timeout = timeout;
        self
    }

    /// Set the pending-flush grace period.
    #[must_use]
    pub fn pending_flush_timeout(mut self, timeout: Duration) -> Self {
        self.options.pending_flush_timeout = timeout;
        self
    }

    /// Build the option set.
    #[must_use]
    pub fn build(self) -> Options {
        self.options
    }
}
