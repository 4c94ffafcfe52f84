#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use std::sync::Once;
use std::time::Instant;

use h2mux::frame::{
    DataFrame, Frame, FrameKind, Header, HeadersFrame, PriorityFrame, WindowUpdateFrame,
};
use h2mux::transport::{FrameSink, WriteOutcome};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED5EED;

const PROPTEST_SEED_ENV: &str = "H2MUX_PROPTEST_SEED";

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    // If CI is set and no explicit seed is provided, use a fixed seed.
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// A frame sink that records everything it flushes.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Kinds of every flushed frame, in order.
    pub flushed: Vec<FrameKind>,
    /// When set, every write reports backpressure.
    pub blocked: bool,
}

impl RecordingSink {
    /// Create an accepting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSink for RecordingSink {
    fn write_frame(&mut self, frame: &Frame) -> WriteOutcome {
        if self.blocked {
            return WriteOutcome::WouldBlock;
        }
        self.flushed.push(frame.kind());
        WriteOutcome::Flushed
    }
}

/// A sink that fails every write with a broken-pipe error.
#[derive(Debug, Default)]
pub struct FailingSink;

impl FrameSink for FailingSink {
    fn write_frame(&mut self, _frame: &Frame) -> WriteOutcome {
        WriteOutcome::Error(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "peer hung up",
        ))
    }
}

/// HEADERS frame opening `stream_id` with a minimal header list.
#[must_use]
pub fn request_headers(stream_id: u32, end_stream: bool) -> Frame {
    Frame::Headers(HeadersFrame {
        stream_id,
        headers: vec![Header::new(":method", "GET"), Header::new(":path", "/")],
        end_stream,
    })
}

/// DATA frame with a zero-filled payload of `len` bytes.
#[must_use]
pub fn data_of_len(stream_id: u32, len: usize, end_stream: bool) -> Frame {
    Frame::Data(DataFrame {
        stream_id,
        data: bytes::Bytes::from(vec![0u8; len]),
        end_stream,
    })
}

/// Empty DATA frame with no flags, the classic no-op flood unit.
#[must_use]
pub fn empty_data(stream_id: u32) -> Frame {
    Frame::Data(DataFrame {
        stream_id,
        data: bytes::Bytes::new(),
        end_stream: false,
    })
}

/// PRIORITY frame targeting `stream_id`.
#[must_use]
pub fn priority(stream_id: u32) -> Frame {
    Frame::Priority(PriorityFrame {
        stream_id,
        dependency: 0,
        weight: 16,
        exclusive: false,
    })
}

/// WINDOW_UPDATE frame targeting `stream_id`.
#[must_use]
pub fn window_update(stream_id: u32, increment: u32) -> Frame {
    Frame::WindowUpdate(WindowUpdateFrame {
        stream_id,
        increment,
    })
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}
