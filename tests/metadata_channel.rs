//! End-to-end behavior of the metadata side channel.

mod common;

use std::time::Instant;

use common::*;
use h2mux::frame::{Frame, FrameKind};
use h2mux::metadata::{encode_block, MetadataMap};
use h2mux::transport::{FrameSink, WriteOutcome};
use h2mux::{Connection, ConnectionState, Event, Options, Role};

fn server(options: Options) -> Connection {
    Connection::new(Role::Server, options, Instant::now())
}

/// Sink that keeps full clones of flushed frames for inspection.
#[derive(Debug, Default)]
struct CapturingSink {
    frames: Vec<Frame>,
}

impl FrameSink for CapturingSink {
    fn write_frame(&mut self, frame: &Frame) -> WriteOutcome {
        self.frames.push(frame.clone());
        WriteOutcome::Flushed
    }
}

fn sample_metadata() -> MetadataMap {
    let mut map = MetadataMap::new();
    map.insert("route", "edge-a");
    map.insert("trace-id", "00f067aa0ba902b7");
    map.insert("route", "edge-b");
    map
}

#[test]
fn outbound_block_is_chunked_to_the_frame_ceiling() {
    init_test_logging();
    test_phase!("outbound metadata chunking");

    let mut conn = server(Options::builder().metadata_max_frame_size(16).build());
    conn.recv_frame(request_headers(1, false), Instant::now())
        .expect("open");

    conn.send_metadata(1, &sample_metadata(), Instant::now())
        .expect("queued");
    let mut sink = CapturingSink::default();
    conn.flush(&mut sink, Instant::now()).expect("flush");

    let chunks: Vec<_> = sink
        .frames
        .iter()
        .filter_map(|frame| match frame {
            Frame::Metadata(f) => Some(f),
            _ => None,
        })
        .collect();
    assert!(chunks.len() > 1, "expected multiple chunks");
    for chunk in &chunks[..chunks.len() - 1] {
        assert!(chunk.payload.len() <= 16);
        assert!(!chunk.end_metadata);
    }
    assert!(chunks.last().expect("chunks").end_metadata);

    test_complete!("outbound metadata chunking", chunks = chunks.len());
}

#[test]
fn inbound_block_reassembles_across_chunks() {
    init_test_logging();
    test_phase!("inbound metadata reassembly");

    let mut conn = server(Options::default());
    conn.recv_frame(request_headers(1, false), Instant::now())
        .expect("open");

    let map = sample_metadata();
    let chunks = encode_block(1, &map, 8);
    assert!(chunks.len() > 1);

    let mut delivered = None;
    for chunk in chunks {
        if let Some(event) = conn
            .recv_frame(Frame::Metadata(chunk), Instant::now())
            .expect("admitted")
        {
            delivered = Some(event);
        }
    }
    match delivered {
        Some(Event::Metadata {
            stream_id,
            metadata,
        }) => {
            assert_eq!(stream_id, 1);
            assert_eq!(metadata, map);
            // Duplicate keys arrive in their original order.
            let routes: Vec<&str> = metadata.get_all("route").collect();
            assert_eq!(routes, ["edge-a", "edge-b"]);
        }
        other => panic!("expected a metadata event, got {other:?}"),
    }

    test_complete!("inbound metadata reassembly");
}

#[test]
fn oversized_block_resets_the_stream_only() {
    init_test_logging();
    test_phase!("oversized metadata block");

    let mut conn = server(Options::builder().metadata_max_block_size(64).build());
    conn.recv_frame(request_headers(1, false), Instant::now())
        .expect("open");

    let mut big = MetadataMap::new();
    big.insert("k", "v".repeat(256));
    let chunks = encode_block(1, &big, 32);

    let mut reset = None;
    for chunk in chunks {
        match conn
            .recv_frame(Frame::Metadata(chunk), Instant::now())
            .expect("stream-scoped, connection survives")
        {
            Some(Event::StreamReset {
                stream_id,
                error_code,
            }) => {
                reset = Some((stream_id, error_code));
                break;
            }
            Some(other) => panic!("unexpected event: {other:?}"),
            None => {}
        }
    }
    let (stream_id, error_code) = reset.expect("stream was reset");
    assert_eq!(stream_id, 1);
    assert_eq!(error_code, h2mux::ErrorCode::EnhanceYourCalm);
    assert_eq!(conn.state(), ConnectionState::Open);

    test_section!("the reset is conveyed to the peer");
    let mut sink = RecordingSink::new();
    conn.flush(&mut sink, Instant::now()).expect("flush");
    assert!(sink.flushed.contains(&FrameKind::RstStream));

    test_section!("a fresh stream is unaffected");
    assert!(conn
        .recv_frame(request_headers(3, false), Instant::now())
        .expect("admitted")
        .is_some());

    test_complete!("oversized metadata block");
}

#[test]
fn metadata_interleaves_without_reordering_data() {
    init_test_logging();
    test_phase!("metadata interleaved with data");

    let mut conn = server(Options::default());
    conn.recv_frame(request_headers(1, false), Instant::now())
        .expect("open");

    let mut kinds = Vec::new();
    let mut push = |event: Option<Event>| {
        if let Some(event) = event {
            kinds.push(match event {
                Event::Data { .. } => "data",
                Event::Metadata { .. } => "metadata",
                other => panic!("unexpected event: {other:?}"),
            });
        }
    };

    push(
        conn.recv_frame(data_of_len(1, 4, false), Instant::now())
            .expect("ok"),
    );
    for chunk in encode_block(1, &sample_metadata(), 1024) {
        push(
            conn.recv_frame(Frame::Metadata(chunk), Instant::now())
                .expect("ok"),
        );
    }
    push(
        conn.recv_frame(data_of_len(1, 4, true), Instant::now())
            .expect("ok"),
    );

    assert_eq!(kinds, ["data", "metadata", "data"]);

    test_complete!("metadata interleaved with data");
}

#[test]
fn metadata_after_end_of_stream_is_rejected() {
    init_test_logging();
    let mut conn = server(
        Options::builder()
            .stream_error_on_invalid_message(true)
            .build(),
    );
    conn.recv_frame(request_headers(1, true), Instant::now())
        .expect("open and end");

    let chunk = encode_block(1, &sample_metadata(), 1024).remove(0);
    let event = conn
        .recv_frame(Frame::Metadata(chunk), Instant::now())
        .expect("stream-scoped");
    assert!(matches!(
        event,
        Some(Event::StreamReset { stream_id: 1, .. })
    ));
    assert_eq!(conn.state(), ConnectionState::Open);
}
