//! Per-stream state machine and the connection's stream table.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use bytes::Bytes;

use crate::error::{ErrorCode, MuxError};
use crate::flow_control::FlowWindow;
use crate::metadata::{MetadataAssembler, MetadataMap};

/// Stream lifecycle state.
///
/// ```text
///            HEADERS            end-stream (local)
///   Idle ----------> Open -----------------------> HalfClosedLocal
///    |                |  \                               |
///    |                |   `---> HalfClosedRemote ---.    | end-stream
///    |   RST_STREAM / |  end-stream (remote)        |    | (remote)
///    |   fatal error  v                             v    v
///    `------------> Closed <------------------------´----´
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No frames exchanged yet.
    Idle,
    /// Both directions live.
    Open,
    /// Local side has signaled end-of-stream.
    HalfClosedLocal,
    /// Remote side has signaled end-of-stream.
    HalfClosedRemote,
    /// Both directions done, or the stream was reset.
    Closed,
}

impl StreamState {
    /// Whether the local side may still emit DATA.
    #[must_use]
    pub fn can_send(self) -> bool {
        matches!(self, Self::Open | Self::HalfClosedRemote)
    }

    /// Whether the remote side may still deliver DATA.
    #[must_use]
    pub fn can_recv(self) -> bool {
        matches!(self, Self::Open | Self::HalfClosedLocal)
    }

    /// Whether the stream is in its terminal state.
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Data buffered because the send window could not admit it.
#[derive(Debug)]
struct PendingData {
    data: Bytes,
    end_stream: bool,
}

/// One logical request/response exchange.
#[derive(Debug)]
pub struct Stream {
    id: u32,
    state: StreamState,
    send_window: FlowWindow,
    recv_window: FlowWindow,
    metadata: MetadataAssembler,
    pending_send: VecDeque<PendingData>,
    headers_received: bool,
    headers_sent: bool,
    end_stream_sent: bool,
    end_stream_received: bool,
    reset_code: Option<ErrorCode>,
    flush_deadline: Option<Instant>,
}

impl Stream {
    /// Create a stream in `Idle`.
    #[must_use]
    pub fn new(id: u32, send_initial: u32, recv_initial: u32, metadata_max_block: usize) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window: FlowWindow::new(send_initial),
            recv_window: FlowWindow::new(recv_initial),
            metadata: MetadataAssembler::new(metadata_max_block),
            pending_send: VecDeque::new(),
            headers_received: false,
            headers_sent: false,
            end_stream_sent: false,
            end_stream_received: false,
            reset_code: None,
            flush_deadline: None,
        }
    }

    /// Stream identifier.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Available send window.
    #[must_use]
    pub fn send_window(&self) -> i32 {
        self.send_window.available()
    }

    /// Available receive window.
    #[must_use]
    pub fn recv_window(&self) -> i32 {
        self.recv_window.available()
    }

    /// Reset reason, if the stream was reset.
    #[must_use]
    pub fn reset_code(&self) -> Option<ErrorCode> {
        self.reset_code
    }

    /// Whether initial headers were already received (later HEADERS are
    /// trailers).
    #[must_use]
    pub fn headers_received(&self) -> bool {
        self.headers_received
    }

    /// Whether the local side has signaled end-of-stream.
    #[must_use]
    pub fn end_stream_sent(&self) -> bool {
        self.end_stream_sent
    }

    /// Whether the remote side has signaled end-of-stream.
    #[must_use]
    pub fn end_stream_received(&self) -> bool {
        self.end_stream_received
    }

    /// Transition for locally sent headers (initial or trailers).
    pub fn send_headers(&mut self, end_stream: bool) -> Result<(), MuxError> {
        if self.end_stream_sent {
            return Err(MuxError::stream(
                self.id,
                ErrorCode::StreamClosed,
                "headers after local end of stream",
            ));
        }
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedLocal
                } else {
                    StreamState::Open
                };
            }
            StreamState::Open => {
                if end_stream {
                    self.state = StreamState::HalfClosedLocal;
                }
            }
            StreamState::HalfClosedRemote => {
                if end_stream {
                    self.state = StreamState::Closed;
                }
            }
            StreamState::HalfClosedLocal | StreamState::Closed => {
                return Err(MuxError::stream(
                    self.id,
                    ErrorCode::StreamClosed,
                    "cannot send headers in current state",
                ));
            }
        }
        self.headers_sent = true;
        self.end_stream_sent |= end_stream;
        Ok(())
    }

    /// Transition for received headers (initial or trailers).
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<(), MuxError> {
        if self.end_stream_received {
            return Err(MuxError::stream(
                self.id,
                ErrorCode::StreamClosed,
                "headers after remote end of stream",
            ));
        }
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
            }
            StreamState::Open => {
                if end_stream {
                    self.state = StreamState::HalfClosedRemote;
                }
            }
            StreamState::HalfClosedLocal => {
                if end_stream {
                    self.state = StreamState::Closed;
                }
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(MuxError::stream(
                    self.id,
                    ErrorCode::StreamClosed,
                    "cannot receive headers in current state",
                ));
            }
        }
        self.headers_received = true;
        self.end_stream_received |= end_stream;
        Ok(())
    }

    /// Account for received DATA: window consumption plus state transition.
    ///
    /// Underflow surfaces as a connection-fatal flow-control error.
    pub fn recv_data(&mut self, len: u32, end_stream: bool) -> Result<(), MuxError> {
        if !self.state.can_recv() {
            return Err(MuxError::stream(
                self.id,
                ErrorCode::StreamClosed,
                "DATA in non-receivable state",
            ));
        }
        self.recv_window.consume(len)?;
        if end_stream {
            self.end_stream_received = true;
            self.state = match self.state {
                StreamState::HalfClosedLocal => StreamState::Closed,
                _ => StreamState::HalfClosedRemote,
            };
        }
        Ok(())
    }

    /// Whether DATA may currently be queued for sending.
    #[must_use]
    pub fn can_send_data(&self) -> bool {
        self.state.can_send() && !self.end_stream_sent
    }

    /// Commit the state transition for locally sent end-of-stream DATA.
    ///
    /// Called only after the frame has been admitted by the governor, so a
    /// refused emission never leaves a half-applied transition.
    pub fn commit_send_end(&mut self) {
        self.end_stream_sent = true;
        self.state = match self.state {
            StreamState::HalfClosedRemote => StreamState::Closed,
            _ => StreamState::HalfClosedLocal,
        };
    }

    /// Consume from the send window after a DATA frame was admitted.
    pub fn consume_send_window(&mut self, n: u32) -> Result<(), MuxError> {
        self.send_window.consume(n)
    }

    /// Replenish the send window from a received WINDOW_UPDATE.
    pub fn expand_send_window(&mut self, increment: u32) -> Result<(), MuxError> {
        self.send_window.expand(increment)
    }

    /// Adjust the send window for a peer SETTINGS initial-window change.
    pub fn set_initial_send_window(&mut self, new_initial: u32) -> Result<(), MuxError> {
        self.send_window.set_initial(new_initial)
    }

    /// Batched WINDOW_UPDATE owed for this stream's receive window, if any.
    #[must_use]
    pub fn pending_recv_update(&self, divisor: u32) -> Option<u32> {
        self.recv_window.pending_update(divisor)
    }

    /// Replenish the receive window once a WINDOW_UPDATE has been queued.
    pub fn note_recv_update(&mut self, increment: u32) -> Result<(), MuxError> {
        self.recv_window.expand(increment)
    }

    /// Accept one inbound metadata chunk, rejecting blocks arriving after
    /// the remote end-of-stream.
    pub fn recv_metadata_chunk(
        &mut self,
        payload: Bytes,
        end_metadata: bool,
    ) -> Result<Option<MetadataMap>, MuxError> {
        if self.end_stream_received {
            return Err(MuxError::stream(
                self.id,
                ErrorCode::ProtocolError,
                "metadata after remote end of stream",
            ));
        }
        self.metadata.on_chunk(self.id, payload, end_metadata)
    }

    /// Buffer outbound data blocked on the send window.
    pub fn queue_send(&mut self, data: Bytes, end_stream: bool) {
        self.pending_send.push_back(PendingData { data, end_stream });
    }

    /// Returns `true` while window-blocked data remains buffered.
    #[must_use]
    pub fn has_pending_send(&self) -> bool {
        !self.pending_send.is_empty()
    }

    /// Take up to `max_len` buffered bytes; the end-stream marker is only
    /// reported when the final buffered chunk is fully drained.
    pub fn take_pending(&mut self, max_len: usize) -> Option<(Bytes, bool)> {
        if max_len == 0 {
            return None;
        }
        let front = self.pending_send.front_mut()?;
        if front.data.len() <= max_len {
            let chunk = self.pending_send.pop_front()?;
            let end = chunk.end_stream && self.pending_send.is_empty();
            Some((chunk.data, end))
        } else {
            let data = front.data.split_to(max_len);
            Some((data, false))
        }
    }

    /// Arm the pending-flush deadline if not already armed.
    pub fn arm_flush_deadline(&mut self, deadline: Instant) {
        if self.flush_deadline.is_none() {
            self.flush_deadline = Some(deadline);
        }
    }

    /// Clear the pending-flush deadline.
    pub fn clear_flush_deadline(&mut self) {
        self.flush_deadline = None;
    }

    /// The armed pending-flush deadline, if any.
    #[must_use]
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_deadline
    }

    /// Force the stream closed, discarding buffered partial frame state.
    pub fn reset(&mut self, code: ErrorCode) {
        self.state = StreamState::Closed;
        self.reset_code = Some(code);
        self.pending_send.clear();
        self.flush_deadline = None;
    }
}

/// Target classification for PRIORITY accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamClass {
    /// Stream id in a not-yet-opened part of the namespace.
    Idle,
    /// Stream exists and is not closed.
    Open,
    /// Stream is closed, or the id was retired/unknown.
    Closed,
}

/// Outcome of a peer attempting to open a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Stream created; fetch it with `get_mut`.
    Opened,
    /// Id belongs to an already-retired stream.
    Retired,
    /// Concurrency ceiling reached; refuse with a stream-level error.
    Refused,
}

/// The connection's stream table.
///
/// Owns every stream exclusively; ids are allocated monotonically per side
/// and never reused within a connection.
#[derive(Debug)]
pub struct StreamStore {
    streams: HashMap<u32, Stream>,
    is_client: bool,
    next_local_id: u32,
    highest_remote_id: u32,
    max_concurrent: u32,
    peer_max_concurrent: u32,
    send_initial: u32,
    recv_initial: u32,
    metadata_max_block: usize,
    opened_total: u64,
    refused_streak: u32,
}

impl StreamStore {
    /// Create an empty table. Clients allocate odd local ids, servers even.
    #[must_use]
    pub fn new(
        is_client: bool,
        max_concurrent: u32,
        send_initial: u32,
        recv_initial: u32,
        metadata_max_block: usize,
    ) -> Self {
        Self {
            streams: HashMap::new(),
            is_client,
            next_local_id: if is_client { 1 } else { 2 },
            highest_remote_id: 0,
            max_concurrent,
            peer_max_concurrent: u32::MAX,
            send_initial,
            recv_initial,
            metadata_max_block,
            opened_total: 0,
            refused_streak: 0,
        }
    }

    /// Look up a stream.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Stream> {
        self.streams.get(&id)
    }

    /// Look up a stream mutably.
    #[must_use]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    /// Streams not yet in the `Closed` state.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    /// Total streams ever opened on this connection.
    #[must_use]
    pub fn opened_total(&self) -> u64 {
        self.opened_total
    }

    /// Record the peer's concurrent-stream limit from SETTINGS.
    pub fn set_peer_max_concurrent(&mut self, max: u32) {
        self.peer_max_concurrent = max;
    }

    /// Allocate the next local stream id and create the stream.
    pub fn allocate_local(&mut self) -> Result<u32, MuxError> {
        if self.active_count() >= self.peer_max_concurrent as usize {
            return Err(MuxError::stream(
                0,
                ErrorCode::RefusedStream,
                "peer concurrent stream limit reached",
            ));
        }
        let id = self.next_local_id;
        self.next_local_id = id.checked_add(2).ok_or_else(|| {
            MuxError::protocol("local stream id space exhausted")
        })?;
        self.insert_new(id);
        Ok(id)
    }

    /// Handle the peer opening stream `id` with a HEADERS frame.
    ///
    /// Ids must come from the peer's namespace and increase monotonically;
    /// a retired id is reported rather than recreated, so an id is never
    /// reused within a connection. A full ceiling's worth of consecutive
    /// refusals with no successful open escalates to a connection error.
    pub fn open_remote(&mut self, id: u32) -> Result<OpenOutcome, MuxError> {
        let local_parity = u32::from(self.is_client);
        if id == 0 || id % 2 == local_parity % 2 {
            return Err(MuxError::protocol(format!(
                "peer opened stream {id} outside its id namespace"
            )));
        }
        if id <= self.highest_remote_id {
            return Ok(OpenOutcome::Retired);
        }
        if self.active_count() >= self.max_concurrent as usize {
            self.refused_streak += 1;
            if self.refused_streak > self.max_concurrent {
                return Err(MuxError::protocol(
                    "peer keeps opening streams past the concurrency ceiling",
                ));
            }
            return Ok(OpenOutcome::Refused);
        }
        self.refused_streak = 0;
        self.highest_remote_id = id;
        self.insert_new(id);
        Ok(OpenOutcome::Opened)
    }

    fn insert_new(&mut self, id: u32) {
        self.opened_total += 1;
        self.streams.insert(
            id,
            Stream::new(
                id,
                self.send_initial,
                self.recv_initial,
                self.metadata_max_block,
            ),
        );
    }

    /// Classify `id` for PRIORITY accounting.
    #[must_use]
    pub fn class_of(&self, id: u32) -> StreamClass {
        if let Some(stream) = self.streams.get(&id) {
            if stream.state().is_closed() {
                StreamClass::Closed
            } else {
                StreamClass::Open
            }
        } else {
            let local_parity = u32::from(self.is_client);
            let seen = if id % 2 == local_parity % 2 {
                id < self.next_local_id
            } else {
                id <= self.highest_remote_id
            };
            if seen {
                StreamClass::Closed
            } else {
                StreamClass::Idle
            }
        }
    }

    /// Highest peer-opened stream id, for GOAWAY.
    #[must_use]
    pub fn highest_remote_id(&self) -> u32 {
        self.highest_remote_id
    }

    /// Apply a peer SETTINGS initial-window change to every stream.
    pub fn set_initial_send_window(&mut self, new_initial: u32) -> Result<(), MuxError> {
        for stream in self.streams.values_mut() {
            stream.set_initial_send_window(new_initial)?;
        }
        self.send_initial = new_initial;
        Ok(())
    }

    /// Ids of streams that are not closed, ascending.
    #[must_use]
    pub fn active_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| !s.state().is_closed())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Force every stream closed, as on connection teardown.
    pub fn close_all(&mut self, code: ErrorCode) {
        for stream in self.streams.values_mut() {
            if !stream.state().is_closed() {
                stream.reset(code);
            }
        }
    }

    /// Drop closed streams from the table. Their ids stay retired because
    /// the monotonic id tracking survives pruning.
    pub fn prune_closed(&mut self) {
        self.streams.retain(|_, s| !s.state().is_closed());
    }

    /// Iterate all streams mutably (timer polling).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.streams.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_concurrent: u32) -> StreamStore {
        StreamStore::new(false, max_concurrent, 65_535, 65_535, 1 << 20)
    }

    #[test]
    fn full_lifecycle_both_directions() {
        let mut stream = Stream::new(1, 65_535, 65_535, 1 << 20);
        stream.recv_headers(false).expect("open");
        assert_eq!(stream.state(), StreamState::Open);

        stream.recv_data(100, true).expect("peer end");
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
        assert!(stream.end_stream_received());

        stream.send_headers(false).expect("response headers");
        stream.commit_send_end();
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn rst_from_any_state_goes_straight_to_closed() {
        let mut stream = Stream::new(3, 65_535, 65_535, 1 << 20);
        stream.recv_headers(false).expect("open");
        stream.queue_send(Bytes::from_static(b"pending"), false);
        stream.reset(ErrorCode::Cancel);

        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(stream.reset_code(), Some(ErrorCode::Cancel));
        // Buffered partial frame state is discarded on reset.
        assert!(!stream.has_pending_send());
    }

    #[test]
    fn data_after_remote_end_is_a_stream_error() {
        let mut stream = Stream::new(5, 65_535, 65_535, 1 << 20);
        stream.recv_headers(true).expect("open+end");
        let err = stream.recv_data(1, false).expect_err("past end");
        assert!(!err.is_connection_error());
    }

    #[test]
    fn trailers_after_data() {
        let mut stream = Stream::new(7, 65_535, 65_535, 1 << 20);
        stream.recv_headers(false).expect("headers");
        stream.recv_data(10, false).expect("data");
        stream.recv_headers(true).expect("trailers");
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
    }

    #[test]
    fn remote_ids_monotonic_never_reused() {
        let mut store = store(10);
        assert_eq!(store.open_remote(1).expect("open"), OpenOutcome::Opened);
        assert_eq!(store.open_remote(5).expect("open"), OpenOutcome::Opened);
        // Going back to a skipped or used id reports it as retired.
        assert_eq!(store.open_remote(3).expect("ok"), OpenOutcome::Retired);
        assert_eq!(store.open_remote(5).expect("ok"), OpenOutcome::Retired);
        assert_eq!(store.opened_total(), 2);
    }

    #[test]
    fn remote_parity_enforced() {
        let mut store = store(10);
        assert!(store.open_remote(2).is_err());

        let mut client_side = StreamStore::new(true, 10, 65_535, 65_535, 1 << 20);
        assert!(client_side.open_remote(1).is_err());
        assert_eq!(
            client_side.open_remote(2).expect("server push id"),
            OpenOutcome::Opened
        );
    }

    #[test]
    fn ceiling_refuses_then_escalates() {
        let mut store = store(2);
        assert_eq!(store.open_remote(1).expect("ok"), OpenOutcome::Opened);
        assert_eq!(store.open_remote(3).expect("ok"), OpenOutcome::Opened);
        assert_eq!(store.open_remote(5).expect("ok"), OpenOutcome::Refused);
        assert_eq!(store.open_remote(7).expect("ok"), OpenOutcome::Refused);
        // Third consecutive refusal crosses the ceiling-sized streak.
        assert!(store.open_remote(9).is_err());
    }

    #[test]
    fn close_frees_capacity_and_resets_streak() {
        let mut store = store(1);
        assert_eq!(store.open_remote(1).expect("ok"), OpenOutcome::Opened);
        assert_eq!(store.open_remote(3).expect("ok"), OpenOutcome::Refused);
        store.get_mut(1).expect("stream").reset(ErrorCode::Cancel);
        assert_eq!(store.open_remote(5).expect("ok"), OpenOutcome::Opened);
    }

    #[test]
    fn classification_covers_idle_open_closed() {
        let mut store = store(10);
        assert_eq!(store.class_of(1), StreamClass::Idle);
        store.open_remote(1).expect("open");
        store.get_mut(1).expect("stream").recv_headers(false).expect("headers");
        assert_eq!(store.class_of(1), StreamClass::Open);
        store.get_mut(1).expect("stream").reset(ErrorCode::Cancel);
        assert_eq!(store.class_of(1), StreamClass::Closed);
        // Pruning retires the id but keeps it classified as closed.
        store.prune_closed();
        assert_eq!(store.class_of(1), StreamClass::Closed);
        assert_eq!(store.class_of(3), StreamClass::Idle);
    }

    #[test]
    fn take_pending_respects_window_and_end_marker() {
        let mut stream = Stream::new(1, 65_535, 65_535, 1 << 20);
        stream.queue_send(Bytes::from_static(b"hello world"), true);

        let (chunk, end) = stream.take_pending(5).expect("partial");
        assert_eq!(&chunk[..], b"hello");
        assert!(!end);

        let (chunk, end) = stream.take_pending(1024).expect("rest");
        assert_eq!(&chunk[..], b" world");
        assert!(end);
        assert!(!stream.has_pending_send());
    }
}
