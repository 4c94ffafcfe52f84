//! The per-connection multiplexer.
//!
//! A [`Connection`] owns the stream table, both connection-level windows,
//! the outbound frame queue, the flood governor, and the lifecycle timers.
//! All mutation flows through `&mut self`; the driver feeds decoded frames
//! in with [`Connection::recv_frame`], drains the outbound queue with
//! [`Connection::flush`], and polls [`Connection::poll_timers`].
//!
//! Every path that emits a frame routes through one governor-gated enqueue,
//! and stream state mutates only after the frame is admitted. A flood
//! verdict therefore surfaces as a plain `Err` with no partially-applied
//! transition behind it.

use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::Options;
use crate::error::{ErrorCode, MuxError};
use crate::flow_control::FlowWindow;
use crate::frame::{
    Frame, FrameKind, GoAwayFrame, Header, HeadersFrame, MetadataFrame, PingFrame,
    RstStreamFrame, Setting, SettingsFrame, WindowUpdateFrame,
};
use crate::governor::{FloodGovernor, GovernorStatus};
use crate::metadata::{encode_block, MetadataMap};
use crate::stats::{ConnectionStats, TerminationCause};
use crate::stream::{OpenOutcome, StreamStore};
use crate::timer::{ConnectionTimers, TimerKind};
use crate::transport::{FrameSink, WriteOutcome};

/// Which side of the connection this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiating side; allocates odd stream ids.
    Client,
    /// Accepting side; allocates even stream ids.
    Server,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Streams may be opened in both directions.
    Open,
    /// A shutdown notice was sent or received; existing streams finish,
    /// new ones are refused.
    Draining,
    /// Terminated. Nothing further is processed or emitted.
    Closed,
}

/// Application-visible event produced by inbound frame processing.
#[derive(Debug)]
pub enum Event {
    /// Initial headers for a stream.
    Headers {
        /// Originating stream.
        stream_id: u32,
        /// Decoded header list.
        headers: Vec<Header>,
        /// Remote end-of-stream flag.
        end_stream: bool,
    },
    /// Trailing headers for a stream.
    Trailers {
        /// Originating stream.
        stream_id: u32,
        /// Decoded trailer list.
        headers: Vec<Header>,
    },
    /// Stream payload bytes.
    Data {
        /// Originating stream.
        stream_id: u32,
        /// Payload.
        data: Bytes,
        /// Remote end-of-stream flag.
        end_stream: bool,
    },
    /// A fully reassembled metadata block.
    Metadata {
        /// Originating stream.
        stream_id: u32,
        /// The reassembled map, entry order preserved.
        metadata: MetadataMap,
    },
    /// A stream was reset, by the peer or by this endpoint.
    StreamReset {
        /// The reset stream.
        stream_id: u32,
        /// Reason code.
        error_code: ErrorCode,
    },
    /// The peer acknowledged a ping.
    PingAck {
        /// Opaque payload echoed back.
        opaque_data: [u8; 8],
    },
    /// The peer announced shutdown.
    GoAway {
        /// Highest locally-initiated stream the peer may still process.
        last_stream_id: u32,
        /// Shutdown reason.
        error_code: ErrorCode,
    },
}

/// One multiplexed connection.
#[derive(Debug)]
pub struct Connection {
    role: Role,
    state: ConnectionState,
    options: Options,
    streams: StreamStore,
    send_window: FlowWindow,
    recv_window: FlowWindow,
    outbound: VecDeque<Frame>,
    governor: FloodGovernor,
    timers: ConnectionTimers,
    stats: ConnectionStats,
    termination: Option<TerminationCause>,
    goaway_sent: bool,
}

impl Connection {
    /// Create a connection and queue the initial settings announcement.
    #[must_use]
    pub fn new(role: Role, options: Options, now: Instant) -> Self {
        let streams = StreamStore::new(
            matches!(role, Role::Client),
            options.max_concurrent_streams,
            options.initial_stream_window,
            options.initial_stream_window,
            options.metadata_max_block_size,
        );
        let mut conn = Self {
            role,
            state: ConnectionState::Open,
            send_window: FlowWindow::new(options.initial_connection_window),
            recv_window: FlowWindow::new(options.initial_connection_window),
            outbound: VecDeque::new(),
            governor: FloodGovernor::new(&options),
            timers: ConnectionTimers::new(&options, now),
            stats: ConnectionStats::new(),
            termination: None,
            goaway_sent: false,
            streams,
            options,
        };

        let initial = Frame::Settings(SettingsFrame::new(vec![
            Setting::InitialWindowSize(conn.options.initial_stream_window),
            Setting::MaxConcurrentStreams(conn.options.max_concurrent_streams),
        ]));
        match conn.governor.on_outbound_enqueued(FrameKind::Settings) {
            GovernorStatus::Admitted => conn.outbound.push_back(initial),
            GovernorStatus::Flood(cause) => {
                // Ceilings too small to fit even the handshake; unusable.
                conn.governor.on_outbound_dropped(FrameKind::Settings);
                conn.terminate(cause, now);
            }
        }
        conn
    }

    /// This endpoint's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The recorded termination cause, once terminated.
    #[must_use]
    pub fn termination(&self) -> Option<TerminationCause> {
        self.termination
    }

    /// Observability counters.
    #[must_use]
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Frames queued and not yet flushed.
    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Available connection-level send window.
    #[must_use]
    pub fn send_window(&self) -> i32 {
        self.send_window.available()
    }

    /// The next armed timer deadline, for driver scheduling.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let stream_deadline = self
            .streams
            .active_ids()
            .into_iter()
            .filter_map(|id| self.streams.get(id).and_then(crate::stream::Stream::flush_deadline))
            .min();
        [self.timers.next_deadline(), stream_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    // ---------------------------------------------------------------------
    // Inbound path
    // ---------------------------------------------------------------------

    /// Process one decoded frame from the peer.
    ///
    /// Returns the application event the frame produced, if any. A
    /// stream-scoped failure resets that stream and reports it as
    /// [`Event::StreamReset`]; a connection-scoped failure terminates the
    /// connection and surfaces as `Err`.
    pub fn recv_frame(&mut self, frame: Frame, now: Instant) -> Result<Option<Event>, MuxError> {
        if let Some(cause) = self.termination {
            return Err(MuxError::Terminated(cause));
        }
        self.timers.on_activity(now);

        let class = self.streams.class_of(frame.stream_id());
        match self
            .governor
            .track_inbound(&frame, class, self.streams.opened_total())
        {
            GovernorStatus::Admitted => {}
            GovernorStatus::Flood(cause) => {
                self.terminate(cause, now);
                return Err(MuxError::Terminated(cause));
            }
        }

        match self.dispatch(frame, now) {
            Ok(event) => Ok(event),
            Err(MuxError::Stream {
                stream_id,
                code,
                message,
            }) => {
                if code == ErrorCode::ProtocolError && !self.options.stream_error_on_invalid_message
                {
                    // Grammar violations escalate unless isolation is opted in.
                    self.terminate(TerminationCause::ProtocolError, now);
                    return Err(MuxError::protocol(message));
                }
                debug!(stream_id, ?code, %message, "resetting stream");
                self.reset_stream_for(stream_id, code, now)?;
                Ok(Some(Event::StreamReset {
                    stream_id,
                    error_code: code,
                }))
            }
            Err(err) => {
                let cause = match &err {
                    MuxError::Transport(_) => TerminationCause::TransportError,
                    _ => TerminationCause::ProtocolError,
                };
                self.terminate(cause, now);
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn dispatch(&mut self, frame: Frame, now: Instant) -> Result<Option<Event>, MuxError> {
        match frame {
            Frame::Headers(f) => self.on_headers(f, now),
            Frame::Data(f) => self.on_data(f, now),
            Frame::Metadata(f) => self.on_metadata(f),
            Frame::Priority(f) => {
                if f.stream_id == 0 {
                    return Err(MuxError::protocol("PRIORITY on stream 0"));
                }
                if f.dependency == f.stream_id {
                    return Err(MuxError::stream(
                        f.stream_id,
                        ErrorCode::ProtocolError,
                        "stream depends on itself",
                    ));
                }
                // Budget accounting already happened; no scheduling tree here.
                Ok(None)
            }
            Frame::RstStream(f) => {
                if f.stream_id == 0 {
                    return Err(MuxError::protocol("RST_STREAM on stream 0"));
                }
                match self.streams.get_mut(f.stream_id) {
                    Some(stream) if !stream.state().is_closed() => {
                        stream.reset(f.error_code);
                        Ok(Some(Event::StreamReset {
                            stream_id: f.stream_id,
                            error_code: f.error_code,
                        }))
                    }
                    _ => Ok(None),
                }
            }
            Frame::Settings(f) => self.on_settings(&f, now),
            Frame::Ping(f) => {
                if f.ack {
                    return Ok(Some(Event::PingAck {
                        opaque_data: f.opaque_data,
                    }));
                }
                self.enqueue(Frame::Ping(PingFrame::ack(f.opaque_data)), now)?;
                Ok(None)
            }
            Frame::GoAway(f) => self.on_goaway(&f, now),
            Frame::WindowUpdate(f) => self.on_window_update(f, now),
        }
    }

    fn on_headers(
        &mut self,
        frame: HeadersFrame,
        now: Instant,
    ) -> Result<Option<Event>, MuxError> {
        if frame.stream_id == 0 {
            return Err(MuxError::protocol("HEADERS on stream 0"));
        }
        let is_new = self.streams.get(frame.stream_id).is_none();
        if is_new && self.state != ConnectionState::Open {
            // The shutdown notice promised not to process streams above the
            // advertised high-water mark; opening one now would break it.
            debug!(stream_id = frame.stream_id, "refusing stream during drain");
            self.enqueue(
                Frame::RstStream(RstStreamFrame {
                    stream_id: frame.stream_id,
                    error_code: ErrorCode::RefusedStream,
                }),
                now,
            )?;
            return Ok(None);
        }
        if is_new {
            match self.streams.open_remote(frame.stream_id)? {
                OpenOutcome::Opened => {}
                OpenOutcome::Retired => return Ok(None),
                OpenOutcome::Refused => {
                    debug!(stream_id = frame.stream_id, "refusing stream at ceiling");
                    self.enqueue(
                        Frame::RstStream(RstStreamFrame {
                            stream_id: frame.stream_id,
                            error_code: ErrorCode::RefusedStream,
                        }),
                        now,
                    )?;
                    return Ok(None);
                }
            }
        }
        let stream = self
            .streams
            .get_mut(frame.stream_id)
            .ok_or_else(|| MuxError::protocol("stream vanished during open"))?;
        let is_trailers = stream.headers_received();
        stream.recv_headers(frame.end_stream)?;
        if is_trailers {
            if !frame.end_stream {
                return Err(MuxError::stream(
                    frame.stream_id,
                    ErrorCode::ProtocolError,
                    "trailers without end of stream",
                ));
            }
            Ok(Some(Event::Trailers {
                stream_id: frame.stream_id,
                headers: frame.headers,
            }))
        } else {
            Ok(Some(Event::Headers {
                stream_id: frame.stream_id,
                headers: frame.headers,
                end_stream: frame.end_stream,
            }))
        }
    }

    fn on_data(
        &mut self,
        frame: crate::frame::DataFrame,
        now: Instant,
    ) -> Result<Option<Event>, MuxError> {
        if frame.stream_id == 0 {
            return Err(MuxError::protocol("DATA on stream 0"));
        }
        let len = u32::try_from(frame.data.len())
            .map_err(|_| MuxError::protocol("DATA payload larger than a window can admit"))?;

        // Bytes on the wire consume the connection window no matter what
        // becomes of the stream they target.
        self.recv_window.consume(len)?;

        let event = match self.streams.get_mut(frame.stream_id) {
            Some(stream) if !stream.state().is_closed() => {
                stream.recv_data(len, frame.end_stream)?;
                Some(Event::Data {
                    stream_id: frame.stream_id,
                    data: frame.data,
                    end_stream: frame.end_stream,
                })
            }
            // Late DATA against a retired stream: accounted, then dropped.
            _ => None,
        };

        self.replenish_recv_windows(frame.stream_id, now)?;
        Ok(event)
    }

    fn on_metadata(&mut self, frame: MetadataFrame) -> Result<Option<Event>, MuxError> {
        if frame.stream_id == 0 {
            return Err(MuxError::protocol("METADATA on stream 0"));
        }
        match self.streams.get_mut(frame.stream_id) {
            Some(stream) if !stream.state().is_closed() => {
                let block = stream.recv_metadata_chunk(frame.payload, frame.end_metadata)?;
                Ok(block.map(|metadata| Event::Metadata {
                    stream_id: frame.stream_id,
                    metadata,
                }))
            }
            _ => Ok(None),
        }
    }

    fn on_settings(
        &mut self,
        frame: &SettingsFrame,
        now: Instant,
    ) -> Result<Option<Event>, MuxError> {
        if frame.ack {
            return Ok(None);
        }
        for setting in &frame.settings {
            match *setting {
                Setting::InitialWindowSize(size) => {
                    if size > i32::MAX as u32 {
                        return Err(MuxError::flow_control(
                            "peer initial window size exceeds 2^31-1",
                        ));
                    }
                    self.streams.set_initial_send_window(size)?;
                }
                Setting::MaxConcurrentStreams(max) => {
                    self.streams.set_peer_max_concurrent(max);
                }
            }
        }
        self.enqueue(Frame::Settings(SettingsFrame::ack()), now)?;
        // Raised stream windows may have unblocked buffered data.
        self.pump_all(now)?;
        Ok(None)
    }

    fn on_goaway(&mut self, frame: &GoAwayFrame, now: Instant) -> Result<Option<Event>, MuxError> {
        debug!(
            last_stream_id = frame.last_stream_id,
            code = ?frame.error_code,
            "peer announced shutdown"
        );
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Draining;
        }
        self.timers.start_drain(now);

        // Streams we initiated above the peer's high-water mark were never
        // processed and are safe to retry elsewhere.
        let local_parity = match self.role {
            Role::Client => 1,
            Role::Server => 0,
        };
        for id in self.streams.active_ids() {
            if id % 2 == local_parity && id > frame.last_stream_id {
                if let Some(stream) = self.streams.get_mut(id) {
                    stream.reset(ErrorCode::RefusedStream);
                }
            }
        }
        Ok(Some(Event::GoAway {
            last_stream_id: frame.last_stream_id,
            error_code: frame.error_code,
        }))
    }

    fn on_window_update(
        &mut self,
        frame: WindowUpdateFrame,
        now: Instant,
    ) -> Result<Option<Event>, MuxError> {
        // A zero increment makes no progress; the budget tracking that
        // already ran is the only consequence it earns.
        if frame.increment == 0 {
            return Ok(None);
        }
        if frame.stream_id == 0 {
            self.send_window.expand(frame.increment)?;
            self.pump_all(now)?;
        } else if let Some(stream) = self.streams.get_mut(frame.stream_id) {
            if !stream.state().is_closed() {
                stream.expand_send_window(frame.increment)?;
                self.pump_stream(frame.stream_id, now)?;
            }
        }
        Ok(None)
    }

    // ---------------------------------------------------------------------
    // Outbound path
    // ---------------------------------------------------------------------

    /// Open a locally-initiated stream, returning its id.
    pub fn open_stream(&mut self, now: Instant) -> Result<u32, MuxError> {
        if let Some(cause) = self.termination {
            return Err(MuxError::Terminated(cause));
        }
        if self.state != ConnectionState::Open {
            return Err(MuxError::connection(
                ErrorCode::RefusedStream,
                "connection is draining",
            ));
        }
        self.timers.on_activity(now);
        self.streams.allocate_local()
    }

    /// Send initial headers (or, with `end_stream`, a complete exchange).
    pub fn send_headers(
        &mut self,
        stream_id: u32,
        headers: Vec<Header>,
        end_stream: bool,
        now: Instant,
    ) -> Result<(), MuxError> {
        let stream = self
            .streams
            .get(stream_id)
            .ok_or_else(|| MuxError::stream(stream_id, ErrorCode::StreamClosed, "unknown stream"))?;
        if stream.end_stream_sent() || stream.state().is_closed() {
            return Err(MuxError::stream(
                stream_id,
                ErrorCode::StreamClosed,
                "local side already finished",
            ));
        }
        self.enqueue(
            Frame::Headers(HeadersFrame {
                stream_id,
                headers,
                end_stream,
            }),
            now,
        )?;
        self.stream_mut(stream_id)?.send_headers(end_stream)
    }

    /// Send trailing headers, which always end the stream.
    pub fn send_trailers(
        &mut self,
        stream_id: u32,
        headers: Vec<Header>,
        now: Instant,
    ) -> Result<(), MuxError> {
        self.send_headers(stream_id, headers, true, now)
    }

    /// Send stream payload bytes, buffering whatever the windows cannot
    /// currently admit.
    pub fn send_data(
        &mut self,
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        now: Instant,
    ) -> Result<(), MuxError> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| MuxError::stream(stream_id, ErrorCode::StreamClosed, "unknown stream"))?;
        if !stream.can_send_data() {
            return Err(MuxError::stream(
                stream_id,
                ErrorCode::StreamClosed,
                "stream cannot accept more data",
            ));
        }
        stream.queue_send(data, end_stream);
        self.pump_stream(stream_id, now)?;

        if end_stream {
            if let Some(stream) = self.streams.get_mut(stream_id) {
                if stream.has_pending_send() {
                    stream.arm_flush_deadline(now + self.options.pending_flush_timeout);
                }
            }
        }
        Ok(())
    }

    /// Send one metadata block, chunked to the configured frame size.
    pub fn send_metadata(
        &mut self,
        stream_id: u32,
        metadata: &MetadataMap,
        now: Instant,
    ) -> Result<(), MuxError> {
        let stream = self
            .streams
            .get(stream_id)
            .ok_or_else(|| MuxError::stream(stream_id, ErrorCode::StreamClosed, "unknown stream"))?;
        if stream.state().is_closed() || stream.end_stream_sent() {
            return Err(MuxError::stream(
                stream_id,
                ErrorCode::StreamClosed,
                "local side already finished",
            ));
        }
        for frame in encode_block(stream_id, metadata, self.options.metadata_max_frame_size) {
            self.enqueue(Frame::Metadata(frame), now)?;
        }
        Ok(())
    }

    /// Reset a stream, conveying `code` to the peer.
    pub fn reset_stream(
        &mut self,
        stream_id: u32,
        code: ErrorCode,
        now: Instant,
    ) -> Result<(), MuxError> {
        if let Some(cause) = self.termination {
            return Err(MuxError::Terminated(cause));
        }
        self.reset_stream_for(stream_id, code, now)
    }

    /// Send a liveness probe.
    pub fn ping(&mut self, opaque_data: [u8; 8], now: Instant) -> Result<(), MuxError> {
        self.enqueue(Frame::Ping(PingFrame::new(opaque_data)), now)
    }

    /// Announce graceful shutdown and start the drain period.
    pub fn shutdown_notice(&mut self, now: Instant) -> Result<(), MuxError> {
        if self.goaway_sent {
            return Ok(());
        }
        self.enqueue(
            Frame::GoAway(GoAwayFrame {
                last_stream_id: self.streams.highest_remote_id(),
                error_code: ErrorCode::NoError,
                debug_data: Bytes::new(),
            }),
            now,
        )?;
        self.goaway_sent = true;
        self.state = ConnectionState::Draining;
        self.timers.start_drain(now);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Driver integration
    // ---------------------------------------------------------------------

    /// Drain the outbound queue into `sink`, stopping at backpressure.
    ///
    /// Returns the number of frames confirmed flushed. Queue budget is
    /// released per confirmed frame, never on enqueue.
    pub fn flush<S: FrameSink>(&mut self, sink: &mut S, now: Instant) -> Result<usize, MuxError> {
        let mut flushed = 0;
        while let Some(frame) = self.outbound.front() {
            match sink.write_frame(frame) {
                WriteOutcome::Flushed => {
                    let kind = frame.kind();
                    self.outbound.pop_front();
                    self.governor.on_outbound_flushed(kind);
                    flushed += 1;
                }
                WriteOutcome::WouldBlock => break,
                WriteOutcome::Error(err) => {
                    warn!(error = %err, "transport write failed");
                    self.terminate(TerminationCause::TransportError, now);
                    return Err(MuxError::Transport(err));
                }
            }
        }
        Ok(flushed)
    }

    /// Check all deadlines against `now`.
    ///
    /// Expired stream flush deadlines reset their streams and report as
    /// events; an expired connection timer terminates and surfaces as `Err`.
    pub fn poll_timers(&mut self, now: Instant) -> Result<Vec<Event>, MuxError> {
        if let Some(cause) = self.termination {
            return Err(MuxError::Terminated(cause));
        }
        if let Some(kind) = self.timers.poll(now) {
            let cause = match kind {
                TimerKind::Idle => TerminationCause::IdleTimeout,
                TimerKind::MaxDuration => TerminationCause::MaxDurationTimeout,
                TimerKind::Drain => TerminationCause::DrainClose,
            };
            self.terminate(cause, now);
            return Err(MuxError::Terminated(cause));
        }

        let expired: Vec<u32> = self
            .streams
            .active_ids()
            .into_iter()
            .filter(|id| {
                self.streams
                    .get(*id)
                    .and_then(crate::stream::Stream::flush_deadline)
                    .is_some_and(|d| now >= d)
            })
            .collect();

        let mut events = Vec::with_capacity(expired.len());
        for stream_id in expired {
            warn!(stream_id, "pending data not flushed within grace period");
            self.stats.record(TerminationCause::PendingFlushTimeout);
            self.reset_stream_for(stream_id, ErrorCode::Cancel, now)?;
            events.push(Event::StreamReset {
                stream_id,
                error_code: ErrorCode::Cancel,
            });
        }
        Ok(events)
    }

    /// Drop closed streams from the table; their ids stay retired.
    pub fn prune_closed(&mut self) {
        self.streams.prune_closed();
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn stream_mut(&mut self, stream_id: u32) -> Result<&mut crate::stream::Stream, MuxError> {
        self.streams
            .get_mut(stream_id)
            .ok_or_else(|| MuxError::stream(stream_id, ErrorCode::StreamClosed, "unknown stream"))
    }

    /// The single governor-gated emission point.
    fn enqueue(&mut self, frame: Frame, now: Instant) -> Result<(), MuxError> {
        if let Some(cause) = self.termination {
            return Err(MuxError::Terminated(cause));
        }
        match self.governor.on_outbound_enqueued(frame.kind()) {
            GovernorStatus::Admitted => {
                self.outbound.push_back(frame);
                Ok(())
            }
            GovernorStatus::Flood(cause) => {
                self.governor.on_outbound_dropped(frame.kind());
                self.terminate(cause, now);
                Err(MuxError::Terminated(cause))
            }
        }
    }

    fn reset_stream_for(
        &mut self,
        stream_id: u32,
        code: ErrorCode,
        now: Instant,
    ) -> Result<(), MuxError> {
        let Some(stream) = self.streams.get(stream_id) else {
            return Ok(());
        };
        if stream.state().is_closed() {
            return Ok(());
        }
        self.enqueue(
            Frame::RstStream(RstStreamFrame {
                stream_id,
                error_code: code,
            }),
            now,
        )?;
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.reset(code);
        }
        Ok(())
    }

    /// Move buffered data for `stream_id` into the outbound queue, bounded
    /// by the lesser of the stream and connection send windows.
    fn pump_stream(&mut self, stream_id: u32, now: Instant) -> Result<(), MuxError> {
        loop {
            let conn_avail = self.send_window.available();
            let Some(stream) = self.streams.get_mut(stream_id) else {
                return Ok(());
            };
            let budget = conn_avail.min(stream.send_window()).max(0);
            let budget = usize::try_from(budget).unwrap_or(0);
            if budget == 0 {
                return Ok(());
            }
            let Some((data, end_stream)) = stream.take_pending(budget) else {
                return Ok(());
            };
            let len = u32::try_from(data.len())
                .map_err(|_| MuxError::protocol("buffered chunk larger than a window"))?;

            self.enqueue(
                Frame::Data(crate::frame::DataFrame {
                    stream_id,
                    data,
                    end_stream,
                }),
                now,
            )?;

            self.send_window.consume(len)?;
            let stream = self.stream_mut(stream_id)?;
            stream.consume_send_window(len)?;
            if end_stream {
                stream.commit_send_end();
                stream.clear_flush_deadline();
            }
        }
    }

    fn pump_all(&mut self, now: Instant) -> Result<(), MuxError> {
        for stream_id in self.streams.active_ids() {
            self.pump_stream(stream_id, now)?;
        }
        Ok(())
    }

    /// Queue owed WINDOW_UPDATE frames once consumption crosses the batching
    /// threshold, for the connection window and the given stream's window.
    fn replenish_recv_windows(&mut self, stream_id: u32, now: Instant) -> Result<(), MuxError> {
        let divisor = self.options.window_update_divisor;
        if let Some(increment) = self.recv_window.pending_update(divisor) {
            self.enqueue(
                Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id: 0,
                    increment,
                }),
                now,
            )?;
            self.recv_window.expand(increment)?;
        }
        let owed = self.streams.get(stream_id).and_then(|stream| {
            if stream.state().is_closed() {
                None
            } else {
                stream.pending_recv_update(divisor)
            }
        });
        if let Some(increment) = owed {
            self.enqueue(
                Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id,
                    increment,
                }),
                now,
            )?;
            self.stream_mut(stream_id)?.note_recv_update(increment)?;
        }
        Ok(())
    }

    /// Idempotent teardown. The first cause wins; later calls are no-ops.
    ///
    /// The farewell GOAWAY is best-effort: when the flood being punished is
    /// the outbound queue itself, adding to that queue would be self-defeat,
    /// so the frame is skipped whenever the control ceilings lack headroom.
    fn terminate(&mut self, cause: TerminationCause, _now: Instant) {
        if self.termination.is_some() {
            return;
        }
        self.termination = Some(cause);
        self.stats.record(cause);
        warn!(reason = cause.reason(), "terminating connection");

        if !self.goaway_sent && self.governor.has_control_headroom() {
            match self.governor.on_outbound_enqueued(FrameKind::GoAway) {
                GovernorStatus::Admitted => {
                    self.outbound.push_back(Frame::GoAway(GoAwayFrame {
                        last_stream_id: self.streams.highest_remote_id(),
                        error_code: cause.error_code(),
                        debug_data: Bytes::from_static(cause.reason().as_bytes()),
                    }));
                    self.goaway_sent = true;
                }
                GovernorStatus::Flood(_) => {
                    self.governor.on_outbound_dropped(FrameKind::GoAway);
                }
            }
        }

        self.timers.cancel_all();
        self.streams.close_all(cause.error_code());
        self.state = ConnectionState::Closed;
    }
}
