//! h2mux: multiplexed-stream connection layer with deterministic flood mitigation.
//!
//! # Overview
//!
//! This crate implements the per-connection core of a proxy that terminates a
//! binary, frame-based, multi-stream transport (HTTP/2-like) over a single
//! TCP connection: it demultiplexes typed frame events into logical streams,
//! enforces per-stream and per-connection flow-control accounting, reassembles
//! the out-of-band metadata side channel, and bounds outbound and inbound
//! frame-queue growth so that an abusive peer (or a runaway internal
//! component) terminates the connection deterministically instead of
//! exhausting the process.
//!
//! The byte-level frame grammar is an external collaborator: frames enter as
//! typed [`frame::Frame`] events and leave through an injectable
//! [`transport::FrameSink`].
//!
//! # Core Guarantees
//!
//! - **Non-throwing flood signal**: every emission call site observes flood
//!   verdicts through return values, never through an unwind, so termination
//!   discovered mid-emission leaves no partially-updated stream or window
//!   state
//! - **Exact window arithmetic**: windows never go negative; overflow past
//!   2^31-1 is a connection error, never a silent clamp
//! - **Ordering**: frames for a stream are processed and emitted in codec
//!   order; metadata is never reordered relative to headers/data/trailers
//! - **Single-threaded per connection**: all mutation happens through
//!   `&mut self`; timers are poll-driven on the owning thread
//!
//! # Module Structure
//!
//! - [`frame`]: typed frame events produced/consumed by the external codec
//! - [`flow_control`]: send/receive window accounting
//! - [`metadata`]: metadata side-channel chunking and reassembly
//! - [`stream`]: per-stream state machine and the stream table
//! - [`governor`]: flood-mitigation ceilings and verdicts
//! - [`timer`]: idle/max-duration/drain lifecycle timers
//! - [`transport`]: injectable transport-write capability
//! - [`connection`]: the multiplexer tying everything together
//! - [`config`]: connection options and builder
//! - [`stats`]: termination causes and observability counters
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frame;
pub mod governor;
pub mod metadata;
pub mod stats;
pub mod stream;
pub mod timer;
pub mod transport;

pub use config::{Options, OptionsBuilder};
pub use connection::{Connection, ConnectionState, Event, Role};
pub use error::{ErrorCode, MuxError};
pub use stats::TerminationCause;
pub use transport::{FrameSink, WriteOutcome};
