//! Transport module - the byte-moving contracts the core is written against.
//!
//! The client and the service never touch a socket directly. They talk to a
//! [`Transport`] (one connection) or an [`Acceptor`] (a listening endpoint)
//! and are told about progress through listener callbacks.
//!
//! Implementations provided here:
//! - [`StreamTransport`] - any tokio stream: TCP, Unix Domain Socket or an
//!   in-process duplex pipe
//! - [`TcpAcceptor`] - TCP listener
//! - [`UnixAcceptor`] - Unix Domain Socket listener (unix only)
//!
//! # Event loop
//!
//! Everything runs on one thread: a current-thread tokio runtime driving a
//! [`tokio::task::LocalSet`]. Listener callbacks are always delivered from a
//! task on that loop, never from inside a `Transport` method, so a listener
//! may call back into its transport freely.

mod stream;
mod tcp;
#[cfg(unix)]
mod unix;

pub use stream::StreamTransport;
pub use tcp::TcpAcceptor;
#[cfg(unix)]
pub use unix::{generate_socket_path, UnixAcceptor};

use std::rc::Weak;

use bytes::Bytes;

use crate::error::WirecallError;
use crate::protocol::{Frame, FrameBuffer};
use crate::status::{CallError, CallResult};

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Closed,
    /// `open` is in progress.
    Connecting,
    /// Connected; reads and writes are allowed.
    Open,
    /// `close` is in progress.
    Closing,
}

/// Completion callback for [`Transport::open`].
pub type OpenCallback = Box<dyn FnOnce(CallResult<()>)>;

/// Receives lifecycle and data notifications from a [`Transport`].
pub trait TransportListener {
    /// The transport reached [`ConnectionState::Open`].
    fn on_connected(&self);

    /// The transport reached [`ConnectionState::Closed`].
    fn on_disconnected(&self);

    /// At least the length passed to the last [`Transport::read`] is buffered.
    fn on_incoming_data(&self, available: usize);

    /// The connection failed. `on_disconnected` follows.
    fn on_connection_error(&self, error: &CallError);
}

/// A single bidirectional byte connection.
pub trait Transport {
    /// Attach the listener. Must be called once, before `open`.
    fn set_listener(&mut self, listener: Weak<dyn TransportListener>);

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// True when the state is [`ConnectionState::Open`].
    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Start connecting. `on_done` runs on the event loop with the outcome.
    fn open(&mut self, on_done: OpenCallback);

    /// Close the connection. Idempotent.
    fn close(&mut self);

    /// Queue a complete frame for writing.
    fn write(&mut self, frame: Bytes) -> CallResult<()>;

    /// Ask for one `on_incoming_data` once `len` bytes are buffered.
    fn read(&mut self, len: usize);

    /// Take every buffered byte.
    fn take_read_data(&mut self) -> Bytes;
}

/// Receives notifications from an [`Acceptor`].
pub trait AcceptorListener {
    /// A new client connected. The transport is already open.
    fn on_client_accepted(&self, transport: Box<dyn Transport>);

    /// Accepting a client failed. The acceptor keeps listening.
    fn on_accept_error(&self, error: &CallError);
}

/// A listening endpoint producing one [`Transport`] per client.
pub trait Acceptor {
    /// Attach the listener. Must be called once, before `open`.
    fn set_listener(&mut self, listener: Weak<dyn AcceptorListener>);

    /// Bind and start accepting. `max_pending` is the listen backlog.
    fn open(&mut self, max_pending: Option<u32>) -> CallResult<()>;

    /// Stop accepting. Already accepted transports are unaffected.
    fn close(&mut self);

    /// True while accepting.
    fn is_open(&self) -> bool;
}

/// Drain buffered bytes into the decoder and re-arm the next read.
///
/// Frames completed before a framing error are still returned, in order,
/// alongside the error. The read is not re-armed on a framing error; the
/// caller dispatches the frames and then closes the connection.
pub(crate) fn read_frames(
    transport: &mut dyn Transport,
    buffer: &mut FrameBuffer,
) -> (Vec<Frame>, Option<WirecallError>) {
    let data = transport.take_read_data();
    let (frames, error) = buffer.push_partial(&data);
    if error.is_none() {
        transport.read(buffer.wanted());
    }
    (frames, error)
}
